//! User registry records.

use crate::model::{require_user_id, ValidationError};
use serde::{Deserialize, Serialize};

/// Opaque caller-chosen user key.
pub type UserId = String;

/// Persisted user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub notes: Option<String>,
    /// Epoch milliseconds of first registration.
    pub created_at: i64,
}

impl User {
    /// Name shown in reports; falls back to the user id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.user_id.as_str())
    }
}

/// Registration / partial-merge input.
///
/// `None` fields never overwrite stored values on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_user_id(&self.user_id)
    }
}

/// One row of the user overview listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub assessment_count: u32,
    /// `None` when the user has never been assessed.
    pub last_assessment_at: Option<i64>,
}
