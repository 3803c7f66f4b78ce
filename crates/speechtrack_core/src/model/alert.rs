//! Deviation alert records and severity tiers.
//!
//! # Invariants
//! - Severity levels persist as integers 1..=3; ordering follows the level.
//! - `deviation` is signed: positive means the value rose above baseline.

use crate::model::assessment::AssessmentId;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};

pub type AlertId = i64;

/// Ordinal deviation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    /// Persisted integer level.
    pub fn level(self) -> i64 {
        match self {
            Self::Mild => 1,
            Self::Moderate => 2,
            Self::Severe => 3,
        }
    }

    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Self::Mild),
            2 => Some(Self::Moderate),
            3 => Some(Self::Severe),
            _ => None,
        }
    }

    /// Reviewer-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Mild => "LOW",
            Self::Moderate => "MEDIUM",
            Self::Severe => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationDirection {
    Increase,
    Decrease,
}

/// Classifier output before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub user_id: UserId,
    pub assessment_id: AssessmentId,
    pub feature_name: String,
    pub value: f64,
    pub deviation: f64,
    pub z_score: f64,
    pub severity: Severity,
}

/// Persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: AlertId,
    pub user_id: UserId,
    pub assessment_id: AssessmentId,
    pub feature_name: String,
    pub deviation: f64,
    pub severity: Severity,
    pub created_at: i64,
    pub is_reviewed: bool,
}

impl Alert {
    pub fn direction(&self) -> DeviationDirection {
        direction_of(self.deviation)
    }
}

impl NewAlert {
    pub fn direction(&self) -> DeviationDirection {
        direction_of(self.deviation)
    }
}

fn direction_of(deviation: f64) -> DeviationDirection {
    if deviation > 0.0 {
        DeviationDirection::Increase
    } else {
        DeviationDirection::Decrease
    }
}

/// Alert joined with the owning user's name for review listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(flatten)]
    pub alert: Alert,
    pub user_name: Option<String>,
}
