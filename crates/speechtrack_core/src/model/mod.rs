//! Domain model for longitudinal speech-feature tracking.
//!
//! # Responsibility
//! - Define the records persisted by the tracking store.
//! - Keep validation rules next to the data they protect.
//!
//! # Invariants
//! - Users, assessments and measurements are append-only from the engine's
//!   point of view; only baselines are replaced and only `is_reviewed` on
//!   alerts is mutable.
//! - All timestamps are Unix epoch milliseconds.

pub mod alert;
pub mod assessment;
pub mod baseline;
pub mod user;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Validation failures for caller-supplied records.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyUserId,
    EmptyAssessmentId,
    NonFiniteRiskScore(f64),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyUserId => write!(f, "user_id must not be empty"),
            Self::EmptyAssessmentId => write!(f, "assessment_id must not be empty"),
            Self::NonFiniteRiskScore(value) => {
                write!(f, "risk_score must be a finite number, got {value}")
            }
        }
    }
}

impl Error for ValidationError {}

pub(crate) fn require_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.trim().is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    Ok(())
}
