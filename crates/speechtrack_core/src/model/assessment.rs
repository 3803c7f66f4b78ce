//! Assessment, feature measurement and history row records.
//!
//! # Invariants
//! - An assessment is written once and never updated.
//! - Only finite numeric feature values become `FeatureMeasurement`s.

use crate::model::user::UserId;
use crate::model::{require_user_id, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub type AssessmentId = String;

/// Milliseconds in one day, used by day-window queries.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// One completed evaluation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub assessment_id: AssessmentId,
    pub user_id: UserId,
    /// Collaborator-defined task code (picture description, fluency, ...).
    pub task_type: i64,
    pub recorded_at: i64,
    pub audio_path: Option<String>,
    pub transcript: Option<String>,
    pub risk_score: f64,
}

impl Assessment {
    /// Builds the id used when the caller does not supply one.
    pub fn derive_id(user_id: &str, recorded_at: i64) -> AssessmentId {
        format!("{user_id}_{recorded_at}")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_user_id(&self.user_id)?;
        if self.assessment_id.trim().is_empty() {
            return Err(ValidationError::EmptyAssessmentId);
        }
        if !self.risk_score.is_finite() {
            return Err(ValidationError::NonFiniteRiskScore(self.risk_score));
        }
        Ok(())
    }
}

/// One stored (assessment, feature, value) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMeasurement {
    pub feature_name: String,
    pub value: f64,
}

/// Raw feature value as produced by feature extraction collaborators.
///
/// Deserializes from any JSON value so extractor output can be passed
/// through unchanged; arrays and objects land in `Other` and are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Boolean(bool),
    Text(String),
    Null,
    /// Must stay last: untagged variants are tried in order.
    Other(serde_json::Value),
}

/// Feature map keyed by feature name; ordered for deterministic processing.
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// Why a feature value was excluded from tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureRejection {
    NotNumeric,
    NotFinite,
    EmptyName,
}

impl Display for FeatureRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotNumeric => write!(f, "value is not numeric"),
            Self::NotFinite => write!(f, "value is not a finite number"),
            Self::EmptyName => write!(f, "feature name is empty"),
        }
    }
}

impl FeatureValue {
    /// Returns the value usable for baselines and classification.
    pub fn as_tracked(&self) -> Result<f64, FeatureRejection> {
        match self {
            Self::Number(value) if value.is_finite() => Ok(*value),
            Self::Number(_) => Err(FeatureRejection::NotFinite),
            Self::Boolean(_) | Self::Text(_) | Self::Null | Self::Other(_) => {
                Err(FeatureRejection::NotNumeric)
            }
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FeatureValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Splits a raw feature map into tracked measurements and rejected names.
///
/// Output order follows feature-name order.
pub fn partition_features(
    features: &FeatureMap,
) -> (Vec<FeatureMeasurement>, Vec<(String, FeatureRejection)>) {
    let mut tracked = Vec::new();
    let mut rejected = Vec::new();
    for (name, raw) in features {
        if name.trim().is_empty() {
            rejected.push((name.clone(), FeatureRejection::EmptyName));
            continue;
        }
        match raw.as_tracked() {
            Ok(value) => tracked.push(FeatureMeasurement {
                feature_name: name.clone(),
                value,
            }),
            Err(reason) => rejected.push((name.clone(), reason)),
        }
    }
    (tracked, rejected)
}

/// Closed time interval `[start_ms, end_ms]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    /// Window covering the last `days` days up to and including `now_ms`.
    pub fn last_days(now_ms: i64, days: u32) -> Self {
        Self {
            start_ms: now_ms.saturating_sub(i64::from(days).saturating_mul(DAY_MS)),
            end_ms: now_ms,
        }
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }
}

/// One (assessment, feature) row of a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub assessment_id: AssessmentId,
    pub recorded_at: i64,
    pub task_type: i64,
    pub risk_score: f64,
    pub feature_name: String,
    pub value: f64,
}
