//! Engine configuration: tracking policy, trend defaults, storage/logging.
//!
//! # Responsibility
//! - Hold the tunables of baseline estimation and deviation scoring.
//! - Load configuration from JSON with per-field defaults.
//!
//! # Invariants
//! - `validate()` must succeed before a policy is used by services.
//! - Defaults: 3 assessments, 5-point window, +/-2 sigma, 1.5/2/3 cutoffs.

use crate::model::alert::Severity;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Features plotted by trend reports when the caller does not choose.
pub const DEFAULT_TREND_FEATURES: &[&str] = &[
    "hesitation_ratio",
    "speech_rate_wpm",
    "word_finding_difficulty_count",
    "acoustic_vocal_stability",
];

/// Whether a new value may move its own baseline before it is scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOrder {
    /// Refresh baselines with the new assessment included, then score it.
    #[default]
    RefreshThenClassify,
    /// Score against the baselines as they were before this assessment,
    /// then refresh.
    ClassifyThenRefresh,
}

/// z-score cutoffs; a tier applies when `z` is strictly greater.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityCutoffs {
    pub mild: f64,
    pub moderate: f64,
    pub severe: f64,
}

impl Default for SeverityCutoffs {
    fn default() -> Self {
        Self {
            mild: 1.5,
            moderate: 2.0,
            severe: 3.0,
        }
    }
}

impl SeverityCutoffs {
    /// Maps a z-score to its tier, highest tier first.
    pub fn tier(&self, z_score: f64) -> Option<Severity> {
        if z_score > self.severe {
            Some(Severity::Severe)
        } else if z_score > self.moderate {
            Some(Severity::Moderate)
        } else if z_score > self.mild {
            Some(Severity::Mild)
        } else {
            None
        }
    }
}

/// Baseline estimation and classification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingPolicy {
    /// Assessments a user needs before any baseline is computed.
    pub min_assessments: u32,
    /// Measurements a feature needs before it gets a baseline.
    pub min_measurements: u32,
    /// Most recent measurements sampled per baseline.
    pub window: u32,
    /// Band half-width in population standard deviations.
    pub threshold_sigma: f64,
    pub severity_cutoffs: SeverityCutoffs,
    pub classification_order: ClassificationOrder,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            min_assessments: 3,
            min_measurements: 3,
            window: 5,
            threshold_sigma: 2.0,
            severity_cutoffs: SeverityCutoffs::default(),
            classification_order: ClassificationOrder::default(),
        }
    }
}

impl TrackingPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_assessments == 0 {
            return Err(ConfigError::Invalid(
                "min_assessments must be at least 1".to_string(),
            ));
        }
        if self.min_measurements == 0 {
            return Err(ConfigError::Invalid(
                "min_measurements must be at least 1".to_string(),
            ));
        }
        if self.window < self.min_measurements {
            return Err(ConfigError::Invalid(format!(
                "window ({}) must not be smaller than min_measurements ({})",
                self.window, self.min_measurements
            )));
        }
        if !self.threshold_sigma.is_finite() || self.threshold_sigma <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "threshold_sigma must be a positive number, got {}",
                self.threshold_sigma
            )));
        }
        let cutoffs = self.severity_cutoffs;
        let all_finite = [cutoffs.mild, cutoffs.moderate, cutoffs.severe]
            .iter()
            .all(|value| value.is_finite() && *value >= 0.0);
        if !all_finite || !(cutoffs.mild <= cutoffs.moderate && cutoffs.moderate <= cutoffs.severe)
        {
            return Err(ConfigError::Invalid(format!(
                "severity cutoffs must be finite, non-negative and ordered mild <= moderate <= severe, got {}/{}/{}",
                cutoffs.mild, cutoffs.moderate, cutoffs.severe
            )));
        }
        Ok(())
    }
}

/// Defaults for trend report assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendSettings {
    pub default_features: Vec<String>,
    /// Risk score below which an assessment reads as low risk.
    pub risk_low_band: f64,
    /// Risk score above which an assessment reads as high risk.
    pub risk_high_band: f64,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            default_features: DEFAULT_TREND_FEATURES
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            risk_low_band: 0.3,
            risk_high_band: 0.6,
        }
    }
}

/// Top-level configuration for embedding the engine in a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Absolute log directory; file logging stays off when `None`.
    pub log_dir: Option<PathBuf>,
    pub policy: TrackingPolicy,
    pub trend: TrendSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/tracking/assessment_history.sqlite3"),
            log_level: crate::logging::default_log_level().to_string(),
            log_dir: None,
            policy: TrackingPolicy::default(),
            trend: TrendSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy.validate()?;
        if !(self.trend.risk_low_band <= self.trend.risk_high_band) {
            return Err(ConfigError::Invalid(format!(
                "risk_low_band ({}) must not exceed risk_high_band ({})",
                self.trend.risk_low_band, self.trend.risk_high_band
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config JSON: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassificationOrder, ConfigError, EngineConfig, SeverityCutoffs, TrackingPolicy};
    use crate::model::alert::Severity;

    #[test]
    fn defaults_match_tracking_policy() {
        let policy = TrackingPolicy::default();
        assert_eq!(policy.min_assessments, 3);
        assert_eq!(policy.min_measurements, 3);
        assert_eq!(policy.window, 5);
        assert_eq!(policy.threshold_sigma, 2.0);
        assert_eq!(
            policy.classification_order,
            ClassificationOrder::RefreshThenClassify
        );
        policy.validate().expect("default policy should be valid");
    }

    #[test]
    fn cutoffs_are_strict_lower_bounds() {
        let cutoffs = SeverityCutoffs::default();
        assert_eq!(cutoffs.tier(1.5), None);
        assert_eq!(cutoffs.tier(1.5001), Some(Severity::Mild));
        assert_eq!(cutoffs.tier(2.0), Some(Severity::Mild));
        assert_eq!(cutoffs.tier(2.5), Some(Severity::Moderate));
        assert_eq!(cutoffs.tier(3.0), Some(Severity::Moderate));
        assert_eq!(cutoffs.tier(3.5), Some(Severity::Severe));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"db_path": "/tmp/track.sqlite3",
                "policy": {"window": 7, "classification_order": "classify_then_refresh"}}"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.policy.window, 7);
        assert_eq!(config.policy.min_assessments, 3);
        assert_eq!(
            config.policy.classification_order,
            ClassificationOrder::ClassifyThenRefresh
        );
        assert_eq!(config.trend.risk_high_band, 0.6);
    }

    #[test]
    fn window_smaller_than_minimum_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"policy": {"window": 2}}"#)
            .expect_err("window 2 < min 3 must fail");
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("window")));
    }

    #[test]
    fn unordered_cutoffs_are_rejected() {
        let policy = TrackingPolicy {
            severity_cutoffs: SeverityCutoffs {
                mild: 2.5,
                moderate: 2.0,
                severe: 3.0,
            },
            ..TrackingPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn malformed_json_reports_parse_error() {
        let err = EngineConfig::from_json_str("{not json").expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
