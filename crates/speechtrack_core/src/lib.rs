//! Longitudinal tracking and baseline-deviation alerting for speech
//! assessments.
//!
//! Each ingested assessment updates per-user, per-feature baselines and is
//! classified against them; deviations beyond the band become alerts for
//! clinical review. This crate is the single source of truth for those
//! invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{
    ClassificationOrder, ConfigError, EngineConfig, SeverityCutoffs, TrackingPolicy,
    TrendSettings,
};
pub use db::{open_db, open_db_in_memory, open_existing_db, DbError, DbResult};
pub use logging::{default_log_level, init_logging, init_logging_from, logging_status};
pub use model::alert::{Alert, AlertId, AlertRecord, DeviationDirection, NewAlert, Severity};
pub use model::assessment::{
    Assessment, AssessmentId, FeatureMap, FeatureMeasurement, FeatureValue, MeasurementRow,
    TimeRange,
};
pub use model::baseline::Baseline;
pub use model::user::{User, UserId, UserProfile, UserSummary};
pub use model::ValidationError;
pub use repo::{RepoError, RepoResult};
pub use service::alert::{AlertFilter, AlertReviewService};
pub use service::clock::{Clock, FixedClock, SystemClock};
pub use service::error::{Stage, TrackingError, TrackingResult};
pub use service::history::{
    BaselineComparison, FeatureTrend, HistoryService, RiskPoint, TrendPoint, TrendReport,
};
pub use service::ingest::{AssessmentIngestor, DroppedFeature, IngestOutcome, IngestRequest};
pub use service::user::UserRegistry;

/// Minimal health-check API for embedding front ends.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
