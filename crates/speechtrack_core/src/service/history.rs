//! Read-only history, baseline, alert and trend queries.
//!
//! # Responsibility
//! - Project stored assessments/features/baselines/alerts into
//!   time-ordered series for dashboards, reports and review tooling.
//!
//! # Invariants
//! - Never writes.
//! - Each call reads inside one deferred transaction, so it sees one
//!   committed snapshot and never half of an ingestion.
//! - "No data in range" is an empty result (or `None` for trend reports),
//!   never an error.

use crate::config::{EngineConfig, SeverityCutoffs, TrendSettings};
use crate::model::alert::{AlertRecord, Severity};
use crate::model::assessment::{
    partition_features, AssessmentId, FeatureMap, MeasurementRow, TimeRange,
};
use crate::model::baseline::Baseline;
use crate::repo::alert_repo::{AlertQuery, AlertRepository, SqliteAlertRepository};
use crate::repo::assessment_repo::{
    AssessmentRepository, MeasurementQuery, SqliteAssessmentRepository,
};
use crate::repo::baseline_repo::{BaselineRepository, SqliteBaselineRepository};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::repo::RepoResult;
use crate::service::alert::AlertFilter;
use crate::service::clock::{Clock, SystemClock};
use crate::service::deviation::DeviationClassifier;
use crate::service::error::{at_stage, sqlite_at_stage, Stage, TrackingResult};
use log::{debug, error};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

/// One point of a feature series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub recorded_at: i64,
    pub value: f64,
}

/// Risk score of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPoint {
    pub assessment_id: AssessmentId,
    pub recorded_at: i64,
    pub task_type: i64,
    pub risk_score: f64,
}

/// Series of one feature plus its current baseline band for overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTrend {
    pub feature_name: String,
    pub points: Vec<TrendPoint>,
    pub baseline: Option<Baseline>,
}

/// Everything a trend visualization needs for one user and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub user_id: String,
    pub display_name: String,
    pub range: TimeRange,
    pub risk_series: Vec<RiskPoint>,
    /// Selected features with at least one point in range, selection order.
    pub features: Vec<FeatureTrend>,
    pub alerts: Vec<AlertRecord>,
    pub risk_low_band: f64,
    pub risk_high_band: f64,
}

/// Read-only comparison of one incoming value against the stored baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub feature_name: String,
    pub value: f64,
    pub baseline: Baseline,
    pub deviation: f64,
    /// `None` when the band has collapsed to a single value.
    pub z_score: Option<f64>,
    pub severity: Option<Severity>,
    pub within_band: bool,
}

pub struct HistoryService<'conn, C: Clock = SystemClock> {
    conn: &'conn Connection,
    clock: C,
    cutoffs: SeverityCutoffs,
    trend: TrendSettings,
}

impl<'conn> HistoryService<'conn, SystemClock> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            clock: SystemClock,
            cutoffs: SeverityCutoffs::default(),
            trend: TrendSettings::default(),
        }
    }

    pub fn from_config(conn: &'conn Connection, config: &EngineConfig) -> Self {
        Self::new(conn)
            .with_cutoffs(config.policy.severity_cutoffs)
            .with_trend_settings(config.trend.clone())
    }
}

impl<'conn, C: Clock> HistoryService<'conn, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> HistoryService<'conn, C2> {
        HistoryService {
            conn: self.conn,
            clock,
            cutoffs: self.cutoffs,
            trend: self.trend,
        }
    }

    pub fn with_cutoffs(mut self, cutoffs: SeverityCutoffs) -> Self {
        self.cutoffs = cutoffs;
        self
    }

    pub fn with_trend_settings(mut self, trend: TrendSettings) -> Self {
        self.trend = trend;
        self
    }

    /// Feature rows of the last `days` days, oldest first.
    ///
    /// An empty `feature_names` selects every feature.
    pub fn get_user_history(
        &self,
        user_id: &str,
        feature_names: &[String],
        days: u32,
    ) -> TrackingResult<Vec<MeasurementRow>> {
        let range = TimeRange::last_days(self.clock.now_ms(), days);
        self.read_snapshot("user_history", Some(user_id), |conn| {
            SqliteAssessmentRepository::try_new(conn)?.query_measurements(&MeasurementQuery {
                user_id: user_id.to_string(),
                feature_names: feature_names.to_vec(),
                range,
            })
        })
    }

    /// Current baselines of one user, by feature name.
    pub fn get_baselines(&self, user_id: &str) -> TrackingResult<Vec<Baseline>> {
        self.read_snapshot("baselines", Some(user_id), |conn| {
            SqliteBaselineRepository::try_new(conn)?.list_baselines(user_id)
        })
    }

    pub fn get_baseline(
        &self,
        user_id: &str,
        feature_name: &str,
    ) -> TrackingResult<Option<Baseline>> {
        self.read_snapshot("baseline", Some(user_id), |conn| {
            SqliteBaselineRepository::try_new(conn)?.get_baseline(user_id, feature_name)
        })
    }

    /// Alerts matching `filter`, most severe then most recent first.
    pub fn get_alerts(&self, filter: &AlertFilter) -> TrackingResult<Vec<AlertRecord>> {
        let query = filter.to_query(self.clock.now_ms());
        self.read_snapshot("alerts", filter.user_id.as_deref(), |conn| {
            SqliteAlertRepository::try_new(conn)?.query_alerts(&query)
        })
    }

    /// Assembles the trend report of the last `days` days.
    ///
    /// `features` overrides the configured default selection. Returns
    /// `None` when the user has no history in range.
    pub fn build_trend_series(
        &self,
        user_id: &str,
        days: u32,
        features: Option<&[String]>,
    ) -> TrackingResult<Option<TrendReport>> {
        let range = TimeRange::last_days(self.clock.now_ms(), days);
        let selected = features.unwrap_or(self.trend.default_features.as_slice());

        self.read_snapshot("trend_series", Some(user_id), |conn| {
            let rows = SqliteAssessmentRepository::try_new(conn)?.query_measurements(
                &MeasurementQuery {
                    user_id: user_id.to_string(),
                    feature_names: Vec::new(),
                    range,
                },
            )?;
            if rows.is_empty() {
                return Ok(None);
            }

            let user = SqliteUserRepository::try_new(conn)?.get_user(user_id)?;
            let baselines = SqliteBaselineRepository::try_new(conn)?.list_baselines(user_id)?;
            let alerts = SqliteAlertRepository::try_new(conn)?.query_alerts(&AlertQuery {
                user_id: Some(user_id.to_string()),
                since_ms: Some(range.start_ms),
                ..AlertQuery::default()
            })?;

            let features = selected
                .iter()
                .filter_map(|name| feature_trend(name, &rows, &baselines))
                .collect();

            Ok(Some(TrendReport {
                user_id: user_id.to_string(),
                display_name: user
                    .as_ref()
                    .map_or(user_id, |user| user.display_name())
                    .to_string(),
                range,
                risk_series: risk_series(&rows),
                features,
                alerts,
                risk_low_band: self.trend.risk_low_band,
                risk_high_band: self.trend.risk_high_band,
            }))
        })
    }

    /// Scores freshly extracted features against the stored baselines
    /// without persisting anything.
    pub fn compare_to_baseline(
        &self,
        user_id: &str,
        features: &FeatureMap,
    ) -> TrackingResult<Vec<BaselineComparison>> {
        let (measurements, _) = partition_features(features);
        let classifier = DeviationClassifier::new(self.cutoffs);
        let baselines = self.get_baselines(user_id)?;

        Ok(measurements
            .into_iter()
            .filter_map(|measurement| {
                let baseline = baselines
                    .iter()
                    .find(|baseline| baseline.feature_name == measurement.feature_name)?;
                let scored = classifier.score(Some(baseline), measurement.value);
                Some(BaselineComparison {
                    deviation: measurement.value - baseline.central,
                    z_score: scored.map(|scored| scored.z_score),
                    severity: scored.and_then(|scored| scored.severity),
                    within_band: baseline.contains(measurement.value),
                    value: measurement.value,
                    feature_name: measurement.feature_name,
                    baseline: baseline.clone(),
                })
            })
            .collect())
    }

    fn read_snapshot<T>(
        &self,
        operation: &'static str,
        user_id: Option<&str>,
        read: impl FnOnce(&Connection) -> RepoResult<T>,
    ) -> TrackingResult<T> {
        let started_at = Instant::now();
        let result = self
            .conn
            .unchecked_transaction()
            .map_err(sqlite_at_stage(Stage::Query, user_id, None))
            .and_then(|tx| {
                let snapshot: &Connection = &tx;
                let value = read(snapshot).map_err(at_stage(Stage::Query, user_id, None))?;
                tx.commit()
                    .map_err(sqlite_at_stage(Stage::Query, user_id, None))?;
                Ok(value)
            });

        match &result {
            Ok(_) => debug!(
                "event=history_query module=history status=ok op={} user_id={} duration_ms={}",
                operation,
                user_id.unwrap_or("*"),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=history_query module=history status=error op={} user_id={} duration_ms={} error_code={} error={}",
                operation,
                user_id.unwrap_or("*"),
                started_at.elapsed().as_millis(),
                err.error_code(),
                err
            ),
        }
        result
    }
}

fn risk_series(rows: &[MeasurementRow]) -> Vec<RiskPoint> {
    let mut seen = BTreeSet::new();
    rows.iter()
        .filter(|row| seen.insert(row.assessment_id.as_str()))
        .map(|row| RiskPoint {
            assessment_id: row.assessment_id.clone(),
            recorded_at: row.recorded_at,
            task_type: row.task_type,
            risk_score: row.risk_score,
        })
        .collect()
}

fn feature_trend(
    feature_name: &str,
    rows: &[MeasurementRow],
    baselines: &[Baseline],
) -> Option<FeatureTrend> {
    let points: Vec<TrendPoint> = rows
        .iter()
        .filter(|row| row.feature_name == feature_name)
        .map(|row| TrendPoint {
            recorded_at: row.recorded_at,
            value: row.value,
        })
        .collect();
    if points.is_empty() {
        return None;
    }

    Some(FeatureTrend {
        feature_name: feature_name.to_string(),
        points,
        baseline: baselines
            .iter()
            .find(|baseline| baseline.feature_name == feature_name)
            .cloned(),
    })
}
