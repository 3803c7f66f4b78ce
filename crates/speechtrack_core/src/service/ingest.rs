//! Assessment ingestion: the engine's single write path.
//!
//! # Responsibility
//! - Store one assessment with its numeric features.
//! - Refresh the user's baselines and classify the new values.
//! - Persist resulting alerts.
//!
//! # Invariants
//! - One ingestion is one `BEGIN IMMEDIATE` transaction. Either the
//!   assessment, its features, the refreshed baselines and the alerts all
//!   become visible, or none of them do.
//! - Immediate transactions take SQLite's write lock up front, so two
//!   ingestions can never interleave the read-then-replace of baselines.
//! - Non-numeric feature values are dropped, never fatal.

use crate::config::{ClassificationOrder, ConfigError, TrackingPolicy};
use crate::model::alert::Alert;
use crate::model::assessment::{
    partition_features, Assessment, AssessmentId, FeatureMap, FeatureRejection,
};
use crate::model::baseline::Baseline;
use crate::repo::alert_repo::{AlertRepository, SqliteAlertRepository};
use crate::repo::assessment_repo::{AssessmentRepository, SqliteAssessmentRepository};
use crate::repo::baseline_repo::{BaselineRepository, SqliteBaselineRepository};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::service::baseline::BaselineEstimator;
use crate::service::clock::{Clock, SystemClock};
use crate::service::deviation::DeviationClassifier;
use crate::service::error::{at_stage, sqlite_at_stage, Stage, TrackingError, TrackingResult};
use log::{debug, error, info};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One completed assessment handed over by the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    pub features: FeatureMap,
    pub risk_score: f64,
    #[serde(default)]
    pub task_type: i64,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    /// Derived from user id and timestamp when absent.
    #[serde(default)]
    pub assessment_id: Option<String>,
    /// Epoch ms; defaults to the ingestor clock.
    #[serde(default)]
    pub recorded_at: Option<i64>,
}

impl IngestRequest {
    pub fn new(user_id: impl Into<String>, features: FeatureMap, risk_score: f64) -> Self {
        Self {
            user_id: user_id.into(),
            features,
            risk_score,
            task_type: 0,
            audio_path: None,
            transcript: None,
            assessment_id: None,
            recorded_at: None,
        }
    }

    pub fn with_task_type(mut self, task_type: i64) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_audio_path(mut self, audio_path: impl Into<String>) -> Self {
        self.audio_path = Some(audio_path.into());
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_assessment_id(mut self, assessment_id: impl Into<String>) -> Self {
        self.assessment_id = Some(assessment_id.into());
        self
    }

    pub fn recorded_at(mut self, epoch_ms: i64) -> Self {
        self.recorded_at = Some(epoch_ms);
        self
    }
}

/// Feature excluded from tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedFeature {
    pub name: String,
    pub reason: FeatureRejection,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub assessment_id: AssessmentId,
    pub recorded_at: i64,
    /// Alerts created for this assessment, in feature-name order.
    pub alerts: Vec<Alert>,
    /// Baselines rewritten by this ingestion, in feature-name order.
    pub refreshed_baselines: Vec<Baseline>,
    pub dropped_features: Vec<DroppedFeature>,
}

/// Write-path service over one connection.
pub struct AssessmentIngestor<'conn, C: Clock = SystemClock> {
    conn: &'conn Connection,
    policy: TrackingPolicy,
    clock: C,
}

impl<'conn> AssessmentIngestor<'conn, SystemClock> {
    /// Creates an ingestor using wall-clock time.
    pub fn new(conn: &'conn Connection, policy: TrackingPolicy) -> Result<Self, ConfigError> {
        Self::with_clock(conn, policy, SystemClock)
    }
}

impl<'conn, C: Clock> AssessmentIngestor<'conn, C> {
    pub fn with_clock(
        conn: &'conn Connection,
        policy: TrackingPolicy,
        clock: C,
    ) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self {
            conn,
            policy,
            clock,
        })
    }

    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    /// Stores one assessment and returns its id plus any new alerts.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty user id / assessment id or a non-finite
    ///   risk score; nothing is written.
    /// - `DuplicateKey` when the assessment id exists; nothing is written.
    /// - `PersistenceFailure` when the transaction cannot complete; it is
    ///   rolled back.
    pub fn ingest(&self, request: &IngestRequest) -> TrackingResult<IngestOutcome> {
        let started_at = Instant::now();
        let now_ms = self.clock.now_ms();
        let recorded_at = request.recorded_at.unwrap_or(now_ms);
        let assessment = Assessment {
            assessment_id: request
                .assessment_id
                .clone()
                .unwrap_or_else(|| Assessment::derive_id(&request.user_id, recorded_at)),
            user_id: request.user_id.clone(),
            task_type: request.task_type,
            recorded_at,
            audio_path: request.audio_path.clone(),
            transcript: request.transcript.clone(),
            risk_score: request.risk_score,
        };

        let result = assessment
            .validate()
            .map_err(TrackingError::from)
            .and_then(|()| self.ingest_validated(&assessment, &request.features, now_ms));

        match &result {
            Ok(outcome) => info!(
                "event=assessment_ingest module=ingest status=ok user_id={} assessment_id={} features={} dropped={} baselines={} alerts={} duration_ms={}",
                assessment.user_id,
                outcome.assessment_id,
                request.features.len() - outcome.dropped_features.len(),
                outcome.dropped_features.len(),
                outcome.refreshed_baselines.len(),
                outcome.alerts.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=assessment_ingest module=ingest status=error user_id={} assessment_id={} duration_ms={} error_code={} error={}",
                assessment.user_id,
                assessment.assessment_id,
                started_at.elapsed().as_millis(),
                err.error_code(),
                err
            ),
        }

        result
    }

    fn ingest_validated(
        &self,
        assessment: &Assessment,
        features: &FeatureMap,
        now_ms: i64,
    ) -> TrackingResult<IngestOutcome> {
        let user_id = assessment.user_id.as_str();
        let assessment_id = assessment.assessment_id.as_str();
        let (measurements, rejected) = partition_features(features);
        for (name, reason) in &rejected {
            debug!(
                "event=feature_dropped module=ingest status=skipped user_id={} assessment_id={} feature={} reason={}",
                user_id, assessment_id, name, reason
            );
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(sqlite_at_stage(Stage::Begin, Some(user_id), Some(assessment_id)))?;

        let (alerts, refreshed_baselines) = {
            let fail_at = |stage| at_stage(stage, Some(user_id), Some(assessment_id));
            let users = SqliteUserRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;
            let assessments =
                SqliteAssessmentRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;
            let baselines = SqliteBaselineRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;
            let alert_repo = SqliteAlertRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;

            users
                .ensure_user(user_id, now_ms)
                .map_err(fail_at(Stage::RegisterUser))?;
            assessments
                .insert_assessment(assessment, &measurements)
                .map_err(fail_at(Stage::InsertAssessment))?;

            let estimator = BaselineEstimator::new(&self.policy);
            let classifier = DeviationClassifier::new(self.policy.severity_cutoffs);

            let (new_alerts, refreshed) = match self.policy.classification_order {
                ClassificationOrder::RefreshThenClassify => {
                    let refreshed = estimator
                        .refresh(&assessments, &baselines, user_id, now_ms)
                        .map_err(fail_at(Stage::RefreshBaselines))?;
                    let current = baselines
                        .list_baselines(user_id)
                        .map_err(fail_at(Stage::LoadBaselines))?;
                    let new_alerts = classifier.classify_assessment(
                        &current,
                        user_id,
                        assessment_id,
                        &measurements,
                    );
                    (new_alerts, refreshed)
                }
                ClassificationOrder::ClassifyThenRefresh => {
                    let prior = baselines
                        .list_baselines(user_id)
                        .map_err(fail_at(Stage::LoadBaselines))?;
                    let new_alerts = classifier.classify_assessment(
                        &prior,
                        user_id,
                        assessment_id,
                        &measurements,
                    );
                    let refreshed = estimator
                        .refresh(&assessments, &baselines, user_id, now_ms)
                        .map_err(fail_at(Stage::RefreshBaselines))?;
                    (new_alerts, refreshed)
                }
            };

            let alerts = alert_repo
                .insert_alerts(&new_alerts, now_ms)
                .map_err(fail_at(Stage::PersistAlerts))?;
            (alerts, refreshed)
        };

        tx.commit()
            .map_err(sqlite_at_stage(Stage::Commit, Some(user_id), Some(assessment_id)))?;

        Ok(IngestOutcome {
            assessment_id: assessment.assessment_id.clone(),
            recorded_at: assessment.recorded_at,
            alerts,
            refreshed_baselines,
            dropped_features: rejected
                .into_iter()
                .map(|(name, reason)| DroppedFeature { name, reason })
                .collect(),
        })
    }

    /// Recomputes all eligible baselines of one user from stored history.
    ///
    /// Uses the same eligibility rules as ingestion and writes in one
    /// immediate transaction. Returns the rewritten baselines.
    pub fn rebuild_baselines(&self, user_id: &str) -> TrackingResult<Vec<Baseline>> {
        crate::model::require_user_id(user_id)?;
        let started_at = Instant::now();
        let now_ms = self.clock.now_ms();
        let fail_at = |stage| at_stage(stage, Some(user_id), None);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(sqlite_at_stage(Stage::Begin, Some(user_id), None))?;
        let rebuilt = {
            let assessments =
                SqliteAssessmentRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;
            let baselines = SqliteBaselineRepository::try_new(&tx).map_err(fail_at(Stage::Begin))?;
            BaselineEstimator::new(&self.policy)
                .refresh(&assessments, &baselines, user_id, now_ms)
                .map_err(fail_at(Stage::RefreshBaselines))?
        };
        tx.commit()
            .map_err(sqlite_at_stage(Stage::Commit, Some(user_id), None))?;

        info!(
            "event=baseline_rebuild module=ingest status=ok user_id={} baselines={} duration_ms={}",
            user_id,
            rebuilt.len(),
            started_at.elapsed().as_millis()
        );
        Ok(rebuilt)
    }
}
