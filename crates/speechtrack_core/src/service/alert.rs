//! Alert listing filters and the reviewer action.
//!
//! # Invariants
//! - Reviewing only flips `is_reviewed`; alert content is immutable.
//! - Marking an unknown alert id is `NotFound`; marking twice is a no-op.

use crate::model::alert::{Alert, AlertId, Severity};
use crate::model::assessment::DAY_MS;
use crate::repo::alert_repo::{AlertQuery, AlertRepository, SqliteAlertRepository};
use crate::service::error::{at_stage, sqlite_at_stage, Stage, TrackingError, TrackingResult};
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

/// Caller-facing alert filter with a relative day window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub user_id: Option<String>,
    /// Only alerts from the last `days` days; `None` means all time.
    pub days: Option<u32>,
    pub min_severity: Option<Severity>,
    pub unreviewed_only: bool,
}

impl AlertFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn unreviewed() -> Self {
        Self {
            unreviewed_only: true,
            ..Self::default()
        }
    }

    pub fn within_days(mut self, days: u32) -> Self {
        self.days = Some(days);
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn unreviewed_only(mut self) -> Self {
        self.unreviewed_only = true;
        self
    }

    /// Resolves the relative window against `now_ms`.
    pub fn to_query(&self, now_ms: i64) -> AlertQuery {
        AlertQuery {
            user_id: self.user_id.clone(),
            since_ms: self
                .days
                .map(|days| now_ms.saturating_sub(i64::from(days).saturating_mul(DAY_MS))),
            min_severity: self.min_severity,
            unreviewed_only: self.unreviewed_only,
        }
    }
}

/// Reviewer-side alert operations.
pub struct AlertReviewService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> AlertReviewService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Looks up one alert by id.
    pub fn get_alert(&self, alert_id: AlertId) -> TrackingResult<Alert> {
        let repo =
            SqliteAlertRepository::try_new(self.conn).map_err(at_stage(Stage::Query, None, None))?;
        repo.get_alert(alert_id)
            .map_err(at_stage(Stage::Query, None, None))?
            .ok_or_else(|| TrackingError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            })
    }

    pub fn mark_reviewed(&self, alert_id: AlertId) -> TrackingResult<()> {
        self.mark_many_reviewed(&[alert_id]).map(|_| ())
    }

    /// Marks every id reviewed in one transaction; any unknown id aborts the
    /// whole batch. Returns the number of alerts marked.
    pub fn mark_many_reviewed(&self, alert_ids: &[AlertId]) -> TrackingResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(sqlite_at_stage(Stage::Review, None, None))?;
        {
            let repo =
                SqliteAlertRepository::try_new(&tx).map_err(at_stage(Stage::Review, None, None))?;
            for alert_id in alert_ids {
                repo.mark_alert_reviewed(*alert_id)
                    .map_err(at_stage(Stage::Review, None, None))?;
            }
        }
        tx.commit()
            .map_err(sqlite_at_stage(Stage::Commit, None, None))?;

        info!(
            "event=alert_review module=alert status=ok count={}",
            alert_ids.len()
        );
        Ok(alert_ids.len())
    }
}
