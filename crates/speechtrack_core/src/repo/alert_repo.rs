//! Alert repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Listing order is `severity DESC, created_at DESC, alert_id DESC`.
//! - Only `is_reviewed` is ever updated after insert.

use crate::model::alert::{Alert, AlertId, AlertRecord, NewAlert, Severity};
use crate::repo::{
    bool_to_int, ensure_tracking_connection_ready, int_to_bool, RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Filter for alert listings. Every field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertQuery {
    pub user_id: Option<String>,
    /// Only alerts created at or after this epoch-ms timestamp.
    pub since_ms: Option<i64>,
    pub min_severity: Option<Severity>,
    pub unreviewed_only: bool,
}

/// Repository interface for deviation alerts.
pub trait AlertRepository {
    /// Inserts alerts in order and returns them with assigned ids.
    fn insert_alerts(&self, alerts: &[NewAlert], created_at: i64) -> RepoResult<Vec<Alert>>;
    fn get_alert(&self, alert_id: AlertId) -> RepoResult<Option<Alert>>;
    fn query_alerts(&self, query: &AlertQuery) -> RepoResult<Vec<AlertRecord>>;
    /// Sets the reviewed flag. Fails with `NotFound` for unknown ids.
    fn mark_alert_reviewed(&self, alert_id: AlertId) -> RepoResult<()>;
}

/// SQLite-backed alert repository.
pub struct SqliteAlertRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAlertRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_tracking_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl AlertRepository for SqliteAlertRepository<'_> {
    fn insert_alerts(&self, alerts: &[NewAlert], created_at: i64) -> RepoResult<Vec<Alert>> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO alerts (
                user_id,
                assessment_id,
                feature_name,
                deviation_value,
                severity,
                created_at,
                is_reviewed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0);",
        )?;

        let mut stored = Vec::with_capacity(alerts.len());
        for alert in alerts {
            stmt.execute(params![
                alert.user_id.as_str(),
                alert.assessment_id.as_str(),
                alert.feature_name.as_str(),
                alert.deviation,
                alert.severity.level(),
                created_at,
            ])?;
            stored.push(Alert {
                alert_id: self.conn.last_insert_rowid(),
                user_id: alert.user_id.clone(),
                assessment_id: alert.assessment_id.clone(),
                feature_name: alert.feature_name.clone(),
                deviation: alert.deviation,
                severity: alert.severity,
                created_at,
                is_reviewed: false,
            });
        }
        Ok(stored)
    }

    fn get_alert(&self, alert_id: AlertId) -> RepoResult<Option<Alert>> {
        let alert = self
            .conn
            .query_row(
                "SELECT
                    alert_id,
                    user_id,
                    assessment_id,
                    feature_name,
                    deviation_value,
                    severity,
                    created_at,
                    is_reviewed
                 FROM alerts
                 WHERE alert_id = ?1;",
                [alert_id],
                |row| Ok(parse_alert_row(row)),
            )
            .optional()?;
        alert.transpose()
    }

    fn query_alerts(&self, query: &AlertQuery) -> RepoResult<Vec<AlertRecord>> {
        let mut sql = String::from(
            "SELECT
                al.alert_id,
                al.user_id,
                u.name AS user_name,
                al.assessment_id,
                al.feature_name,
                al.deviation_value,
                al.severity,
                al.created_at,
                al.is_reviewed
             FROM alerts al
             INNER JOIN users u ON u.user_id = al.user_id
             WHERE 1 = 1",
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(user_id) = query.user_id.as_ref() {
            sql.push_str(" AND al.user_id = ?");
            bind_values.push(Value::Text(user_id.clone()));
        }

        if let Some(since_ms) = query.since_ms {
            sql.push_str(" AND al.created_at >= ?");
            bind_values.push(Value::Integer(since_ms));
        }

        if let Some(min_severity) = query.min_severity {
            sql.push_str(" AND al.severity >= ?");
            bind_values.push(Value::Integer(min_severity.level()));
        }

        if query.unreviewed_only {
            sql.push_str(" AND al.is_reviewed = 0");
        }

        sql.push_str(" ORDER BY al.severity DESC, al.created_at DESC, al.alert_id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(AlertRecord {
                alert: parse_alert_row(row)?,
                user_name: row.get("user_name")?,
            });
        }
        Ok(records)
    }

    fn mark_alert_reviewed(&self, alert_id: AlertId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE alerts SET is_reviewed = ?2 WHERE alert_id = ?1;",
            params![alert_id, bool_to_int(true)],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            });
        }

        Ok(())
    }
}

fn parse_alert_row(row: &Row<'_>) -> RepoResult<Alert> {
    let level: i64 = row.get("severity")?;
    let severity = Severity::from_level(level).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid severity `{level}` in alerts.severity"))
    })?;

    Ok(Alert {
        alert_id: row.get("alert_id")?,
        user_id: row.get("user_id")?,
        assessment_id: row.get("assessment_id")?,
        feature_name: row.get("feature_name")?,
        deviation: row.get("deviation_value")?,
        severity,
        created_at: row.get("created_at")?,
        is_reviewed: int_to_bool(row.get("is_reviewed")?, "alerts.is_reviewed")?,
    })
}
