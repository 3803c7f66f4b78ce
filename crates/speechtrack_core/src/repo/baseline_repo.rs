//! Baseline repository contracts and SQLite implementation.
//!
//! # Invariants
//! - At most one row per (user, feature); `replace_baseline` overwrites it
//!   wholesale in a single statement.

use crate::model::baseline::Baseline;
use crate::repo::{ensure_tracking_connection_ready, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const BASELINE_SELECT_SQL: &str = "SELECT
    user_id,
    feature_name,
    baseline_value,
    upper_threshold,
    lower_threshold,
    sample_size,
    last_updated
FROM user_baselines";

/// Repository interface for per-user baselines.
pub trait BaselineRepository {
    fn get_baseline(&self, user_id: &str, feature_name: &str) -> RepoResult<Option<Baseline>>;
    /// All baselines of one user, sorted by feature name.
    fn list_baselines(&self, user_id: &str) -> RepoResult<Vec<Baseline>>;
    fn replace_baseline(&self, baseline: &Baseline) -> RepoResult<()>;
}

/// SQLite-backed baseline repository.
pub struct SqliteBaselineRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBaselineRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_tracking_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl BaselineRepository for SqliteBaselineRepository<'_> {
    fn get_baseline(&self, user_id: &str, feature_name: &str) -> RepoResult<Option<Baseline>> {
        let baseline = self
            .conn
            .query_row(
                &format!("{BASELINE_SELECT_SQL} WHERE user_id = ?1 AND feature_name = ?2;"),
                params![user_id, feature_name],
                |row| Ok(parse_baseline_row(row)),
            )
            .optional()?;
        baseline.transpose()
    }

    fn list_baselines(&self, user_id: &str) -> RepoResult<Vec<Baseline>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BASELINE_SELECT_SQL} WHERE user_id = ?1 ORDER BY feature_name ASC;"
        ))?;
        let mut rows = stmt.query([user_id])?;
        let mut baselines = Vec::new();
        while let Some(row) = rows.next()? {
            baselines.push(parse_baseline_row(row)?);
        }
        Ok(baselines)
    }

    fn replace_baseline(&self, baseline: &Baseline) -> RepoResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO user_baselines (
                user_id,
                feature_name,
                baseline_value,
                upper_threshold,
                lower_threshold,
                sample_size,
                last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                baseline.user_id.as_str(),
                baseline.feature_name.as_str(),
                baseline.central,
                baseline.upper,
                baseline.lower,
                baseline.sample_size,
                baseline.updated_at,
            ],
        )?;
        Ok(())
    }
}

fn parse_baseline_row(row: &Row<'_>) -> RepoResult<Baseline> {
    let baseline = Baseline {
        user_id: row.get("user_id")?,
        feature_name: row.get("feature_name")?,
        central: row.get("baseline_value")?,
        upper: row.get("upper_threshold")?,
        lower: row.get("lower_threshold")?,
        sample_size: row.get("sample_size")?,
        updated_at: row.get("last_updated")?,
    };
    if baseline.upper < baseline.lower {
        return Err(RepoError::InvalidData(format!(
            "baseline for `{}`/`{}` has upper threshold below lower threshold",
            baseline.user_id, baseline.feature_name
        )));
    }
    Ok(baseline)
}
