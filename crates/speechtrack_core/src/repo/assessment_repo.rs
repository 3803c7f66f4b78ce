//! Assessment/feature repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist one assessment together with its numeric feature rows.
//! - Serve the measurement reads the baseline estimator and history
//!   queries are built on.
//!
//! # Invariants
//! - `insert_assessment` writes the assessment row before any feature row.
//! - Ascending reads order by `recorded_at`, then feature insertion order;
//!   descending reads are the exact reverse.
//! - All reads are scoped to one user; nothing here aggregates across users.

use crate::model::assessment::{
    Assessment, AssessmentId, FeatureMeasurement, MeasurementRow, TimeRange,
};
use crate::repo::{ensure_tracking_connection_ready, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Filter for history/measurement reads.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementQuery {
    pub user_id: String,
    /// Empty means every feature.
    pub feature_names: Vec<String>,
    pub range: TimeRange,
}

/// Repository interface for assessments and their feature measurements.
pub trait AssessmentRepository {
    /// Inserts the assessment and its features. Fails with `DuplicateKey`
    /// when the assessment id is taken.
    fn insert_assessment(
        &self,
        assessment: &Assessment,
        features: &[FeatureMeasurement],
    ) -> RepoResult<AssessmentId>;
    fn get_assessment(&self, assessment_id: &str) -> RepoResult<Option<Assessment>>;
    fn list_features(&self, assessment_id: &str) -> RepoResult<Vec<FeatureMeasurement>>;
    fn count_assessments(&self, user_id: &str) -> RepoResult<u32>;
    /// Feature names with at least `min_count` measurements for the user,
    /// sorted by name.
    fn feature_counts(&self, user_id: &str, min_count: u32) -> RepoResult<Vec<(String, u32)>>;
    /// Newest-first values of one feature, at most `limit`.
    fn recent_feature_values(
        &self,
        user_id: &str,
        feature_name: &str,
        limit: u32,
    ) -> RepoResult<Vec<f64>>;
    fn query_measurements(&self, query: &MeasurementQuery) -> RepoResult<Vec<MeasurementRow>>;
}

/// SQLite-backed assessment repository.
pub struct SqliteAssessmentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAssessmentRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_tracking_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn assessment_exists(&self, assessment_id: &str) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM assessments WHERE assessment_id = ?1);",
            [assessment_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

impl AssessmentRepository for SqliteAssessmentRepository<'_> {
    fn insert_assessment(
        &self,
        assessment: &Assessment,
        features: &[FeatureMeasurement],
    ) -> RepoResult<AssessmentId> {
        assessment.validate()?;

        if self.assessment_exists(&assessment.assessment_id)? {
            return Err(RepoError::DuplicateKey {
                entity: "assessment",
                id: assessment.assessment_id.clone(),
            });
        }

        self.conn.execute(
            "INSERT INTO assessments (
                assessment_id,
                user_id,
                task_type,
                recorded_at,
                audio_path,
                transcript,
                risk_score
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                assessment.assessment_id.as_str(),
                assessment.user_id.as_str(),
                assessment.task_type,
                assessment.recorded_at,
                assessment.audio_path.as_deref(),
                assessment.transcript.as_deref(),
                assessment.risk_score,
            ],
        )?;

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO assessment_features (assessment_id, feature_name, feature_value)
             VALUES (?1, ?2, ?3);",
        )?;
        for feature in features {
            stmt.execute(params![
                assessment.assessment_id.as_str(),
                feature.feature_name.as_str(),
                feature.value,
            ])?;
        }

        Ok(assessment.assessment_id.clone())
    }

    fn get_assessment(&self, assessment_id: &str) -> RepoResult<Option<Assessment>> {
        let assessment = self
            .conn
            .query_row(
                "SELECT
                    assessment_id,
                    user_id,
                    task_type,
                    recorded_at,
                    audio_path,
                    transcript,
                    risk_score
                 FROM assessments
                 WHERE assessment_id = ?1;",
                [assessment_id],
                parse_assessment_row,
            )
            .optional()?;
        Ok(assessment)
    }

    fn list_features(&self, assessment_id: &str) -> RepoResult<Vec<FeatureMeasurement>> {
        let mut stmt = self.conn.prepare(
            "SELECT feature_name, feature_value
             FROM assessment_features
             WHERE assessment_id = ?1
             ORDER BY feature_name ASC;",
        )?;
        let mut rows = stmt.query([assessment_id])?;
        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            features.push(FeatureMeasurement {
                feature_name: row.get("feature_name")?,
                value: row.get("feature_value")?,
            });
        }
        Ok(features)
    }

    fn count_assessments(&self, user_id: &str) -> RepoResult<u32> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM assessments WHERE user_id = ?1;",
            [user_id],
            |row| row.get(0),
        )?;
        to_count(count)
    }

    fn feature_counts(&self, user_id: &str, min_count: u32) -> RepoResult<Vec<(String, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT af.feature_name, COUNT(*) AS measurement_count
             FROM assessment_features af
             INNER JOIN assessments a ON a.assessment_id = af.assessment_id
             WHERE a.user_id = ?1
             GROUP BY af.feature_name
             HAVING measurement_count >= ?2
             ORDER BY af.feature_name ASC;",
        )?;
        let mut rows = stmt.query(params![user_id, min_count])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get("measurement_count")?;
            counts.push((row.get("feature_name")?, to_count(count)?));
        }
        Ok(counts)
    }

    fn recent_feature_values(
        &self,
        user_id: &str,
        feature_name: &str,
        limit: u32,
    ) -> RepoResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT af.feature_value
             FROM assessment_features af
             INNER JOIN assessments a ON a.assessment_id = af.assessment_id
             WHERE a.user_id = ?1
               AND af.feature_name = ?2
             ORDER BY a.recorded_at DESC, af.feature_id DESC
             LIMIT ?3;",
        )?;
        let mut rows = stmt.query(params![user_id, feature_name, limit])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(row.get(0)?);
        }
        Ok(values)
    }

    fn query_measurements(&self, query: &MeasurementQuery) -> RepoResult<Vec<MeasurementRow>> {
        let mut sql = String::from(
            "SELECT
                a.assessment_id,
                a.recorded_at,
                a.task_type,
                a.risk_score,
                af.feature_name,
                af.feature_value
             FROM assessments a
             INNER JOIN assessment_features af ON af.assessment_id = a.assessment_id
             WHERE a.user_id = ?
               AND a.recorded_at BETWEEN ? AND ?",
        );
        let mut bind_values: Vec<Value> = vec![
            Value::Text(query.user_id.clone()),
            Value::Integer(query.range.start_ms),
            Value::Integer(query.range.end_ms),
        ];

        if !query.feature_names.is_empty() {
            let placeholders = vec!["?"; query.feature_names.len()].join(", ");
            sql.push_str(&format!(" AND af.feature_name IN ({placeholders})"));
            bind_values.extend(
                query
                    .feature_names
                    .iter()
                    .map(|name| Value::Text(name.clone())),
            );
        }

        sql.push_str(" ORDER BY a.recorded_at ASC, af.feature_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut measurements = Vec::new();
        while let Some(row) = rows.next()? {
            measurements.push(MeasurementRow {
                assessment_id: row.get("assessment_id")?,
                recorded_at: row.get("recorded_at")?,
                task_type: row.get("task_type")?,
                risk_score: row.get("risk_score")?,
                feature_name: row.get("feature_name")?,
                value: row.get("feature_value")?,
            });
        }
        Ok(measurements)
    }
}

fn parse_assessment_row(row: &Row<'_>) -> rusqlite::Result<Assessment> {
    Ok(Assessment {
        assessment_id: row.get("assessment_id")?,
        user_id: row.get("user_id")?,
        task_type: row.get("task_type")?,
        recorded_at: row.get("recorded_at")?,
        audio_path: row.get("audio_path")?,
        transcript: row.get("transcript")?,
        risk_score: row.get("risk_score")?,
    })
}

fn to_count(value: i64) -> RepoResult<u32> {
    u32::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid row count `{value}`")))
}
