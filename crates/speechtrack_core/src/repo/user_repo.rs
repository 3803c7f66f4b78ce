//! User repository contracts and SQLite implementation.
//!
//! # Invariants
//! - `upsert_user` merges: only `Some` fields overwrite stored values.
//! - Users are never deleted.

use crate::model::user::{User, UserId, UserProfile, UserSummary};
use crate::repo::{ensure_tracking_connection_ready, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Repository interface for the user registry.
pub trait UserRepository {
    /// Inserts the user if absent, else merges non-null fields.
    fn upsert_user(&self, profile: &UserProfile, now_ms: i64) -> RepoResult<UserId>;
    /// Inserts a bare user row when missing. Returns whether a row was created.
    fn ensure_user(&self, user_id: &str, now_ms: i64) -> RepoResult<bool>;
    fn get_user(&self, user_id: &str) -> RepoResult<Option<User>>;
    /// Users with assessment counts, most recently assessed first.
    fn list_user_summaries(&self) -> RepoResult<Vec<UserSummary>>;
}

/// SQLite-backed user repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_tracking_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn upsert_user(&self, profile: &UserProfile, now_ms: i64) -> RepoResult<UserId> {
        profile.validate()?;

        self.conn.execute(
            "INSERT INTO users (user_id, name, age, gender, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                name = COALESCE(excluded.name, users.name),
                age = COALESCE(excluded.age, users.age),
                gender = COALESCE(excluded.gender, users.gender),
                notes = COALESCE(excluded.notes, users.notes);",
            params![
                profile.user_id.as_str(),
                profile.name.as_deref(),
                profile.age,
                profile.gender.as_deref(),
                profile.notes.as_deref(),
                now_ms,
            ],
        )?;

        Ok(profile.user_id.clone())
    }

    fn ensure_user(&self, user_id: &str, now_ms: i64) -> RepoResult<bool> {
        crate::model::require_user_id(user_id)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2);",
            params![user_id, now_ms],
        )?;
        Ok(inserted == 1)
    }

    fn get_user(&self, user_id: &str) -> RepoResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, name, age, gender, notes, created_at
                 FROM users
                 WHERE user_id = ?1;",
                [user_id],
                parse_user_row,
            )
            .optional()?;
        Ok(user)
    }

    fn list_user_summaries(&self) -> RepoResult<Vec<UserSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                u.user_id,
                u.name,
                u.age,
                u.gender,
                COUNT(a.assessment_id) AS assessment_count,
                MAX(a.recorded_at) AS last_assessment_at
             FROM users u
             LEFT JOIN assessments a ON a.user_id = u.user_id
             GROUP BY u.user_id
             ORDER BY last_assessment_at IS NULL ASC, last_assessment_at DESC, u.user_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get("assessment_count")?;
            summaries.push(UserSummary {
                user_id: row.get("user_id")?,
                name: row.get("name")?,
                age: row.get("age")?,
                gender: row.get("gender")?,
                assessment_count: u32::try_from(count).map_err(|_| {
                    RepoError::InvalidData(format!("invalid assessment count `{count}`"))
                })?,
                last_assessment_at: row.get("last_assessment_at")?,
            });
        }
        Ok(summaries)
    }
}

fn parse_user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        age: row.get("age")?,
        gender: row.get("gender")?,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
    })
}
