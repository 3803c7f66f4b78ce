//! User registry use-cases.

use crate::model::user::{User, UserId, UserProfile, UserSummary};
use crate::repo::user_repo::{SqliteUserRepository, UserRepository};
use crate::service::clock::{Clock, SystemClock};
use crate::service::error::{at_stage, Stage, TrackingError, TrackingResult};
use log::info;
use rusqlite::Connection;

pub struct UserRegistry<'conn, C: Clock = SystemClock> {
    conn: &'conn Connection,
    clock: C,
}

impl<'conn> UserRegistry<'conn, SystemClock> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            clock: SystemClock,
        }
    }
}

impl<'conn, C: Clock> UserRegistry<'conn, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> UserRegistry<'conn, C2> {
        UserRegistry {
            conn: self.conn,
            clock,
        }
    }

    /// Registers a user or merges the non-null fields into the stored row.
    pub fn register_user(&self, profile: &UserProfile) -> TrackingResult<UserId> {
        let user_id = profile.user_id.as_str();
        let repo = SqliteUserRepository::try_new(self.conn)
            .map_err(at_stage(Stage::RegisterUser, Some(user_id), None))?;
        let registered = repo
            .upsert_user(profile, self.clock.now_ms())
            .map_err(at_stage(Stage::RegisterUser, Some(user_id), None))?;
        info!(
            "event=user_register module=user status=ok user_id={}",
            registered
        );
        Ok(registered)
    }

    pub fn get_user(&self, user_id: &str) -> TrackingResult<User> {
        let repo = SqliteUserRepository::try_new(self.conn)
            .map_err(at_stage(Stage::Query, Some(user_id), None))?;
        repo.get_user(user_id)
            .map_err(at_stage(Stage::Query, Some(user_id), None))?
            .ok_or_else(|| TrackingError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            })
    }

    /// All users with assessment counts, most recently assessed first.
    pub fn list_users(&self) -> TrackingResult<Vec<UserSummary>> {
        let repo =
            SqliteUserRepository::try_new(self.conn).map_err(at_stage(Stage::Query, None, None))?;
        repo.list_user_summaries()
            .map_err(at_stage(Stage::Query, None, None))
    }
}
