//! Service-boundary error taxonomy.
//!
//! # Invariants
//! - Ingestion failures carry user id, assessment id and the failing stage.
//! - `DuplicateKey`/`NotFound` from repositories keep their semantic kind;
//!   every other repository failure becomes `PersistenceFailure`.

use crate::model::ValidationError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TrackingResult<T> = Result<T, TrackingError>;

/// Unit of work in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Begin,
    RegisterUser,
    InsertAssessment,
    RefreshBaselines,
    LoadBaselines,
    PersistAlerts,
    Commit,
    Query,
    Review,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::RegisterUser => "register_user",
            Self::InsertAssessment => "insert_assessment",
            Self::RefreshBaselines => "refresh_baselines",
            Self::LoadBaselines => "load_baselines",
            Self::PersistAlerts => "persist_alerts",
            Self::Commit => "commit",
            Self::Query => "query",
            Self::Review => "review",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum TrackingError {
    /// A direct lookup by id found nothing.
    NotFound { entity: &'static str, id: String },
    /// The assessment id is already taken; nothing was written.
    DuplicateKey {
        user_id: String,
        assessment_id: String,
    },
    InvalidInput(ValidationError),
    /// The store could not complete the unit of work; it was rolled back.
    PersistenceFailure {
        stage: Stage,
        user_id: Option<String>,
        assessment_id: Option<String>,
        source: RepoError,
    },
}

impl TrackingError {
    /// Stable code used in log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateKey { .. } => "duplicate_key",
            Self::InvalidInput(_) => "invalid_input",
            Self::PersistenceFailure { .. } => "persistence_failure",
        }
    }
}

impl Display for TrackingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::DuplicateKey {
                user_id,
                assessment_id,
            } => write!(
                f,
                "assessment `{assessment_id}` already exists (user `{user_id}`)"
            ),
            Self::InvalidInput(err) => write!(f, "invalid input: {err}"),
            Self::PersistenceFailure {
                stage,
                user_id,
                assessment_id,
                source,
            } => write!(
                f,
                "tracking store failed at stage `{stage}` (user={}, assessment={}): {source}",
                user_id.as_deref().unwrap_or("-"),
                assessment_id.as_deref().unwrap_or("-"),
            ),
        }
    }
}

impl Error for TrackingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput(err) => Some(err),
            Self::PersistenceFailure { source, .. } => Some(source),
            Self::NotFound { .. } | Self::DuplicateKey { .. } => None,
        }
    }
}

impl From<ValidationError> for TrackingError {
    fn from(value: ValidationError) -> Self {
        Self::InvalidInput(value)
    }
}

/// Builds a `map_err` adapter that attaches stage and ids to repository errors.
pub(crate) fn at_stage<'a>(
    stage: Stage,
    user_id: Option<&'a str>,
    assessment_id: Option<&'a str>,
) -> impl FnOnce(RepoError) -> TrackingError + 'a {
    move |err| match err {
        RepoError::NotFound { entity, id } => TrackingError::NotFound { entity, id },
        RepoError::DuplicateKey { id, .. } => TrackingError::DuplicateKey {
            user_id: user_id.unwrap_or_default().to_string(),
            assessment_id: id,
        },
        RepoError::Validation(err) => TrackingError::InvalidInput(err),
        other => TrackingError::PersistenceFailure {
            stage,
            user_id: user_id.map(str::to_string),
            assessment_id: assessment_id.map(str::to_string),
            source: other,
        },
    }
}

/// Adapter for raw SQLite errors (transaction begin/commit).
pub(crate) fn sqlite_at_stage<'a>(
    stage: Stage,
    user_id: Option<&'a str>,
    assessment_id: Option<&'a str>,
) -> impl FnOnce(rusqlite::Error) -> TrackingError + 'a {
    move |err| at_stage(stage, user_id, assessment_id)(RepoError::from(err))
}
