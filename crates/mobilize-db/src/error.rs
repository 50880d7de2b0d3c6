//! Database error types.

use mobilize_core::stage::TransitionError;
use mobilize_core::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-terminal job with the same kind and fingerprint exists.
    #[error("conflict: job {existing} is already active for this fingerprint")]
    Conflict { existing: JobId },

    #[error("job {0} is already terminal")]
    StaleJob(JobId),

    #[error("job {id} moved from version {expected} to {actual}")]
    VersionMismatch { id: JobId, expected: i64, actual: i64 },

    #[error("invalid transition for job {id}: {source}")]
    InvalidTransition {
        id: JobId,
        #[source]
        source: TransitionError,
    },

    /// A compare-and-set loop gave up after repeated concurrent writes.
    #[error("contention: {0}")]
    Contention(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    pub(crate) fn from_transition(id: JobId, err: TransitionError) -> Self {
        match err {
            TransitionError::Terminal => DbError::StaleJob(id),
            other => DbError::InvalidTransition { id, source: other },
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
