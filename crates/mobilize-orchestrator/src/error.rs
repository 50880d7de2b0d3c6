//! Orchestrator error types.

use mobilize_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] mobilize_core::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
