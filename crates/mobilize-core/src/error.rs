//! Error types for mobilize.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::JobId;
use crate::stage::Stage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: job {existing} is already active for this fingerprint")]
    Conflict { existing: JobId },

    #[error("job {0} is already terminal")]
    StaleJob(JobId),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed attempt, persisted with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Unavailable,
    RateLimited,
    InvalidInput,
    /// A collaborator answered with something we could not interpret.
    InvalidResponse,
    EmptyOutput,
    Auth,
    BuildFailed,
    Cancelled,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::EmptyOutput => "empty_output",
            ErrorKind::Auth => "auth",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a job: what went wrong, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: Option<Stage>,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, stage: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn cancelled(stage: Option<Stage>) -> Self {
        Self::new(ErrorKind::Cancelled, stage, "cancelled")
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "{} failed ({}): {}", stage, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
