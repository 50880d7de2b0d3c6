//! Job orchestration for the mobilize build orchestrator.
//!
//! Admits jobs through the idempotency guard, drives them through their
//! stages under a lease, and applies the retry and backoff policy. Uses the
//! job store as the only shared state, so any number of workers (and server
//! processes) can run side by side.

pub mod backoff;
pub mod error;
pub mod guard;
pub mod lease;
pub mod orchestrator;
pub mod stages;
pub mod status;
pub mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use backoff::RetryPolicy;
pub use error::{OrchestratorError, OrchestratorResult};
pub use guard::{Admission, IdempotencyGuard};
pub use orchestrator::Orchestrator;
pub use stages::{StageError, StageExecutor, StageProgress};
pub use status::StatusService;
pub use worker::{Worker, WorkerPool};
