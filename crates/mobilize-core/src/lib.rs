//! Core domain types and traits for the mobilize build orchestrator.
//!
//! This crate contains:
//! - Job identifiers and fingerprints
//! - The job state machine and its append-only stage history
//! - Collaborator traits (conversion, generation, publishing, compiling)
//! - The client-facing status collapse

pub mod collaborator;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod job;
pub mod platform;
pub mod stage;
pub mod status;

pub use collaborator::Collaborators;
pub use error::{Error, ErrorKind, JobError, Result};
pub use fingerprint::Fingerprint;
pub use id::JobId;
pub use job::{FileSet, Job, JobInput, JobKind, JobState, Lease, NewJob, Workspace};
pub use platform::{Platform, PlatformSet};
pub use stage::{Stage, StageDelta, StageEntry, StageOutcome, Transition, TransitionError};
pub use status::{BuildStatus, JobStatusView, JobSummary};
