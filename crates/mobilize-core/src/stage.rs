//! Pipeline stages and the append-only stage history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::JobError;
use crate::collaborator::{CompileHandle, RepoRef};
use crate::job::{FileSet, JobState};

/// One phase of a job's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Convert,
    Generate,
    Publish,
    Compile,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Convert => "convert",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
            Stage::Compile => "compile",
        }
    }

    /// State a job is in while this stage is in flight.
    pub fn running_state(&self) -> JobState {
        match self {
            Stage::Convert => JobState::Converting,
            Stage::Generate => JobState::Generating,
            Stage::Publish => JobState::Publishing,
            Stage::Compile => JobState::Compiling,
        }
    }

    /// State a job rests in after this stage finished, when more stages follow.
    pub fn completed_state(&self) -> JobState {
        match self {
            Stage::Convert => JobState::Converted,
            Stage::Generate => JobState::Generated,
            Stage::Publish => JobState::Published,
            Stage::Compile => JobState::Succeeded,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened at a stage. Each history entry carries exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage was entered; its collaborator is about to be called.
    Started,
    /// An asynchronous stage was accepted by its collaborator and is being polled.
    Submitted { reference: String },
    /// The stage produced its output.
    Succeeded,
    /// A retryable failure; the stage runs again at `retry_at`.
    Retrying {
        attempt: u32,
        error: JobError,
        retry_at: DateTime<Utc>,
    },
    /// The job failed at this stage. `attempt` is zero when no collaborator
    /// call was charged (cancellation, job deadline).
    Failed {
        error: JobError,
        #[serde(default)]
        attempt: u32,
    },
}

impl StageOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            StageOutcome::Started => "started",
            StageOutcome::Submitted { .. } => "submitted",
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::Retrying { .. } => "retrying",
            StageOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the attempt this entry records is over. A retry closes the
    /// attempt even though the job stays on the stage.
    pub fn ends_attempt(&self) -> bool {
        !matches!(self, StageOutcome::Started | StageOutcome::Submitted { .. })
    }
}

/// One entry of a job's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Output a stage hands to the job when its transition is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, String>,
}

/// A state change requested against a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub delta: StageDelta,
}

impl Transition {
    pub fn started(stage: Stage) -> Self {
        Self::bare(stage, StageOutcome::Started)
    }

    pub fn submitted(stage: Stage, reference: impl Into<String>, delta: StageDelta) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Submitted {
                reference: reference.into(),
            },
            delta,
        }
    }

    pub fn succeeded(stage: Stage, delta: StageDelta) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Succeeded,
            delta,
        }
    }

    pub fn retrying(stage: Stage, attempt: u32, error: JobError, retry_at: DateTime<Utc>) -> Self {
        Self::bare(
            stage,
            StageOutcome::Retrying {
                attempt,
                error,
                retry_at,
            },
        )
    }

    pub fn failed(stage: Stage, error: JobError, attempt: u32) -> Self {
        Self::bare(stage, StageOutcome::Failed { error, attempt })
    }

    fn bare(stage: Stage, outcome: StageOutcome) -> Self {
        Self {
            stage,
            outcome,
            delta: StageDelta::default(),
        }
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already terminal")]
    Terminal,

    #[error("expected a transition for stage {expected}, got {actual}")]
    UnexpectedStage { expected: Stage, actual: Stage },

    #[error("{outcome} is not valid for stage {stage} in state {state}")]
    InvalidOutcome {
        stage: Stage,
        state: JobState,
        outcome: &'static str,
    },

    #[error("{0}")]
    Artifacts(String),
}
