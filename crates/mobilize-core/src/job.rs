//! Build jobs and their state machine.
//!
//! A job's `state` is never written directly: every change goes through
//! [`Job::apply`], which appends one [`StageEntry`] and recomputes the state
//! from the whole history with [`JobState::replay`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::collaborator::{ChatMessage, CompileHandle, RepoRef};
use crate::stage::{Stage, StageEntry, StageOutcome, Transition, TransitionError};
use crate::{Error, Fingerprint, JobError, JobId, PlatformSet, Result};

/// Project files keyed by path.
pub type FileSet = BTreeMap<String, String>;

/// Which pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Uploaded archive → native project → repository → binaries.
    Conversion,
    /// Chat transcript → generated project → repository → binaries.
    AiGeneration,
    /// Assembled files → repository → binaries.
    Build,
    /// Assembled files → repository.
    Push,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Conversion => "conversion",
            JobKind::AiGeneration => "ai-generation",
            JobKind::Build => "build",
            JobKind::Push => "push",
        }
    }

    /// Stages this kind runs, in order.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            JobKind::Conversion => &[Stage::Convert, Stage::Publish, Stage::Compile],
            JobKind::AiGeneration => &[Stage::Generate, Stage::Publish, Stage::Compile],
            JobKind::Build => &[Stage::Publish, Stage::Compile],
            JobKind::Push => &[Stage::Publish],
        }
    }

    pub fn first_stage(&self) -> Stage {
        self.stages()[0]
    }

    pub fn final_stage(&self) -> Stage {
        self.stages()[self.stages().len() - 1]
    }

    pub fn is_final(&self, stage: Stage) -> bool {
        self.final_stage() == stage
    }

    pub fn stage_after(&self, stage: Stage) -> Option<Stage> {
        let stages = self.stages();
        stages
            .iter()
            .position(|s| *s == stage)
            .and_then(|idx| stages.get(idx + 1))
            .copied()
    }

    /// Whether the kind ends with a native compile.
    pub fn compiles(&self) -> bool {
        self.stages().contains(&Stage::Compile)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "conversion" => Ok(JobKind::Conversion),
            "ai-generation" => Ok(JobKind::AiGeneration),
            "build" => Ok(JobKind::Build),
            "push" => Ok(JobKind::Push),
            other => Err(Error::InvalidInput(format!("unknown job kind: {}", other))),
        }
    }
}

/// Position of a job in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Converting,
    Converted,
    Generating,
    Generated,
    Publishing,
    Published,
    Compiling,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Converting => "converting",
            JobState::Converted => "converted",
            JobState::Generating => "generating",
            JobState::Generated => "generated",
            JobState::Publishing => "publishing",
            JobState::Published => "published",
            JobState::Compiling => "compiling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// The stage in flight, for the `-ing` states.
    pub fn running_stage(&self) -> Option<Stage> {
        match self {
            JobState::Converting => Some(Stage::Convert),
            JobState::Generating => Some(Stage::Generate),
            JobState::Publishing => Some(Stage::Publish),
            JobState::Compiling => Some(Stage::Compile),
            _ => None,
        }
    }

    /// The stage just finished, for the resting states between stages.
    pub fn completed_stage(&self) -> Option<Stage> {
        match self {
            JobState::Converted => Some(Stage::Convert),
            JobState::Generated => Some(Stage::Generate),
            JobState::Published => Some(Stage::Publish),
            _ => None,
        }
    }

    /// Reconstruct the state from a stage history.
    pub fn replay(kind: JobKind, history: &[StageEntry]) -> JobState {
        let Some(last) = history.last() else {
            return JobState::Pending;
        };
        match last.outcome {
            StageOutcome::Started
            | StageOutcome::Submitted { .. }
            | StageOutcome::Retrying { .. } => last.stage.running_state(),
            StageOutcome::Succeeded if kind.is_final(last.stage) => JobState::Succeeded,
            StageOutcome::Succeeded => last.stage.completed_state(),
            StageOutcome::Failed { .. } => JobState::Failed,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client handed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobInput {
    Archive {
        file_name: String,
        #[serde(with = "hex_bytes")]
        archive: Vec<u8>,
    },
    Chat {
        messages: Vec<ChatMessage>,
        /// Files of an earlier job this session continues from.
        #[serde(default)]
        base_files: FileSet,
    },
    Files {
        files: FileSet,
        #[serde(default)]
        repo_name: Option<String>,
    },
}

impl JobInput {
    fn accepted_by(&self, kind: JobKind) -> bool {
        matches!(
            (kind, self),
            (JobKind::Conversion, JobInput::Archive { .. })
                | (JobKind::AiGeneration, JobInput::Chat { .. })
                | (JobKind::Build, JobInput::Files { .. })
                | (JobKind::Push, JobInput::Files { .. })
        )
    }
}

/// Everything the stages have produced so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub files: FileSet,
    #[serde(default)]
    pub repo: Option<RepoRef>,
    #[serde(default)]
    pub compile: Option<CompileHandle>,
    #[serde(default)]
    pub reply: Option<String>,
}

/// A worker's claim on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub owner: String,
    pub project_name: String,
    pub platforms: PlatformSet,
    pub input: JobInput,
    /// Client-supplied idempotency key; replaces the content hash when set.
    pub idempotency_key: Option<String>,
}

impl NewJob {
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.idempotency_key {
            Some(key) => {
                Fingerprint::from_client_key(self.kind, &self.owner, key, &self.platforms)
            }
            None => Fingerprint::derive(self.kind, &self.owner, &self.input, &self.platforms),
        }
    }
}

/// The unit of orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub fingerprint: Fingerprint,
    pub owner: String,
    pub project_name: String,
    pub platforms: PlatformSet,
    pub input: JobInput,
    pub state: JobState,
    pub stage_history: Vec<StageEntry>,
    pub workspace: Workspace,
    pub artifacts: BTreeMap<String, String>,
    pub last_error: Option<JobError>,
    pub attempts: BTreeMap<Stage, u32>,
    pub cancel_requested: bool,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub version: i64,
    #[serde(default)]
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Validate a creation request and build the job in `Pending`.
    pub fn new(request: NewJob, now: DateTime<Utc>) -> Result<Self> {
        if request.project_name.trim().is_empty() {
            return Err(Error::InvalidInput("project name is required".to_string()));
        }
        if request.owner.trim().is_empty() {
            return Err(Error::InvalidInput("owner is required".to_string()));
        }
        if !request.input.accepted_by(request.kind) {
            return Err(Error::InvalidInput(format!(
                "{} jobs cannot take this input",
                request.kind
            )));
        }
        if request.kind.compiles() && request.platforms.is_empty() {
            return Err(Error::InvalidInput(
                "at least one platform is required".to_string(),
            ));
        }
        match &request.input {
            JobInput::Archive { archive, .. } if archive.is_empty() => {
                return Err(Error::InvalidInput("archive is empty".to_string()));
            }
            JobInput::Chat { messages, .. } if messages.is_empty() => {
                return Err(Error::InvalidInput("transcript is empty".to_string()));
            }
            JobInput::Files { files, .. } if files.is_empty() => {
                return Err(Error::InvalidInput("no files to build".to_string()));
            }
            _ => {}
        }

        let fingerprint = request.fingerprint();
        let workspace = match &request.input {
            JobInput::Chat { base_files, .. } => Workspace {
                files: base_files.clone(),
                ..Workspace::default()
            },
            JobInput::Files { files, .. } => Workspace {
                files: files.clone(),
                ..Workspace::default()
            },
            JobInput::Archive { .. } => Workspace::default(),
        };

        Ok(Self {
            id: JobId::new(),
            kind: request.kind,
            fingerprint,
            owner: request.owner,
            project_name: request.project_name,
            platforms: request.platforms,
            input: request.input,
            state: JobState::Pending,
            stage_history: Vec::new(),
            workspace,
            artifacts: BTreeMap::new(),
            last_error: None,
            attempts: BTreeMap::new(),
            cancel_requested: false,
            next_attempt_at: None,
            version: 0,
            lease: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The stage the next transition must name: the one in flight, or the
    /// one about to start. `None` once terminal.
    pub fn active_stage(&self) -> Option<Stage> {
        if self.state.is_terminal() {
            return None;
        }
        if let Some(stage) = self.state.running_stage() {
            return Some(stage);
        }
        match self.state.completed_stage() {
            Some(done) => self.kind.stage_after(done),
            None => Some(self.kind.first_stage()),
        }
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Whether the backoff gate lets the job run at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Whether another worker currently holds the job.
    pub fn is_leased_by_other(&self, worker: &str, now: DateTime<Utc>) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|lease| lease.owner != worker && lease.is_live(now))
    }

    /// When the stage currently in flight was entered.
    fn stage_entered_at(&self, stage: Stage) -> Option<DateTime<Utc>> {
        self.stage_history
            .iter()
            .rev()
            .take_while(|entry| entry.stage == stage)
            .last()
            .map(|entry| entry.entered_at)
    }

    /// Apply a transition: validate it against the current state, append it
    /// to the history, fold its delta into the job, and bump the version.
    pub fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), TransitionError> {
        let expected = self.active_stage().ok_or(TransitionError::Terminal)?;
        if transition.stage != expected {
            return Err(TransitionError::UnexpectedStage {
                expected,
                actual: transition.stage,
            });
        }

        let stage = transition.stage;
        let running = self.state.running_stage().is_some();
        let invalid = || TransitionError::InvalidOutcome {
            stage,
            state: self.state,
            outcome: transition.outcome.name(),
        };

        let allowed = match &transition.outcome {
            StageOutcome::Started => !running,
            StageOutcome::Submitted { .. } => running && stage == Stage::Compile,
            StageOutcome::Succeeded | StageOutcome::Retrying { .. } => running,
            StageOutcome::Failed { .. } => true,
        };
        if !allowed {
            return Err(invalid());
        }

        let completes_job =
            matches!(transition.outcome, StageOutcome::Succeeded) && self.kind.is_final(stage);
        if completes_job && transition.delta.artifacts.is_empty() {
            return Err(TransitionError::Artifacts(format!(
                "final stage {} must produce artifacts",
                stage
            )));
        }
        if !completes_job && !transition.delta.artifacts.is_empty() {
            return Err(TransitionError::Artifacts(
                "artifacts are only recorded when the job succeeds".to_string(),
            ));
        }

        let entered_at = if running {
            self.stage_entered_at(stage).unwrap_or(now)
        } else {
            now
        };
        let exited_at = transition.outcome.ends_attempt().then_some(now);

        match &transition.outcome {
            StageOutcome::Started => {
                self.next_attempt_at = None;
            }
            StageOutcome::Submitted { .. } | StageOutcome::Succeeded => {
                self.next_attempt_at = None;
                let delta = transition.delta;
                if let Some(files) = delta.files {
                    self.workspace.files = files;
                }
                if let Some(repo) = delta.repo {
                    self.workspace.repo = Some(repo);
                }
                if let Some(compile) = delta.compile {
                    self.workspace.compile = Some(compile);
                }
                if let Some(reply) = delta.reply {
                    self.workspace.reply = Some(reply);
                }
                self.artifacts.extend(delta.artifacts);
            }
            StageOutcome::Retrying {
                attempt,
                error,
                retry_at,
            } => {
                self.record_attempt(stage, *attempt);
                self.last_error = Some(error.clone());
                self.next_attempt_at = Some(*retry_at);
            }
            StageOutcome::Failed { error, attempt } => {
                self.record_attempt(stage, *attempt);
                self.last_error = Some(error.clone());
                self.next_attempt_at = None;
            }
        }

        self.stage_history.push(StageEntry {
            stage,
            entered_at,
            exited_at,
            outcome: transition.outcome,
        });
        self.state = JobState::replay(self.kind, &self.stage_history);
        self.updated_at = now;
        self.version += 1;
        Ok(())
    }

    fn record_attempt(&mut self, stage: Stage, attempt: u32) {
        if attempt > 0 {
            let count = self.attempts.entry(stage).or_insert(0);
            *count = (*count).max(attempt);
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
