//! External collaborator traits.
//!
//! Every pipeline stage calls exactly one of these services. Implementations
//! live in `mobilize-clients`; tests use in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::job::{FileSet, JobKind};
use crate::stage::Stage;
use crate::{ErrorKind, Platform, PlatformSet};

/// Failure reported by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("input rejected: {0}")]
    InvalidInput(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    /// Transient failures are worth another attempt; everything else means
    /// the same input will fail the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Timeout(_)
                | CollaboratorError::Unavailable(_)
                | CollaboratorError::RateLimited(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CollaboratorError::Timeout(_) => ErrorKind::Timeout,
            CollaboratorError::Unavailable(_) => ErrorKind::Unavailable,
            CollaboratorError::RateLimited(_) => ErrorKind::RateLimited,
            CollaboratorError::Auth(_) => ErrorKind::Auth,
            CollaboratorError::InvalidInput(_) => ErrorKind::InvalidInput,
            CollaboratorError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// One message of an AI chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Files and assistant reply produced by the code generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub files: FileSet,
    pub reply: String,
}

/// Where a file set was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub repo_url: String,
    /// `owner/name` as the VCS host knows it.
    pub full_name: String,
    pub commit_id: String,
}

/// Handle to a compile job running on the compile service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileHandle {
    pub compile_job_id: String,
    pub status_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Result of polling a compile job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilePoll {
    pub state: CompileState,
    #[serde(default)]
    pub artifact_urls: BTreeMap<Platform, String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Turns an uploaded web-app archive into native project sources.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn convert(&self, file_name: &str, archive: &[u8]) -> CollaboratorResult<FileSet>;
}

/// Turns a chat transcript into generated or updated files.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `files` is the current project, which the generator may update.
    async fn generate(
        &self,
        transcript: &[ChatMessage],
        files: &FileSet,
    ) -> CollaboratorResult<GenerationOutput>;
}

/// Pushes a file set to a remote repository.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, files: &FileSet, repo_name: &str) -> CollaboratorResult<RepoRef>;
}

/// Builds native binaries from a published repository.
#[async_trait]
pub trait CompileService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start_compile(
        &self,
        repo: &RepoRef,
        platforms: &PlatformSet,
    ) -> CollaboratorResult<CompileHandle>;

    async fn poll_compile(&self, handle: &CompileHandle) -> CollaboratorResult<CompilePoll>;
}

/// The collaborators a deployment has configured. A missing entry means the
/// stages that need it cannot run.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub conversion: Option<Arc<dyn ConversionEngine>>,
    pub generation: Option<Arc<dyn CodeGenerator>>,
    pub publisher: Option<Arc<dyn Publisher>>,
    pub compile: Option<Arc<dyn CompileService>>,
}

impl Collaborators {
    fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Convert => self.conversion.is_some(),
            Stage::Generate => self.generation.is_some(),
            Stage::Publish => self.publisher.is_some(),
            Stage::Compile => self.compile.is_some(),
        }
    }

    /// Stages of `kind` that have no collaborator configured.
    pub fn missing_for(&self, kind: JobKind) -> Vec<Stage> {
        kind.stages()
            .iter()
            .copied()
            .filter(|stage| !self.has(*stage))
            .collect()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("conversion", &self.conversion.as_ref().map(|c| c.name()))
            .field("generation", &self.generation.as_ref().map(|c| c.name()))
            .field("publisher", &self.publisher.as_ref().map(|c| c.name()))
            .field("compile", &self.compile.as_ref().map(|c| c.name()))
            .finish()
    }
}
