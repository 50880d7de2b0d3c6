//! Stage executors.
//!
//! Each executor calls exactly one collaborator and turns its answer into a
//! progress report or a classified error. Executors never write to the
//! store; the orchestrator decides what to persist.

use async_trait::async_trait;
use mobilize_core::collaborator::{
    CodeGenerator, CollaboratorError, Collaborators, CompileService, CompileState,
    ConversionEngine, Publisher,
};
use mobilize_core::stage::StageDelta;
use mobilize_core::{ErrorKind, Job, JobError, JobInput, JobKind, Stage};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// What a stage achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum StageProgress {
    /// The stage produced its output.
    Completed(StageDelta),
    /// The collaborator accepted asynchronous work under `reference`.
    Submitted { reference: String, delta: StageDelta },
    /// Submitted work is still running; poll again later.
    Waiting,
}

/// Why a stage did not progress.
#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    Retryable(JobError),
    Fatal(JobError),
}

impl StageError {
    fn fatal(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        StageError::Fatal(JobError::new(kind, Some(stage), message))
    }

    fn from_collaborator(stage: Stage, err: CollaboratorError) -> Self {
        let error = JobError::new(err.kind(), Some(stage), err.to_string());
        if err.is_retryable() {
            StageError::Retryable(error)
        } else {
            StageError::Fatal(error)
        }
    }
}

pub type StageResult = std::result::Result<StageProgress, StageError>;

#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, job: &Job) -> StageResult;
}

/// Executors for every stage whose collaborator is configured.
pub fn executors(collaborators: &Collaborators) -> BTreeMap<Stage, Arc<dyn StageExecutor>> {
    let mut executors: Vec<Arc<dyn StageExecutor>> = Vec::new();
    if let Some(engine) = &collaborators.conversion {
        executors.push(Arc::new(ConvertExecutor::new(engine.clone())));
    }
    if let Some(generator) = &collaborators.generation {
        executors.push(Arc::new(GenerateExecutor::new(generator.clone())));
    }
    if let Some(publisher) = &collaborators.publisher {
        executors.push(Arc::new(PublishExecutor::new(publisher.clone())));
    }
    if let Some(service) = &collaborators.compile {
        executors.push(Arc::new(CompileExecutor::new(service.clone())));
    }
    executors
        .into_iter()
        .map(|executor| (executor.stage(), executor))
        .collect()
}

fn wrong_input(stage: Stage) -> StageError {
    StageError::fatal(
        ErrorKind::Internal,
        stage,
        format!("job input does not fit the {} stage", stage),
    )
}

pub struct ConvertExecutor {
    engine: Arc<dyn ConversionEngine>,
}

impl ConvertExecutor {
    pub fn new(engine: Arc<dyn ConversionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StageExecutor for ConvertExecutor {
    fn stage(&self) -> Stage {
        Stage::Convert
    }

    async fn execute(&self, job: &Job) -> StageResult {
        let JobInput::Archive { file_name, archive } = &job.input else {
            return Err(wrong_input(Stage::Convert));
        };
        let files = self
            .engine
            .convert(file_name, archive)
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Convert, e))?;
        if files.is_empty() {
            return Err(StageError::fatal(
                ErrorKind::EmptyOutput,
                Stage::Convert,
                "conversion produced no files",
            ));
        }
        debug!(job_id = %job.id, files = files.len(), "Converted archive");
        Ok(StageProgress::Completed(StageDelta {
            files: Some(files),
            ..StageDelta::default()
        }))
    }
}

pub struct GenerateExecutor {
    generator: Arc<dyn CodeGenerator>,
}

impl GenerateExecutor {
    pub fn new(generator: Arc<dyn CodeGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl StageExecutor for GenerateExecutor {
    fn stage(&self) -> Stage {
        Stage::Generate
    }

    async fn execute(&self, job: &Job) -> StageResult {
        let JobInput::Chat { messages, .. } = &job.input else {
            return Err(wrong_input(Stage::Generate));
        };
        let output = self
            .generator
            .generate(messages, &job.workspace.files)
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Generate, e))?;
        if output.files.is_empty() {
            return Err(StageError::fatal(
                ErrorKind::EmptyOutput,
                Stage::Generate,
                "generation produced no files",
            ));
        }

        // Generated files land on top of the project the session started from
        let mut files = job.workspace.files.clone();
        files.extend(output.files);
        Ok(StageProgress::Completed(StageDelta {
            files: Some(files),
            reply: Some(output.reply),
            ..StageDelta::default()
        }))
    }
}

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9._-]+").unwrap());

/// Repository name for a project: lowercase, runs of other characters
/// collapsed to `-`.
pub fn repo_slug(project_name: &str) -> String {
    let lower = project_name.trim().to_lowercase();
    NON_SLUG
        .replace_all(&lower, "-")
        .trim_matches(|c| c == '-' || c == '.')
        .to_string()
}

fn repo_name(job: &Job) -> String {
    let requested = match &job.input {
        JobInput::Files {
            repo_name: Some(name),
            ..
        } => name.as_str(),
        _ => job.project_name.as_str(),
    };
    let slug = repo_slug(requested);
    if slug.is_empty() {
        format!("mobilize-{}", job.id)
    } else {
        slug
    }
}

pub struct PublishExecutor {
    publisher: Arc<dyn Publisher>,
}

impl PublishExecutor {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl StageExecutor for PublishExecutor {
    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn execute(&self, job: &Job) -> StageResult {
        if job.workspace.files.is_empty() {
            return Err(StageError::fatal(
                ErrorKind::EmptyOutput,
                Stage::Publish,
                "nothing to publish",
            ));
        }
        let repo = self
            .publisher
            .publish(&job.workspace.files, &repo_name(job))
            .await
            .map_err(|e| StageError::from_collaborator(Stage::Publish, e))?;
        debug!(job_id = %job.id, repo = %repo.full_name, commit = %repo.commit_id, "Published");

        // A push job ends here; its artifact is the repository itself
        let artifacts = if job.kind == JobKind::Push {
            BTreeMap::from([("source".to_string(), repo.repo_url.clone())])
        } else {
            BTreeMap::new()
        };
        Ok(StageProgress::Completed(StageDelta {
            repo: Some(repo),
            artifacts,
            ..StageDelta::default()
        }))
    }
}

pub struct CompileExecutor {
    service: Arc<dyn CompileService>,
}

impl CompileExecutor {
    pub fn new(service: Arc<dyn CompileService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl StageExecutor for CompileExecutor {
    fn stage(&self) -> Stage {
        Stage::Compile
    }

    /// Submits on the first call and polls once per call afterwards.
    async fn execute(&self, job: &Job) -> StageResult {
        let Some(handle) = &job.workspace.compile else {
            let repo = job.workspace.repo.as_ref().ok_or_else(|| {
                StageError::fatal(ErrorKind::Internal, Stage::Compile, "no published repository")
            })?;
            let handle = self
                .service
                .start_compile(repo, &job.platforms)
                .await
                .map_err(|e| StageError::from_collaborator(Stage::Compile, e))?;
            return Ok(StageProgress::Submitted {
                reference: handle.compile_job_id.clone(),
                delta: StageDelta {
                    compile: Some(handle),
                    ..StageDelta::default()
                },
            });
        };

        let poll = self.service.poll_compile(handle).await.map_err(|e| match e {
            CollaboratorError::Timeout(_) => StageError::Retryable(JobError::new(
                ErrorKind::Timeout,
                Some(Stage::Compile),
                "compile timeout",
            )),
            other => StageError::from_collaborator(Stage::Compile, other),
        })?;

        match poll.state {
            CompileState::Queued | CompileState::Running => Ok(StageProgress::Waiting),
            CompileState::Failed => Err(StageError::fatal(
                ErrorKind::BuildFailed,
                Stage::Compile,
                poll.message.unwrap_or_else(|| "native build failed".to_string()),
            )),
            CompileState::Succeeded => {
                let mut artifacts = BTreeMap::new();
                for platform in &job.platforms {
                    let url = poll.artifact_urls.get(platform).ok_or_else(|| {
                        StageError::fatal(
                            ErrorKind::EmptyOutput,
                            Stage::Compile,
                            format!("compile succeeded without a {} artifact", platform),
                        )
                    })?;
                    artifacts.insert(platform.to_string(), url.clone());
                }
                Ok(StageProgress::Completed(StageDelta {
                    artifacts,
                    ..StageDelta::default()
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCompile, FakeConversion, FakeGenerator, FakePublisher, files};
    use chrono::Utc;
    use mobilize_core::collaborator::{ChatMessage, CompileHandle, CompilePoll, RepoRef};
    use mobilize_core::{FileSet, NewJob, Platform, PlatformSet};

    fn job(kind: JobKind, input: JobInput, platforms: PlatformSet) -> Job {
        Job::new(
            NewJob {
                kind,
                owner: "u".to_string(),
                project_name: "My Todo App!".to_string(),
                platforms,
                input,
                idempotency_key: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn both() -> PlatformSet {
        PlatformSet::from([Platform::Ios, Platform::Android])
    }

    fn archive() -> JobInput {
        JobInput::Archive {
            file_name: "a.zip".to_string(),
            archive: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_executors_cover_configured_stages() {
        let all = crate::testing::collaborators(
            Arc::new(FakeConversion::returning(files(1))),
            Arc::new(FakeGenerator::returning(files(1), "ok")),
            Arc::new(FakePublisher::new()),
            Arc::new(FakeCompile::new()),
        );
        let map = executors(&all);
        assert_eq!(
            map.keys().copied().collect::<Vec<_>>(),
            vec![Stage::Convert, Stage::Generate, Stage::Publish, Stage::Compile]
        );
        assert!(map.iter().all(|(stage, executor)| executor.stage() == *stage));

        let partial = Collaborators {
            generation: None,
            compile: None,
            ..all
        };
        assert_eq!(
            executors(&partial).keys().copied().collect::<Vec<_>>(),
            vec![Stage::Convert, Stage::Publish]
        );
    }

    #[test]
    fn test_repo_slug() {
        assert_eq!(repo_slug("My Todo App!"), "my-todo-app");
        assert_eq!(repo_slug("  weather.app "), "weather.app");
        assert_eq!(repo_slug("!!!"), "");
    }

    #[tokio::test]
    async fn test_convert_empty_output_is_fatal() {
        let executor = ConvertExecutor::new(Arc::new(FakeConversion::returning(FileSet::new())));
        let err = executor
            .execute(&job(JobKind::Conversion, archive(), both()))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Fatal(ref e) if e.kind == ErrorKind::EmptyOutput));
    }

    #[tokio::test]
    async fn test_convert_unavailable_is_retryable() {
        let engine = FakeConversion::returning(files(2))
            .failing_first(1, CollaboratorError::Unavailable("down".into()));
        let executor = ConvertExecutor::new(Arc::new(engine));
        let job = job(JobKind::Conversion, archive(), both());

        let err = executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, StageError::Retryable(ref e) if e.stage == Some(Stage::Convert)));
        assert!(matches!(
            executor.execute(&job).await.unwrap(),
            StageProgress::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_generate_merges_onto_base_files() {
        let generator = FakeGenerator::returning(
            FileSet::from([("App.tsx".to_string(), "new".to_string())]),
            "done",
        );
        let executor = GenerateExecutor::new(Arc::new(generator));
        let job = job(
            JobKind::AiGeneration,
            JobInput::Chat {
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: "add a button".to_string(),
                }],
                base_files: FileSet::from([
                    ("App.tsx".to_string(), "old".to_string()),
                    ("README.md".to_string(), "hi".to_string()),
                ]),
            },
            both(),
        );

        let StageProgress::Completed(delta) = executor.execute(&job).await.unwrap() else {
            panic!("expected completion");
        };
        let files = delta.files.unwrap();
        assert_eq!(files.get("App.tsx").map(String::as_str), Some("new"));
        assert_eq!(files.get("README.md").map(String::as_str), Some("hi"));
        assert_eq!(delta.reply.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_push_publish_records_source_artifact() {
        let publisher = Arc::new(FakePublisher::new());
        let executor = PublishExecutor::new(publisher.clone());
        let job = job(
            JobKind::Push,
            JobInput::Files {
                files: files(1),
                repo_name: Some("Cool Repo".to_string()),
            },
            PlatformSet::new(),
        );

        let StageProgress::Completed(delta) = executor.execute(&job).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(
            delta.artifacts.get("source").map(String::as_str),
            Some("https://github.com/acme/cool-repo")
        );
        assert_eq!(publisher.published_names(), vec!["cool-repo".to_string()]);
    }

    #[tokio::test]
    async fn test_compile_submits_then_polls() {
        let service = Arc::new(FakeCompile::new().with_polls(vec![
            Ok(CompilePoll {
                state: CompileState::Running,
                artifact_urls: BTreeMap::new(),
                message: None,
            }),
            Ok(FakeCompile::success(&both())),
        ]));
        let executor = CompileExecutor::new(service.clone());
        let mut job = job(JobKind::Conversion, archive(), both());
        job.workspace.repo = Some(RepoRef {
            repo_url: "https://github.com/acme/demo".to_string(),
            full_name: "acme/demo".to_string(),
            commit_id: "c".to_string(),
        });

        let StageProgress::Submitted { reference, delta } = executor.execute(&job).await.unwrap()
        else {
            panic!("expected submission");
        };
        job.workspace.compile = delta.compile;
        assert_eq!(job.workspace.compile.as_ref().unwrap().compile_job_id, reference);

        assert_eq!(executor.execute(&job).await.unwrap(), StageProgress::Waiting);
        let StageProgress::Completed(delta) = executor.execute(&job).await.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(delta.artifacts.len(), 2);
        assert_eq!(service.start_calls(), 1);
    }

    #[tokio::test]
    async fn test_compile_missing_platform_artifact_is_fatal() {
        let service = FakeCompile::new().with_polls(vec![Ok(FakeCompile::success(
            &PlatformSet::from([Platform::Ios]),
        ))]);
        let executor = CompileExecutor::new(Arc::new(service));
        let mut job = job(JobKind::Conversion, archive(), both());
        job.workspace.compile = Some(CompileHandle {
            compile_job_id: "c-1".to_string(),
            status_url: "https://ci/c-1".to_string(),
        });

        let err = executor.execute(&job).await.unwrap_err();
        assert!(matches!(err, StageError::Fatal(ref e) if e.kind == ErrorKind::EmptyOutput));
    }

    #[tokio::test]
    async fn test_compile_poll_timeout_is_retryable() {
        let service = FakeCompile::new()
            .with_polls(vec![Err(CollaboratorError::Timeout("slow".to_string()))]);
        let executor = CompileExecutor::new(Arc::new(service));
        let mut job = job(JobKind::Conversion, archive(), both());
        job.workspace.compile = Some(CompileHandle {
            compile_job_id: "c-1".to_string(),
            status_url: "https://ci/c-1".to_string(),
        });

        let err = executor.execute(&job).await.unwrap_err();
        assert_eq!(
            err,
            StageError::Retryable(JobError::new(
                ErrorKind::Timeout,
                Some(Stage::Compile),
                "compile timeout"
            ))
        );
    }
}
