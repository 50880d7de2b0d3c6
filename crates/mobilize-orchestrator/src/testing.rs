//! In-process fake collaborators.

use async_trait::async_trait;
use mobilize_core::collaborator::{
    ChatMessage, CodeGenerator, CollaboratorError, CollaboratorResult, Collaborators,
    CompileHandle, CompilePoll, CompileService, CompileState, ConversionEngine,
    GenerationOutput, Publisher, RepoRef,
};
use mobilize_core::{FileSet, PlatformSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// `count` distinct files.
pub fn files(count: usize) -> FileSet {
    (0..count)
        .map(|i| (format!("src/file_{}.swift", i), format!("// file {}", i)))
        .collect()
}

/// Errors handed out before a fake starts succeeding.
#[derive(Default)]
struct Failures {
    remaining: Mutex<VecDeque<CollaboratorError>>,
    forever: Option<CollaboratorError>,
}

impl Failures {
    fn next(&self) -> Option<CollaboratorError> {
        self.remaining
            .lock()
            .pop_front()
            .or_else(|| self.forever.clone())
    }
}

pub struct FakeConversion {
    files: FileSet,
    failures: Failures,
    calls: AtomicUsize,
}

impl FakeConversion {
    pub fn returning(files: FileSet) -> Self {
        Self {
            files,
            failures: Failures::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(self, count: usize, error: CollaboratorError) -> Self {
        self.failures
            .remaining
            .lock()
            .extend(std::iter::repeat_n(error, count));
        self
    }

    pub fn always_failing(mut self, error: CollaboratorError) -> Self {
        self.failures.forever = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversionEngine for FakeConversion {
    fn name(&self) -> &'static str {
        "fake-conversion"
    }

    async fn convert(&self, _file_name: &str, _archive: &[u8]) -> CollaboratorResult<FileSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.next() {
            Some(error) => Err(error),
            None => Ok(self.files.clone()),
        }
    }
}

pub struct FakeGenerator {
    files: FileSet,
    reply: String,
    calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn returning(files: FileSet, reply: &str) -> Self {
        Self {
            files,
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodeGenerator for FakeGenerator {
    fn name(&self) -> &'static str {
        "fake-generation"
    }

    async fn generate(
        &self,
        _transcript: &[ChatMessage],
        _files: &FileSet,
    ) -> CollaboratorResult<GenerationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationOutput {
            files: self.files.clone(),
            reply: self.reply.clone(),
        })
    }
}

/// Publishes to `https://github.com/acme/{name}`.
///
/// A gated publisher signals `entered` when a call begins and holds the call
/// until `release` is notified.
pub struct FakePublisher {
    names: Mutex<Vec<String>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self {
            names: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated(entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        Self {
            names: Mutex::new(Vec::new()),
            gate: Some((entered, release)),
        }
    }

    pub fn published_names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.names.lock().len()
    }
}

impl Default for FakePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    fn name(&self) -> &'static str {
        "fake-publisher"
    }

    async fn publish(&self, _files: &FileSet, repo_name: &str) -> CollaboratorResult<RepoRef> {
        self.names.lock().push(repo_name.to_string());
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(RepoRef {
            repo_url: format!("https://github.com/acme/{}", repo_name),
            full_name: format!("acme/{}", repo_name),
            commit_id: "0123abcd".to_string(),
        })
    }
}

/// Compile service answering polls from a script. The last scripted answer
/// repeats once the script runs out.
pub struct FakeCompile {
    polls: Mutex<VecDeque<CollaboratorResult<CompilePoll>>>,
    last: Mutex<Option<CollaboratorResult<CompilePoll>>>,
    poll_delay: Duration,
    start_calls: AtomicUsize,
    poll_calls: AtomicUsize,
}

impl FakeCompile {
    pub fn new() -> Self {
        Self {
            polls: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            poll_delay: Duration::ZERO,
            start_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_polls(self, polls: Vec<CollaboratorResult<CompilePoll>>) -> Self {
        *self.polls.lock() = polls.into();
        self
    }

    /// Sleep this long inside every poll.
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// A succeeded poll with a download URL per platform.
    pub fn success(platforms: &PlatformSet) -> CompilePoll {
        CompilePoll {
            state: CompileState::Succeeded,
            artifact_urls: platforms
                .iter()
                .map(|p| (*p, format!("https://dl.example.test/app-{}", p)))
                .collect(),
            message: None,
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeCompile {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompileService for FakeCompile {
    fn name(&self) -> &'static str {
        "fake-compile"
    }

    async fn start_compile(
        &self,
        _repo: &RepoRef,
        _platforms: &PlatformSet,
    ) -> CollaboratorResult<CompileHandle> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CompileHandle {
            compile_job_id: format!("compile-{}", n),
            status_url: format!("https://ci.example.test/runs/{}", n),
        })
    }

    async fn poll_compile(&self, _handle: &CompileHandle) -> CollaboratorResult<CompilePoll> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let next = self.polls.lock().pop_front();
        match next {
            Some(answer) => {
                *self.last.lock() = Some(answer.clone());
                answer
            }
            None => self.last.lock().clone().unwrap_or_else(|| {
                Err(CollaboratorError::Unavailable("no scripted poll".to_string()))
            }),
        }
    }
}

/// Bundle fakes into the set the orchestrator consumes.
pub fn collaborators(
    conversion: Arc<FakeConversion>,
    generation: Arc<FakeGenerator>,
    publisher: Arc<FakePublisher>,
    compile: Arc<FakeCompile>,
) -> Collaborators {
    Collaborators {
        conversion: Some(conversion),
        generation: Some(generation),
        publisher: Some(publisher),
        compile: Some(compile),
    }
}
