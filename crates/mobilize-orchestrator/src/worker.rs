//! Workers that scan for runnable jobs and drive them.

use chrono::Utc;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::Orchestrator;

/// A worker that claims and drives jobs.
pub struct Worker {
    id: String,
    orchestrator: Arc<Orchestrator>,
}

impl Worker {
    pub fn new(id: impl Into<String>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            id: id.into(),
            orchestrator,
        }
    }

    /// Scan once and drive every job this worker can lease. Returns how many
    /// jobs it processed.
    pub async fn run_once(&self) -> usize {
        let now = Utc::now();
        let mut candidates: Vec<_> = match self.orchestrator.store().list_active().await {
            Ok(jobs) => jobs
                .into_iter()
                .filter(|job| {
                    (job.is_ready(now) || job.cancel_requested)
                        && !job.is_leased_by_other(&self.id, now)
                })
                .map(|job| job.id)
                .collect(),
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "Failed to list active jobs");
                return 0;
            }
        };
        // Workers scanning the same list should not all race for the same job
        candidates.shuffle(&mut rand::thread_rng());

        let mut processed = 0;
        for job_id in candidates {
            match self.orchestrator.process(job_id, &self.id).await {
                Ok(Some(job)) => {
                    processed += 1;
                    if job.is_terminal() {
                        info!(worker_id = %self.id, %job_id, state = %job.state, "Job finished");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(worker_id = %self.id, %job_id, error = %e, "Failed to process job"),
            }
        }
        processed
    }

    /// Run the worker loop.
    pub async fn run(&self) {
        info!(worker_id = %self.id, "Starting worker");

        loop {
            if self.run_once().await == 0 {
                sleep(self.orchestrator.settings().scan_interval).await;
            }
        }
    }
}

/// `N` workers sharing one orchestrator.
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    size: usize,
    prefix: String,
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let size = orchestrator.settings().workers.max(1);
        Self {
            orchestrator,
            size,
            prefix: format!("worker-{}", std::process::id()),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|n| {
                let worker = Worker::new(format!("{}-{}", self.prefix, n), self.orchestrator.clone());
                tokio::spawn(async move { worker.run().await })
            })
            .collect()
    }
}
