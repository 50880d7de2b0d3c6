//! Orchestrator loop: drives one job through its stages.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mobilize_config::OrchestratorSettings;
use mobilize_core::collaborator::Collaborators;
use mobilize_core::{ErrorKind, Job, JobError, JobId, Stage, Transition};
use mobilize_db::{DbError, DbResult, JobStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::lease::LeaseKeeper;
use crate::stages::{StageError, StageExecutor, StageProgress, executors};

fn after(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    at + chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}

/// Advances jobs one transition at a time, persisting each through the
/// store's compare-and-set.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    executors: BTreeMap<Stage, Arc<dyn StageExecutor>>,
    settings: OrchestratorSettings,
    retry: RetryPolicy,
    wakers: DashMap<JobId, Arc<Notify>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        collaborators: &Collaborators,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            executors: executors(collaborators),
            retry: RetryPolicy::from(&settings),
            settings,
            wakers: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Cut a pending compile poll wait short.
    pub fn wake(&self, job_id: JobId) -> bool {
        match self.wakers.get(&job_id) {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Lease the job and drive it as far as it can go now.
    ///
    /// Returns `None` when another worker holds the job. Otherwise returns
    /// the job as last seen: terminal, waiting out a backoff, or handed off
    /// after a lost lease.
    pub async fn process(&self, job_id: JobId, worker: &str) -> DbResult<Option<Job>> {
        let ttl = self.settings.lease_ttl;
        let Some(job) = self.store.acquire_lease(job_id, worker, ttl).await? else {
            debug!(%job_id, worker_id = %worker, "Job is leased elsewhere");
            return Ok(None);
        };

        let keeper = LeaseKeeper::spawn(self.store.clone(), job_id, worker.to_string(), ttl);
        let result = self.drive(job, &keeper).await;
        keeper.stop().await;
        self.wakers.remove(&job_id);

        if let Err(e) = self.store.release_lease(job_id, worker).await {
            warn!(%job_id, error = %e, "Failed to release lease");
        }
        result.map(Some)
    }

    async fn drive(&self, mut job: Job, keeper: &LeaseKeeper) -> DbResult<Job> {
        loop {
            let Some(stage) = job.active_stage() else {
                return Ok(job);
            };
            if keeper.is_lost() {
                return Ok(job);
            }

            if job.cancel_requested {
                info!(job_id = %job.id, %stage, "Cancelling job");
                job = self
                    .append(&job, Transition::failed(stage, JobError::cancelled(Some(stage)), 0))
                    .await?;
                continue;
            }

            let now = Utc::now();
            if now >= after(job.created_at, self.settings.job_deadline) {
                warn!(job_id = %job.id, %stage, "Job deadline exceeded");
                let error = JobError::new(ErrorKind::Timeout, Some(stage), "job deadline exceeded");
                job = self.append(&job, Transition::failed(stage, error, 0)).await?;
                continue;
            }

            if !job.is_ready(now) {
                return Ok(job);
            }

            if job.state.running_stage().is_none() {
                info!(job_id = %job.id, %stage, "Starting stage");
                job = self.append(&job, Transition::started(stage)).await?;
                continue;
            }

            let Some(executor) = self.executors.get(&stage).cloned() else {
                let error = JobError::new(
                    ErrorKind::Configuration,
                    Some(stage),
                    format!("no collaborator configured for the {} stage", stage),
                );
                job = self.append(&job, Transition::failed(stage, error, 0)).await?;
                continue;
            };

            let result =
                match tokio::time::timeout(self.settings.stage_timeout, executor.execute(&job))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Retryable(JobError::new(
                        ErrorKind::Timeout,
                        Some(stage),
                        format!("{} timeout", stage),
                    ))),
                };

            // Anything written meanwhile (a cancel request, another worker)
            // supersedes this result
            let current = self.store.get(job.id).await?;
            if current.version != job.version {
                debug!(job_id = %job.id, %stage, "Job changed during stage; discarding result");
                job = current;
                continue;
            }

            job = match result {
                Ok(StageProgress::Completed(delta)) => {
                    info!(job_id = %job.id, %stage, "Stage succeeded");
                    self.append(&job, Transition::succeeded(stage, delta)).await?
                }
                Ok(StageProgress::Submitted { reference, delta }) => {
                    info!(job_id = %job.id, %stage, %reference, "Stage submitted");
                    self.append(&job, Transition::submitted(stage, reference, delta))
                        .await?
                }
                Ok(StageProgress::Waiting) => {
                    self.wait_for_poll(job.id).await;
                    self.store.get(job.id).await?
                }
                Err(StageError::Retryable(error)) => self.retry_or_fail(&job, stage, error).await?,
                Err(StageError::Fatal(error)) => {
                    let attempt = job.attempts_for(stage) + 1;
                    error!(job_id = %job.id, %stage, attempt, error = %error, "Stage failed");
                    self.append(&job, Transition::failed(stage, error, attempt))
                        .await?
                }
            };
        }
    }

    async fn retry_or_fail(&self, job: &Job, stage: Stage, error: JobError) -> DbResult<Job> {
        let attempt = job.attempts_for(stage) + 1;
        if self.retry.exhausted(attempt) {
            error!(job_id = %job.id, %stage, attempt, error = %error, "Retries exhausted");
            return self
                .append(job, Transition::failed(stage, error, attempt))
                .await;
        }

        let delay = self.retry.delay(attempt);
        warn!(
            job_id = %job.id,
            %stage,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Stage failed; will retry"
        );
        let retry_at = after(Utc::now(), delay);
        self.append(job, Transition::retrying(stage, attempt, error, retry_at))
            .await
    }

    async fn wait_for_poll(&self, job_id: JobId) {
        let notify = self.wakers.entry(job_id).or_default().clone();
        tokio::select! {
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
            _ = notify.notified() => debug!(%job_id, "Woken for an early poll"),
        }
    }

    /// Append against the version we last saw. Losing the race is not an
    /// error: the caller continues from the stored job.
    async fn append(&self, job: &Job, transition: Transition) -> DbResult<Job> {
        match self
            .store
            .append_transition(job.id, job.version, transition)
            .await
        {
            Ok(job) => Ok(job),
            Err(DbError::VersionMismatch { id, .. }) => {
                debug!(job_id = %id, "Lost a transition race; reloading");
                self.store.get(id).await
            }
            Err(e) => Err(e),
        }
    }
}
