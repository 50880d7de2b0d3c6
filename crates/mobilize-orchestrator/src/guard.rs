//! Deduplication of job-creation requests.

use chrono::Utc;
use dashmap::DashMap;
use mobilize_core::{Fingerprint, Job, JobKind, JobState, NewJob};
use mobilize_db::{DbError, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::OrchestratorResult;

/// Outcome of admitting a creation request.
#[derive(Debug, Clone)]
pub enum Admission {
    /// An equivalent job already exists; the request maps onto it.
    Existing(Job),
    Created(Job),
}

impl Admission {
    pub fn job(&self) -> &Job {
        match self {
            Admission::Existing(job) | Admission::Created(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Admission::Existing(job) | Admission::Created(job) => job,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Admission::Existing(_))
    }
}

type GuardKey = (JobKind, Fingerprint);

/// Maps duplicate creation requests onto one job.
///
/// Within a process, requests for the same kind and fingerprint are
/// serialized by a keyed lock. Across processes the store's uniqueness rule
/// decides, and the loser adopts the winner's job.
pub struct IdempotencyGuard {
    store: Arc<dyn JobStore>,
    freshness_window: chrono::Duration,
    locks: DashMap<GuardKey, Arc<Mutex<()>>>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn JobStore>, freshness_window: Duration) -> Self {
        Self {
            store,
            freshness_window: chrono::Duration::from_std(freshness_window)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            locks: DashMap::new(),
        }
    }

    /// Return the job this request maps to, creating it when needed.
    pub async fn admit(&self, request: NewJob) -> OrchestratorResult<Admission> {
        let candidate = Job::new(request, Utc::now())?;
        let key = (candidate.kind, candidate.fingerprint.clone());

        let lock = self.locks.entry(key.clone()).or_default().clone();
        let result = {
            let _held = lock.lock().await;
            self.admit_locked(candidate).await
        };
        drop(lock);
        self.locks.remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn admit_locked(&self, candidate: Job) -> OrchestratorResult<Admission> {
        let previous = self
            .store
            .find_by_fingerprint(candidate.kind, &candidate.fingerprint)
            .await?;

        if let Some(active) = previous.iter().find(|job| !job.is_terminal()) {
            debug!(job_id = %active.id, "Request matches active job");
            return Ok(Admission::Existing(active.clone()));
        }

        let now = Utc::now();
        if let Some(fresh) = previous.iter().find(|job| {
            job.state == JobState::Succeeded && now - job.updated_at < self.freshness_window
        }) {
            debug!(job_id = %fresh.id, "Request matches recently succeeded job");
            return Ok(Admission::Existing(fresh.clone()));
        }

        match self.store.create(candidate).await {
            Ok(job) => {
                info!(job_id = %job.id, kind = %job.kind, owner = %job.owner, "Admitted job");
                Ok(Admission::Created(job))
            }
            Err(DbError::Conflict { existing }) => {
                debug!(job_id = %existing, "Another process admitted this request first");
                Ok(Admission::Existing(self.store.get(existing).await?))
            }
            Err(e) => Err(e.into()),
        }
    }
}
