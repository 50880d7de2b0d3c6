//! In-memory job store.
//!
//! Used when no database is configured and by tests. One mutex guards the
//! whole map, so every operation is linearizable.

use async_trait::async_trait;
use chrono::Utc;
use mobilize_core::{Fingerprint, Job, JobId, JobKind, Lease, Transition};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::job::{apply_checked, lease_expiry};
use crate::{DbError, DbResult, JobStore};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: JobId) -> DbError {
    DbError::NotFound(format!("job {}", id))
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> DbResult<Job> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.values().find(|j| {
            !j.is_terminal() && j.kind == job.kind && j.fingerprint == job.fingerprint
        }) {
            return Err(DbError::Conflict {
                existing: existing.id,
            });
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        self.jobs.lock().get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn find_by_fingerprint(
        &self,
        kind: JobKind,
        fingerprint: &Fingerprint,
    ) -> DbResult<Vec<Job>> {
        let mut found: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|j| j.kind == kind && &j.fingerprint == fingerprint)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn append_transition(
        &self,
        id: JobId,
        expected_version: i64,
        transition: Transition,
    ) -> DbResult<Job> {
        let mut jobs = self.jobs.lock();
        let stored = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        let mut next = stored.clone();
        apply_checked(&mut next, expected_version, transition, Utc::now())?;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_active(&self) -> DbResult<Vec<Job>> {
        let mut active: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn list_for_owner(&self, owner: &str, limit: i64) -> DbResult<Vec<Job>> {
        let mut owned: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|j| j.owner == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        owned.truncate(limit.max(0) as usize);
        Ok(owned)
    }

    async fn request_cancel(&self, id: JobId) -> DbResult<Job> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if job.is_terminal() {
            return Err(DbError::StaleJob(id));
        }
        if !job.cancel_requested {
            job.cancel_requested = true;
            job.version += 1;
            job.updated_at = Utc::now();
        }
        Ok(job.clone())
    }

    async fn acquire_lease(
        &self,
        id: JobId,
        worker: &str,
        ttl: Duration,
    ) -> DbResult<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if job.is_terminal() || job.is_leased_by_other(worker, now) {
            return Ok(None);
        }
        job.lease = Some(Lease {
            owner: worker.to_string(),
            expires_at: lease_expiry(now, ttl),
        });
        Ok(Some(job.clone()))
    }

    async fn renew_lease(&self, id: JobId, worker: &str, ttl: Duration) -> DbResult<bool> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        match job.lease.as_mut() {
            Some(lease) if lease.owner == worker => {
                lease.expires_at = lease_expiry(Utc::now(), ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, id: JobId, worker: &str) -> DbResult<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        if job.lease.as_ref().is_some_and(|lease| lease.owner == worker) {
            job.lease = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobilize_core::stage::StageDelta;
    use mobilize_core::{
        ErrorKind, FileSet, JobError, JobInput, JobState, NewJob, Platform, PlatformSet, Stage,
    };
    use std::sync::Arc;

    fn new_job(archive: &[u8]) -> Job {
        Job::new(
            NewJob {
                kind: JobKind::Conversion,
                owner: "user-1".to_string(),
                project_name: "demo".to_string(),
                platforms: PlatformSet::from([Platform::Ios]),
                input: JobInput::Archive {
                    file_name: "demo.zip".to_string(),
                    archive: archive.to_vec(),
                },
                idempotency_key: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn files() -> StageDelta {
        StageDelta {
            files: Some(FileSet::from([("a".to_string(), "b".to_string())])),
            ..StageDelta::default()
        }
    }

    #[tokio::test]
    async fn test_create_rejects_active_duplicate() {
        let store = InMemoryJobStore::new();
        let first = store.create(new_job(b"zip")).await.unwrap();

        let err = store.create(new_job(b"zip")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { existing } if existing == first.id));

        // A different archive is a different job
        store.create(new_job(b"other")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_allowed_after_terminal() {
        let store = InMemoryJobStore::new();
        let first = store.create(new_job(b"zip")).await.unwrap();
        store
            .append_transition(
                first.id,
                0,
                Transition::failed(
                    Stage::Convert,
                    JobError::new(ErrorKind::InvalidInput, Some(Stage::Convert), "bad zip"),
                    1,
                ),
            )
            .await
            .unwrap();

        let second = store.create(new_job(b"zip")).await.unwrap();
        assert_ne!(second.id, first.id);

        let history = store
            .find_by_fingerprint(JobKind::Conversion, &first.fingerprint)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
    }

    #[tokio::test]
    async fn test_append_is_compare_and_set() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();

        let started = store
            .append_transition(job.id, 0, Transition::started(Stage::Convert))
            .await
            .unwrap();
        assert_eq!(started.version, 1);
        assert_eq!(started.state, JobState::Converting);

        // A second writer holding the old version loses
        let err = store
            .append_transition(job.id, 0, Transition::succeeded(Stage::Convert, files()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::VersionMismatch {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(store.get(job.id).await.unwrap().stage_history.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_job_is_stale() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let failed = store
            .append_transition(
                job.id,
                0,
                Transition::failed(Stage::Convert, JobError::cancelled(Some(Stage::Convert)), 0),
            )
            .await
            .unwrap();

        let err = store
            .append_transition(job.id, failed.version, Transition::started(Stage::Convert))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::StaleJob(id) if id == job.id));

        let err = store.request_cancel(job.id).await.unwrap_err();
        assert!(matches!(err, DbError::StaleJob(_)));
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let err = store
            .append_transition(job.id, 0, Transition::started(Stage::Compile))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_history_is_monotonic_across_reads() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let mut previous = store.get(job.id).await.unwrap().stage_history;

        let transitions = [
            Transition::started(Stage::Convert),
            Transition::succeeded(Stage::Convert, files()),
            Transition::started(Stage::Publish),
        ];
        for (version, transition) in transitions.into_iter().enumerate() {
            store
                .append_transition(job.id, version as i64, transition)
                .await
                .unwrap();
            let current = store.get(job.id).await.unwrap().stage_history;
            assert!(current.len() > previous.len());
            assert_eq!(&current[..previous.len()], &previous[..]);
            previous = current;
        }
    }

    #[tokio::test]
    async fn test_cancel_bumps_version_once() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let cancelled = store.request_cancel(job.id).await.unwrap();
        assert!(cancelled.cancel_requested);
        assert_eq!(cancelled.version, 1);

        let again = store.request_cancel(job.id).await.unwrap();
        assert_eq!(again.version, 1);
    }

    #[tokio::test]
    async fn test_lease_excludes_other_workers() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let ttl = Duration::from_secs(30);

        assert!(store.acquire_lease(job.id, "w1", ttl).await.unwrap().is_some());
        assert!(store.acquire_lease(job.id, "w2", ttl).await.unwrap().is_none());
        // Re-acquiring your own lease is fine
        assert!(store.acquire_lease(job.id, "w1", ttl).await.unwrap().is_some());

        assert!(store.renew_lease(job.id, "w1", ttl).await.unwrap());
        assert!(!store.renew_lease(job.id, "w2", ttl).await.unwrap());

        store.release_lease(job.id, "w1").await.unwrap();
        assert!(store.acquire_lease(job.id, "w2", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();

        store
            .acquire_lease(job.id, "crashed", Duration::from_millis(0))
            .await
            .unwrap();
        let taken = store
            .acquire_lease(job.id, "w2", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.lease.unwrap().owner, "w2");
    }

    #[tokio::test]
    async fn test_leases_do_not_move_the_version() {
        let store = InMemoryJobStore::new();
        let job = store.create(new_job(b"zip")).await.unwrap();
        let leased = store
            .acquire_lease(job.id, "w1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.version, job.version);
        store
            .append_transition(job.id, leased.version, Transition::started(Stage::Convert))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_creates_admit_one() {
        let store = Arc::new(InMemoryJobStore::new());
        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create(new_job(b"same")).await })
        });
        let results = futures::future::join_all(attempts).await;

        let created = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(created, 1);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_for_owner_newest_first() {
        let store = InMemoryJobStore::new();
        let older = store.create(new_job(b"1")).await.unwrap();
        let newer = store.create(new_job(b"2")).await.unwrap();

        let listed = store.list_for_owner("user-1", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        assert_eq!(store.list_for_owner("user-1", 1).await.unwrap().len(), 1);
        assert!(store.list_for_owner("nobody", 10).await.unwrap().is_empty());
    }
}
