//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mobilize_core::{Fingerprint, Job, JobId, JobKind, Lease, Transition};
use sqlx::PgPool;
use sqlx::types::Json;
use std::time::Duration;
use tracing::debug;

use crate::{DbError, DbResult};

/// Durable access to build jobs.
///
/// Transition writes are compare-and-set on the job's version; lease writes
/// never change the version so a worker's renewals cannot invalidate its own
/// pending transition.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`DbError::Conflict`] when a non-terminal
    /// job with the same kind and fingerprint exists.
    async fn create(&self, job: Job) -> DbResult<Job>;

    async fn get(&self, id: JobId) -> DbResult<Job>;

    /// Jobs sharing a fingerprint, newest first.
    async fn find_by_fingerprint(
        &self,
        kind: JobKind,
        fingerprint: &Fingerprint,
    ) -> DbResult<Vec<Job>>;

    /// Append one transition to the job's history.
    async fn append_transition(
        &self,
        id: JobId,
        expected_version: i64,
        transition: Transition,
    ) -> DbResult<Job>;

    /// Every non-terminal job, oldest first.
    async fn list_active(&self) -> DbResult<Vec<Job>>;

    /// A user's jobs, newest first.
    async fn list_for_owner(&self, owner: &str, limit: i64) -> DbResult<Vec<Job>>;

    /// Flag the job for cancellation. The orchestrator acts on the flag at
    /// the next stage boundary.
    async fn request_cancel(&self, id: JobId) -> DbResult<Job>;

    /// Claim the job for `worker` unless another worker holds a live lease.
    async fn acquire_lease(&self, id: JobId, worker: &str, ttl: Duration)
    -> DbResult<Option<Job>>;

    /// Extend a held lease. Returns false when the lease was lost.
    async fn renew_lease(&self, id: JobId, worker: &str, ttl: Duration) -> DbResult<bool>;

    async fn release_lease(&self, id: JobId, worker: &str) -> DbResult<()>;
}

pub(crate) fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(ttl.as_millis().min(i64::MAX as u128) as i64)
}

/// Check the expected version and apply the transition in place.
pub(crate) fn apply_checked(
    job: &mut Job,
    expected_version: i64,
    transition: Transition,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if job.is_terminal() {
        return Err(DbError::StaleJob(job.id));
    }
    if job.version != expected_version {
        return Err(DbError::VersionMismatch {
            id: job.id,
            expected: expected_version,
            actual: job.version,
        });
    }
    job.apply(transition, now)
        .map_err(|e| DbError::from_transition(job.id, e))
}

const CAS_RETRIES: usize = 5;

/// A job row. The document in `body` is authoritative except for the
/// version and lease, which live in their own columns.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    version: i64,
    body: Json<Job>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> Job {
        let mut job = self.body.0;
        job.version = self.version;
        job.lease = match (self.lease_owner, self.lease_expires_at) {
            (Some(owner), Some(expires_at)) => Some(Lease { owner, expires_at }),
            _ => None,
        };
        job
    }
}

const JOB_COLUMNS: &str = "version, body, lease_owner, lease_expires_at";

/// PostgreSQL implementation of JobStore.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_active(&self, kind: JobKind, fingerprint: &Fingerprint) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE kind = $1 AND fingerprint = $2 AND NOT terminal"
        ))
        .bind(kind.as_str())
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JobRow::into_job))
    }

    /// Write `job` if the stored version is still `expected_version`.
    async fn write_if_version(&self, job: &Job, expected_version: i64) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE build_jobs
            SET state = $3, terminal = $4, version = $5, body = $6, updated_at = $7
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(expected_version)
        .bind(job.state.as_str())
        .bind(job.is_terminal())
        .bind(job.version)
        .bind(Json(job))
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: Job) -> DbResult<Job> {
        for _ in 0..CAS_RETRIES {
            let row = sqlx::query_as::<_, JobRow>(&format!(
                r#"
                INSERT INTO build_jobs
                    (id, kind, fingerprint, owner, state, terminal, version, body, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (kind, fingerprint) WHERE NOT terminal DO NOTHING
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(job.id.as_uuid())
            .bind(job.kind.as_str())
            .bind(job.fingerprint.as_str())
            .bind(&job.owner)
            .bind(job.state.as_str())
            .bind(job.is_terminal())
            .bind(job.version)
            .bind(Json(&job))
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Ok(row.into_job());
            }
            // The winner may have finished between our insert and this read.
            if let Some(existing) = self.find_active(job.kind, &job.fingerprint).await? {
                return Err(DbError::Conflict {
                    existing: existing.id,
                });
            }
        }
        Err(DbError::Contention(format!(
            "active job for fingerprint {} kept changing",
            job.fingerprint
        )))
    }

    async fn get(&self, id: JobId) -> DbResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        Ok(row.into_job())
    }

    async fn find_by_fingerprint(
        &self,
        kind: JobKind,
        fingerprint: &Fingerprint,
    ) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE kind = $1 AND fingerprint = $2 ORDER BY created_at DESC"
        ))
        .bind(kind.as_str())
        .bind(fingerprint.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    async fn append_transition(
        &self,
        id: JobId,
        expected_version: i64,
        transition: Transition,
    ) -> DbResult<Job> {
        let mut job = self.get(id).await?;
        apply_checked(&mut job, expected_version, transition, Utc::now())?;

        if !self.write_if_version(&job, expected_version).await? {
            let current = self.get(id).await?;
            debug!(job_id = %id, expected_version, actual = current.version, "Transition lost a race");
            return Err(DbError::VersionMismatch {
                id,
                expected: expected_version,
                actual: current.version,
            });
        }
        Ok(job)
    }

    async fn list_active(&self) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE NOT terminal ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    async fn list_for_owner(&self, owner: &str, limit: i64) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM build_jobs WHERE owner = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    async fn request_cancel(&self, id: JobId) -> DbResult<Job> {
        for _ in 0..CAS_RETRIES {
            let mut job = self.get(id).await?;
            if job.is_terminal() {
                return Err(DbError::StaleJob(id));
            }
            if job.cancel_requested {
                return Ok(job);
            }
            let expected_version = job.version;
            job.cancel_requested = true;
            job.version += 1;
            job.updated_at = Utc::now();
            if self.write_if_version(&job, expected_version).await? {
                return Ok(job);
            }
        }
        Err(DbError::Contention(format!("job {} kept changing", id)))
    }

    async fn acquire_lease(
        &self,
        id: JobId,
        worker: &str,
        ttl: Duration,
    ) -> DbResult<Option<Job>> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE build_jobs
            SET lease_owner = $2, lease_expires_at = $3
            WHERE id = $1
              AND NOT terminal
              AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at <= $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(worker)
        .bind(lease_expiry(now, ttl))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(JobRow::into_job))
    }

    async fn renew_lease(&self, id: JobId, worker: &str, ttl: Duration) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE build_jobs SET lease_expires_at = $3 WHERE id = $1 AND lease_owner = $2",
        )
        .bind(id.as_uuid())
        .bind(worker)
        .bind(lease_expiry(Utc::now(), ttl))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, id: JobId, worker: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE build_jobs SET lease_owner = NULL, lease_expires_at = NULL WHERE id = $1 AND lease_owner = $2",
        )
        .bind(id.as_uuid())
        .bind(worker)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
