//! Read-only status queries.

use mobilize_core::{JobId, JobStatusView, JobSummary};
use mobilize_db::{DbResult, JobStore};
use std::sync::Arc;

/// Serves job snapshots straight from the store, so every read sees the
/// latest committed version.
#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn JobStore>,
}

impl StatusService {
    pub const DEFAULT_LIMIT: i64 = 50;

    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn get_status(&self, id: JobId) -> DbResult<JobStatusView> {
        let job = self.store.get(id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// The owner's jobs, newest first.
    pub async fn list_for_user(&self, owner: &str, limit: Option<i64>) -> DbResult<Vec<JobSummary>> {
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 500);
        let jobs = self.store.list_for_owner(owner, limit).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }
}
