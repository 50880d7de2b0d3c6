//! Client-facing job status.
//!
//! Clients only ever see four statuses; the collapse from the internal state
//! machine happens here and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::platform::platform_label;
use crate::{Job, JobError, JobId, JobKind, JobState, Platform, StageEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Building,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Building => "building",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<JobState> for BuildStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Pending => BuildStatus::Pending,
            JobState::Converting
            | JobState::Converted
            | JobState::Generating
            | JobState::Generated
            | JobState::Publishing
            | JobState::Published
            | JobState::Compiling => BuildStatus::Building,
            JobState::Succeeded => BuildStatus::Success,
            JobState::Failed => BuildStatus::Failed,
        }
    }
}

/// Row of the polling dashboard (`GET /api/builds`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub project_name: String,
    pub status: BuildStatus,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_urls: Option<BTreeMap<String, String>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            project_name: job.project_name.clone(),
            status: job.state.into(),
            platform: platform_label(&job.platforms),
            created_at: job.created_at,
            repo_url: job.workspace.repo.as_ref().map(|r| r.repo_url.clone()),
            actions_url: job.workspace.compile.as_ref().map(|c| c.status_url.clone()),
            download_urls: download_urls(job),
        }
    }
}

fn download_urls(job: &Job) -> Option<BTreeMap<String, String>> {
    let urls: BTreeMap<String, String> = job
        .artifacts
        .iter()
        .filter(|(name, _)| name.parse::<Platform>().is_ok())
        .map(|(name, url)| (name.clone(), url.clone()))
        .collect();
    (!urls.is_empty()).then_some(urls)
}

/// Full snapshot of one job for status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: JobId,
    pub kind: JobKind,
    pub project_name: String,
    pub status: BuildStatus,
    pub state: JobState,
    pub version: i64,
    pub stage_history: Vec<StageEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind,
            project_name: job.project_name.clone(),
            status: job.state.into(),
            state: job.state,
            version: job.version,
            stage_history: job.stage_history.clone(),
            artifacts: (!job.artifacts.is_empty()).then(|| job.artifacts.clone()),
            last_error: job.last_error.clone(),
            repo_url: job.workspace.repo.as_ref().map(|r| r.repo_url.clone()),
            actions_url: job.workspace.compile.as_ref().map(|c| c.status_url.clone()),
            reply: job.workspace.reply.clone(),
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
