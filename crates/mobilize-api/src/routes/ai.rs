//! AI chat endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mobilize_core::collaborator::ChatMessage;
use mobilize_core::platform::parse_platforms;
use mobilize_core::{FileSet, JobId, JobInput, JobKind, NewJob};
use serde::Deserialize;

use super::{CreatedJob, submit};
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Owner, idempotency_key};

pub fn router() -> Router<AppState> {
    Router::new().route("/ai/chat", post(chat))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    project_name: String,
    messages: Vec<ChatMessage>,
    platform: Option<String>,
    /// Continue from the files of an earlier job.
    base_job_id: Option<JobId>,
}

async fn chat(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    let platforms = parse_platforms(req.platform.as_deref().unwrap_or("both"))?;

    let base_files = match req.base_job_id {
        Some(id) => {
            let base = state.store.get(id).await?;
            if base.owner != owner {
                return Err(ApiError::NotFound(format!("job {}", id)));
            }
            base.workspace.files
        }
        None => FileSet::new(),
    };

    submit(
        &state,
        NewJob {
            kind: JobKind::AiGeneration,
            owner,
            project_name: req.project_name,
            platforms,
            input: JobInput::Chat {
                messages: req.messages,
                base_files,
            },
            idempotency_key: idempotency_key(&headers),
        },
    )
    .await
}
