//! Repository push endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mobilize_core::{FileSet, JobInput, JobKind, NewJob, PlatformSet};
use serde::Deserialize;

use super::{CreatedJob, submit};
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Owner, idempotency_key};

pub fn router() -> Router<AppState> {
    Router::new().route("/github/push", post(push))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushRequest {
    repo_name: String,
    files: FileSet,
}

async fn push(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    Json(req): Json<PushRequest>,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    if req.repo_name.trim().is_empty() {
        return Err(ApiError::BadRequest("repoName is required".to_string()));
    }
    submit(
        &state,
        NewJob {
            kind: JobKind::Push,
            owner,
            project_name: req.repo_name.clone(),
            platforms: PlatformSet::new(),
            input: JobInput::Files {
                files: req.files,
                repo_name: Some(req.repo_name),
            },
            idempotency_key: idempotency_key(&headers),
        },
    )
    .await
}
