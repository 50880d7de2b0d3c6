//! Build endpoint for already-assembled projects.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mobilize_core::platform::parse_platforms;
use mobilize_core::{FileSet, JobInput, JobKind, NewJob};
use serde::Deserialize;

use super::{CreatedJob, submit};
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Owner, idempotency_key};

pub fn router() -> Router<AppState> {
    Router::new().route("/build-mobile", post(build_mobile))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildMobileRequest {
    project_name: String,
    files: FileSet,
    platform: Option<String>,
}

async fn build_mobile(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    Json(req): Json<BuildMobileRequest>,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    let platforms = parse_platforms(req.platform.as_deref().unwrap_or("both"))?;
    submit(
        &state,
        NewJob {
            kind: JobKind::Build,
            owner,
            project_name: req.project_name,
            platforms,
            input: JobInput::Files {
                files: req.files,
                repo_name: None,
            },
            idempotency_key: idempotency_key(&headers),
        },
    )
    .await
}
