//! Job status and cancellation endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mobilize_core::{JobId, JobStatusView, JobSummary};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::Owner;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/builds", get(list_builds))
        .route("/builds/{id}", get(get_build))
        .route("/builds/{id}/cancel", post(cancel_build))
}

#[derive(Debug, Deserialize)]
struct ListBuildsQuery {
    limit: Option<i64>,
}

async fn list_builds(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(query): Query<ListBuildsQuery>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let builds = state.status.list_for_user(&owner, query.limit).await?;
    Ok(Json(builds))
}

/// Load a job the caller owns. Other users' jobs look absent.
async fn owned_status(state: &AppState, owner: &str, id: Uuid) -> Result<JobStatusView, ApiError> {
    let id = JobId::from_uuid(id);
    let job = state.store.get(id).await?;
    if job.owner != owner {
        return Err(ApiError::NotFound(format!("job {}", id)));
    }
    Ok(JobStatusView::from(&job))
}

async fn get_build(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusView>, ApiError> {
    Ok(Json(owned_status(&state, &owner, id).await?))
}

async fn cancel_build(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobStatusView>), ApiError> {
    owned_status(&state, &owner, id).await?;

    let job = state.store.request_cancel(JobId::from_uuid(id)).await?;
    // A worker parked on a compile poll notices sooner
    state.orchestrator.wake(job.id);
    info!(job_id = %job.id, %owner, "Cancellation requested");

    Ok((StatusCode::ACCEPTED, Json(JobStatusView::from(&job))))
}
