//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mobilize_db::DbError;
use mobilize_orchestrator::OrchestratorError;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    /// A collaborator the request needs is not configured.
    NeedsSetup(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::NeedsSetup(details) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": "Service is not configured",
                    "details": details,
                    "needsSetup": true,
                }),
            ),
            ApiError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Internal server error", "details": details }),
            ),
        };

        let (status, body) = body;
        (status, Json(body)).into_response()
    }
}

impl From<mobilize_core::Error> for ApiError {
    fn from(err: mobilize_core::Error) -> Self {
        match err {
            mobilize_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            mobilize_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            mobilize_core::Error::Conflict { .. } | mobilize_core::Error::StaleJob(_) => {
                ApiError::Conflict(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ApiError::NotFound(msg),
            DbError::StaleJob(_) => ApiError::Conflict("job has already finished".to_string()),
            DbError::Conflict { .. } | DbError::VersionMismatch { .. } | DbError::Contention(_) => {
                ApiError::Conflict(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Core(e) => e.into(),
            OrchestratorError::Db(e) => e.into(),
        }
    }
}
