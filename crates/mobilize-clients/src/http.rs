//! Shared request plumbing and failure classification.

use mobilize_core::collaborator::{CollaboratorError, CollaboratorResult};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) const USER_AGENT: &str = "Mobilize";

/// Per-request ceiling. The orchestrator applies its own stage timeout on top.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Classify a transport failure.
pub(crate) fn request_error(service: &str, err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout(format!("{}: {}", service, err))
    } else if err.is_decode() {
        CollaboratorError::InvalidResponse(format!("{}: {}", service, err))
    } else {
        CollaboratorError::Unavailable(format!("{}: {}", service, err))
    }
}

/// Classify a non-success HTTP status.
pub(crate) fn status_error(status: StatusCode, message: String) -> CollaboratorError {
    match status.as_u16() {
        408 => CollaboratorError::Timeout(message),
        429 => CollaboratorError::RateLimited(message),
        401 | 403 => CollaboratorError::Auth(message),
        500..=599 => CollaboratorError::Unavailable(message),
        _ => CollaboratorError::InvalidInput(message),
    }
}

/// Pass a successful response through, or turn the status into an error.
pub(crate) async fn check_status(service: &str, response: Response) -> CollaboratorResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(status_error(
        status,
        format!("{} returned {}: {}", service, status, text),
    ))
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    service: &str,
    response: Response,
) -> CollaboratorResult<T> {
    response.json().await.map_err(|e| {
        if e.is_timeout() {
            CollaboratorError::Timeout(format!("{}: {}", service, e))
        } else {
            CollaboratorError::InvalidResponse(format!("{}: {}", service, e))
        }
    })
}


/// Serve `router` on an ephemeral local port and return its base URL.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
