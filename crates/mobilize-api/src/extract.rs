//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use std::convert::Infallible;

pub const USER_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const ANONYMOUS: &str = "anonymous";

/// The calling user, from `X-User-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = header(&parts.headers, USER_HEADER).unwrap_or_else(|| ANONYMOUS.to_string());
        Ok(Owner(owner))
    }
}

/// Client-chosen idempotency key, if any.
pub fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    header(headers, IDEMPOTENCY_HEADER)
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
