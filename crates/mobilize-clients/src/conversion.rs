//! Conversion engine client.

use async_trait::async_trait;
use mobilize_core::FileSet;
use mobilize_core::collaborator::{CollaboratorResult, ConversionEngine};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::http::{REQUEST_TIMEOUT, USER_AGENT, check_status, decode_json, request_error, trim_base};

const SERVICE: &str = "conversion engine";

/// Converts web-app archives by posting them to `{url}/convert`.
pub struct HttpConversionEngine {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    files: FileSet,
}

impl HttpConversionEngine {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ConversionEngine for HttpConversionEngine {
    fn name(&self) -> &'static str {
        "http-conversion"
    }

    async fn convert(&self, file_name: &str, archive: &[u8]) -> CollaboratorResult<FileSet> {
        debug!(file_name, bytes = archive.len(), "Posting archive for conversion");

        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/zip")
            .header("X-File-Name", urlencoding::encode(file_name).into_owned())
            .timeout(self.timeout)
            .body(archive.to_vec())
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        let response = check_status(SERVICE, response).await?;
        let body: ConvertResponse = decode_json(SERVICE, response).await?;
        Ok(body.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::serve;
    use axum::Router;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::post;
    use mobilize_core::collaborator::CollaboratorError;

    #[tokio::test]
    async fn test_convert_returns_files() {
        let router = Router::new().route(
            "/convert",
            post(|body: Bytes| async move {
                axum::Json(serde_json::json!({
                    "files": { "bytes.txt": body.len().to_string() }
                }))
            }),
        );
        let engine = HttpConversionEngine::new(&serve(router).await);

        let files = engine.convert("app.zip", b"PK\x03\x04").await.unwrap();
        assert_eq!(files.get("bytes.txt").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_convert_server_error_is_retryable() {
        let router = Router::new().route(
            "/convert",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        );
        let engine = HttpConversionEngine::new(&serve(router).await);

        let err = engine.convert("app.zip", b"x").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_convert_rejected_archive_is_fatal() {
        let router = Router::new().route(
            "/convert",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "not a zip") }),
        );
        let engine = HttpConversionEngine::new(&serve(router).await);

        let err = engine.convert("app.zip", b"x").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_convert_garbage_body_is_invalid_response() {
        let router = Router::new().route("/convert", post(|| async { "not json" }));
        let engine = HttpConversionEngine::new(&serve(router).await);

        let err = engine.convert("app.zip", b"x").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_retryable() {
        // Port 9 on loopback refuses connections
        let engine = HttpConversionEngine::new("http://127.0.0.1:9");
        let err = engine.convert("app.zip", b"x").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(_)));
    }
}
