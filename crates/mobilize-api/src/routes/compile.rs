//! Compile service callbacks.
//!
//! A callback only wakes the worker polling the job. State changes still
//! go through the orchestrator's own poll.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use mobilize_core::JobId;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "x-signature-256";

pub fn router() -> Router<AppState> {
    Router::new().route("/compile/callback", post(callback))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileCallback {
    job_id: JobId,
    #[serde(default)]
    compile_job_id: Option<String>,
}

async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Some(secret) = state.callback_secret.as_deref() else {
        return Err(ApiError::NeedsSetup(
            "compile callback secret is not configured".to_string(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_signature(secret, &body, signature) {
        warn!("Invalid compile callback signature");
        return Err(ApiError::Unauthorized("invalid signature".to_string()));
    }

    let payload: CompileCallback = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback payload: {}", e)))?;

    let woken = state.orchestrator.wake(payload.job_id);
    debug!(
        job_id = %payload.job_id,
        compile_job_id = ?payload.compile_job_id,
        woken,
        "Compile callback received"
    );

    Ok((StatusCode::ACCEPTED, Json(json!({ "woken": woken }))))
}

/// Check a `sha256=<hex>` HMAC over the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Produce the signature header value for a body.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"jobId":"x"}"#;
        let sig = sign("s3cret", body);
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature("s3cret", body, Some(&sig)));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let sig = sign("s3cret", b"original");
        assert!(!verify_signature("s3cret", b"tampered", Some(&sig)));
        assert!(!verify_signature("other", b"original", Some(&sig)));
        assert!(!verify_signature("s3cret", b"original", None));
        assert!(!verify_signature("s3cret", b"original", Some("sha1=abcd")));
        assert!(!verify_signature("s3cret", b"original", Some("sha256=zz")));
    }
}
