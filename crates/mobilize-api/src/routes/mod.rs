//! API routes.

pub mod ai;
pub mod build_mobile;
pub mod builds;
pub mod compile;
pub mod convert;
pub mod github;
pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::{Json, Router};
use mobilize_core::{BuildStatus, JobId, JobKind, JobState, NewJob};
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .nest("/api", api_router())
        .merge(health::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(builds::router())
        .merge(convert::router())
        .merge(ai::router())
        .merge(build_mobile::router())
        .merge(github::router())
        .merge(compile::router())
}

/// Response to a job-creation request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub id: JobId,
    pub kind: JobKind,
    pub status: BuildStatus,
    pub state: JobState,
    pub deduplicated: bool,
}

/// Admit a job and answer `202` for new work or `200` for a duplicate.
pub(crate) async fn submit(
    state: &AppState,
    request: NewJob,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    let missing = state.collaborators.missing_for(request.kind);
    if !missing.is_empty() {
        let stages: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
        return Err(ApiError::NeedsSetup(format!(
            "no collaborator configured for: {}",
            stages.join(", ")
        )));
    }

    let admission = state.guard.admit(request).await?;
    let deduplicated = admission.is_existing();
    let job = admission.job();
    info!(job_id = %job.id, kind = %job.kind, deduplicated, "Job requested");

    let status = if deduplicated {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let body = CreatedJob {
        id: job.id,
        kind: job.kind,
        status: job.state.into(),
        state: job.state,
        deduplicated,
    };
    Ok((status, Json(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, Response, header};
    use mobilize_config::OrchestratorSettings;
    use mobilize_core::Collaborators;
    use mobilize_db::{InMemoryJobStore, JobStore};
    use mobilize_orchestrator::testing::{
        FakeCompile, FakeConversion, FakeGenerator, FakePublisher, collaborators, files,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "mobilize-test-boundary";

    fn fakes() -> Collaborators {
        collaborators(
            Arc::new(FakeConversion::returning(files(12))),
            Arc::new(FakeGenerator::returning(files(3), "done")),
            Arc::new(FakePublisher::new()),
            Arc::new(FakeCompile::new()),
        )
    }

    fn state_with(collaborators: Collaborators) -> AppState {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        AppState::new(store, collaborators, OrchestratorSettings::default())
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response: Response<Body> = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, user: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-user-id", user)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str, user: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    fn upload(user: &str, archive: &[u8], platform: &str) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"weather.zip\"\r\nContent-Type: application/zip\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(archive);
        body.extend_from_slice(
            format!(
                "\r\n--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"platform\"\r\n\r\n{platform}\r\n--{BOUNDARY}--\r\n"
            )
            .as_bytes(),
        );

        Request::post("/api/convert/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header("x-user-id", user)
            .body(Body::from(body))
            .unwrap()
    }

    fn build_request(project: &str) -> Value {
        json!({
            "projectName": project,
            "files": { "index.html": format!("<h1>{project}</h1>") },
            "platform": "android",
        })
    }

    #[tokio::test]
    async fn test_duplicate_upload_returns_same_job() {
        let state = state_with(fakes());

        let (first_status, first) = send(&state, upload("alice", b"PK\x03\x04site", "both")).await;
        assert_eq!(first_status, StatusCode::ACCEPTED);
        assert_eq!(first["deduplicated"], false);
        assert_eq!(first["kind"], "conversion");
        assert_eq!(first["status"], "pending");

        let (second_status, second) =
            send(&state, upload("alice", b"PK\x03\x04site", "both")).await;
        assert_eq!(second_status, StatusCode::OK);
        assert_eq!(second["deduplicated"], true);
        assert_eq!(second["id"], first["id"]);

        assert_eq!(state.store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let state = state_with(fakes());
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"platform\"\r\n\r\nios\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::post("/api/convert/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn test_unknown_platform_is_rejected() {
        let state = state_with(fakes());
        let (status, _) = send(&state, upload("alice", b"PK\x03\x04", "windows")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_collaborator_needs_setup() {
        let state = state_with(Collaborators::default());
        let (status, body) = send(
            &state,
            post_json(
                "/api/github/push",
                "alice",
                json!({ "repoName": "site", "files": { "a.txt": "a" } }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["needsSetup"], true);
        assert!(body["details"].as_str().unwrap().contains("publish"));
        assert!(state.store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_caller() {
        let state = state_with(fakes());
        for project in ["One", "Two"] {
            let (status, _) = send(
                &state,
                post_json("/api/build-mobile", "alice", build_request(project)),
            )
            .await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
        send(
            &state,
            post_json("/api/build-mobile", "bob", build_request("Three")),
        )
        .await;

        let (status, body) = send(&state, get("/api/builds", "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = send(&state, get("/api/builds?limit=1", "alice")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = send(&state, get("/api/builds", "carol")).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_hidden_from_other_users() {
        let state = state_with(fakes());
        let (_, created) = send(
            &state,
            post_json("/api/build-mobile", "alice", build_request("Weather")),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, body) = send(&state, get(&format!("/api/builds/{id}"), "alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projectName"], "Weather");
        assert_eq!(body["status"], "pending");

        let (status, _) = send(&state, get(&format!("/api/builds/{id}"), "bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_flow() {
        let state = state_with(fakes());
        let (_, created) = send(
            &state,
            post_json("/api/build-mobile", "alice", build_request("Weather")),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();
        let cancel = |user: &str| post_json(&format!("/api/builds/{id}/cancel"), user, json!({}));

        let (status, _) = send(&state, cancel("bob")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, cancel("alice")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["cancelRequested"], true);

        let job_id: JobId = serde_json::from_value(created["id"].clone()).unwrap();
        let job = state
            .orchestrator
            .process(job_id, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Failed);

        let (status, body) = send(&state, cancel("alice")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "job has already finished");

        let (_, body) = send(&state, get(&format!("/api/builds/{id}"), "alice")).await;
        assert_eq!(body["status"], "failed");
        assert_eq!(body["lastError"]["message"], "cancelled");
    }

    #[tokio::test]
    async fn test_chat_base_job_must_belong_to_caller() {
        let state = state_with(fakes());
        let (_, created) = send(
            &state,
            post_json("/api/build-mobile", "alice", build_request("Weather")),
        )
        .await;

        let chat = json!({
            "projectName": "Weather v2",
            "messages": [{ "role": "user", "content": "add a dark mode" }],
            "baseJobId": created["id"],
        });
        let (status, _) = send(&state, post_json("/api/ai/chat", "bob", chat.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, post_json("/api/ai/chat", "alice", chat)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["kind"], "ai-generation");
    }

    #[tokio::test]
    async fn test_compile_callback_signature() {
        let state = state_with(fakes()).with_callback_secret(Some("s3cret".to_string()));
        let payload = json!({ "jobId": JobId::new(), "compileJobId": "42" }).to_string();

        let signed = Request::post("/api/compile/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .header(compile::SIGNATURE_HEADER, compile::sign("s3cret", payload.as_bytes()))
            .body(Body::from(payload.clone()))
            .unwrap();
        let (status, body) = send(&state, signed).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["woken"], false);

        let forged = Request::post("/api/compile/callback")
            .header(header::CONTENT_TYPE, "application/json")
            .header(compile::SIGNATURE_HEADER, compile::sign("guess", payload.as_bytes()))
            .body(Body::from(payload))
            .unwrap();
        let (status, _) = send(&state, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_compile_callback_without_secret_needs_setup() {
        let state = state_with(fakes());
        let (status, body) = send(
            &state,
            post_json("/api/compile/callback", "x", json!({ "jobId": JobId::new() })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["needsSetup"], true);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let state = state_with(fakes()).with_max_body_bytes(64);
        let request = post_json(
            "/api/build-mobile",
            "alice",
            json!({
                "projectName": "Big",
                "files": { "index.html": "x".repeat(1024) },
            }),
        );
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health() {
        let state = state_with(Collaborators {
            compile: None,
            ..fakes()
        });

        let (status, body) = send(&state, get("/health", "x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = send(&state, get("/health/ready", "x")).await;
        assert_eq!(body["collaborators"]["conversion"], true);
        assert_eq!(body["collaborators"]["compile"], false);
    }
}
