//! Native compile service client.

use async_trait::async_trait;
use mobilize_core::collaborator::{
    CollaboratorError, CollaboratorResult, CompileHandle, CompilePoll, CompileService,
    CompileState, RepoRef,
};
use mobilize_core::{Platform, PlatformSet};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::http::{REQUEST_TIMEOUT, USER_AGENT, check_status, decode_json, request_error, trim_base};

const SERVICE: &str = "compile service";

/// Starts and polls builds on `{url}/builds`.
pub struct HttpCompileService {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    repo_url: &'a str,
    commit_id: &'a str,
    platforms: Vec<Platform>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    id: String,
    #[serde(default)]
    status_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollResponse {
    state: CompileState,
    #[serde(default)]
    artifact_urls: BTreeMap<Platform, String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpCompileService {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url),
            token,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("User-Agent", USER_AGENT).timeout(self.timeout);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }
}

#[async_trait]
impl CompileService for HttpCompileService {
    fn name(&self) -> &'static str {
        "http-compile"
    }

    async fn start_compile(
        &self,
        repo: &RepoRef,
        platforms: &PlatformSet,
    ) -> CollaboratorResult<CompileHandle> {
        let response = self
            .authorize(self.client.post(format!("{}/builds", self.base_url)))
            .json(&StartRequest {
                repo_url: &repo.repo_url,
                commit_id: &repo.commit_id,
                platforms: platforms.iter().copied().collect(),
            })
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        let response = check_status(SERVICE, response).await?;
        let started: StartResponse = decode_json(SERVICE, response).await?;
        if started.id.is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "compile service returned an empty build id".to_string(),
            ));
        }
        debug!(compile_job_id = %started.id, repo = %repo.full_name, "Compile started");

        let status_url = started
            .status_url
            .unwrap_or_else(|| format!("{}/builds/{}", self.base_url, started.id));
        Ok(CompileHandle {
            compile_job_id: started.id,
            status_url,
        })
    }

    async fn poll_compile(&self, handle: &CompileHandle) -> CollaboratorResult<CompilePoll> {
        let url = format!(
            "{}/builds/{}",
            self.base_url,
            urlencoding::encode(&handle.compile_job_id)
        );
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        let response = check_status(SERVICE, response).await?;
        let poll: PollResponse = decode_json(SERVICE, response).await?;
        Ok(CompilePoll {
            state: poll.state,
            artifact_urls: poll.artifact_urls,
            message: poll.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::serve;
    use axum::Router;
    use axum::extract::Path;
    use axum::routing::{get, post};

    fn repo() -> RepoRef {
        RepoRef {
            repo_url: "https://github.com/acme/demo".to_string(),
            full_name: "acme/demo".to_string(),
            commit_id: "abc123".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_and_poll() {
        let router = Router::new()
            .route(
                "/builds",
                post(|axum::Json(body): axum::Json<serde_json::Value>| async move {
                    assert_eq!(body["commitId"], "abc123");
                    assert_eq!(body["platforms"], serde_json::json!(["ios", "android"]));
                    axum::Json(serde_json::json!({ "id": "b-7" }))
                }),
            )
            .route(
                "/builds/{id}",
                get(|Path(id): Path<String>| async move {
                    axum::Json(serde_json::json!({
                        "state": "succeeded",
                        "artifactUrls": {
                            "ios": format!("https://dl/{}/app.ipa", id),
                            "android": format!("https://dl/{}/app.apk", id),
                        }
                    }))
                }),
            );
        let base = serve(router).await;
        let service = HttpCompileService::new(&base, Some("t".to_string()));

        let handle = service
            .start_compile(&repo(), &PlatformSet::from([Platform::Ios, Platform::Android]))
            .await
            .unwrap();
        assert_eq!(handle.compile_job_id, "b-7");
        assert_eq!(handle.status_url, format!("{}/builds/b-7", base));

        let poll = service.poll_compile(&handle).await.unwrap();
        assert_eq!(poll.state, CompileState::Succeeded);
        assert_eq!(poll.artifact_urls.len(), 2);
        assert_eq!(
            poll.artifact_urls.get(&Platform::Ios).map(String::as_str),
            Some("https://dl/b-7/app.ipa")
        );
    }

    #[tokio::test]
    async fn test_unknown_state_is_invalid_response() {
        let router = Router::new().route(
            "/builds/{id}",
            get(|| async { axum::Json(serde_json::json!({ "state": "exploded" })) }),
        );
        let service = HttpCompileService::new(&serve(router).await, None);
        let handle = CompileHandle {
            compile_job_id: "x".to_string(),
            status_url: String::new(),
        };

        let err = service.poll_compile(&handle).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidResponse(_)));
    }
}
