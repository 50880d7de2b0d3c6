//! AI code-generation client.

use async_trait::async_trait;
use mobilize_core::FileSet;
use mobilize_core::collaborator::{
    ChatMessage, CodeGenerator, CollaboratorResult, GenerationOutput,
};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::http::{REQUEST_TIMEOUT, USER_AGENT, check_status, decode_json, request_error, trim_base};

const SERVICE: &str = "code generator";

/// Calls `{url}/generate` with the transcript and the current project files.
pub struct HttpCodeGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    messages: &'a [ChatMessage],
    files: &'a FileSet,
}

impl HttpCodeGenerator {
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(base_url),
            api_key,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CodeGenerator for HttpCodeGenerator {
    fn name(&self) -> &'static str {
        "http-generation"
    }

    async fn generate(
        &self,
        transcript: &[ChatMessage],
        files: &FileSet,
    ) -> CollaboratorResult<GenerationOutput> {
        debug!(
            messages = transcript.len(),
            files = files.len(),
            "Requesting generation"
        );

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
            .json(&GenerateRequest {
                messages: transcript,
                files,
            })
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        let response = check_status(SERVICE, response).await?;
        decode_json(SERVICE, response).await
    }
}
