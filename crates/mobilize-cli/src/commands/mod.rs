//! CLI command implementations.

pub mod builds;
pub mod upload;

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Thin client over the mobilize HTTP API.
pub struct ApiClient {
    base: Url,
    user: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str, user: &str) -> Result<Self> {
        let mut base =
            Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            user: user.to_string(),
            http: reqwest::Client::new(),
        })
    }

    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid request path: {}", path))?;
        debug!(%method, %url, "API request");
        Ok(self
            .http
            .request(method, url)
            .header("X-User-Id", &self.user))
    }

    /// Send a request and decode the JSON body, turning API errors into
    /// readable messages.
    pub async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.context("Failed to reach API server")?;
        let response = check(response).await?;
        response.json().await.context("Unexpected response from API server")
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body["error"].as_str().unwrap_or("request failed");
    match body["details"].as_str() {
        Some(details) => bail!("{} ({}): {}", message, status, details),
        None => bail!("{} ({})", message, status),
    }
}

pub fn validate(path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    match mobilize_config::parse_system_config(&content) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  bind: {}", config.server.bind);
            println!(
                "  store: {}",
                if config.database.is_some() {
                    "postgres"
                } else {
                    "in-memory"
                }
            );
            println!("  workers: {}", config.orchestrator.workers);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
