//! GitHub publisher.
//!
//! Commits the whole file set as one commit on the repository's default
//! branch, creating the repository on first publish.

use async_trait::async_trait;
use mobilize_config::GitHubConfig;
use mobilize_core::FileSet;
use mobilize_core::collaborator::{CollaboratorResult, Publisher, RepoRef};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use crate::http::{REQUEST_TIMEOUT, USER_AGENT, check_status, decode_json, request_error, trim_base};

const SERVICE: &str = "github";

/// GitHub API client used for publishing.
pub struct GitHubPublisher {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    org: Option<String>,
    private_repos: bool,
    access_token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    html_url: String,
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: GitObject,
}

#[derive(Debug, Deserialize)]
struct GitObject {
    sha: String,
}

impl GitHubPublisher {
    pub fn new(config: &GitHubConfig, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: trim_base(&config.api_url),
            owner: config.owner.clone(),
            org: config.org.clone(),
            private_repos: config.private_repos,
            access_token,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Account the repositories live under.
    fn repo_owner(&self) -> &str {
        self.org.as_deref().unwrap_or(&self.owner)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .timeout(self.timeout)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> CollaboratorResult<T> {
        let response = builder.send().await.map_err(|e| request_error(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        decode_json(SERVICE, response).await
    }

    async fn get_repo(&self, name: &str) -> CollaboratorResult<Option<GitHubRepo>> {
        let path = format!(
            "/repos/{}/{}",
            urlencoding::encode(self.repo_owner()),
            urlencoding::encode(name)
        );
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(SERVICE, response).await?;
        decode_json(SERVICE, response).await.map(Some)
    }

    /// Find the repository, creating it when it does not exist yet.
    async fn ensure_repo(&self, name: &str) -> CollaboratorResult<GitHubRepo> {
        if let Some(repo) = self.get_repo(name).await? {
            return Ok(repo);
        }

        let path = match &self.org {
            Some(org) => format!("/orgs/{}/repos", urlencoding::encode(org)),
            None => "/user/repos".to_string(),
        };
        let payload = serde_json::json!({
            "name": name,
            "private": self.private_repos,
            "auto_init": true,
            "description": "Generated by Mobilize",
        });
        let response = self
            .request(Method::POST, &path)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        // 422 means a concurrent publish created it first
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            if let Some(repo) = self.get_repo(name).await? {
                return Ok(repo);
            }
        }
        let response = check_status(SERVICE, response).await?;
        let repo: GitHubRepo = decode_json(SERVICE, response).await?;
        info!(repo = %repo.full_name, "Created repository");
        Ok(repo)
    }
}

#[async_trait]
impl Publisher for GitHubPublisher {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn publish(&self, files: &FileSet, repo_name: &str) -> CollaboratorResult<RepoRef> {
        let repo = self.ensure_repo(repo_name).await?;
        let full_name = &repo.full_name;
        let branch = urlencoding::encode(&repo.default_branch).into_owned();

        let head: GitRef = self
            .send(self.request(
                Method::GET,
                &format!("/repos/{}/git/ref/heads/{}", full_name, branch),
            ))
            .await?;

        let tree: Vec<serde_json::Value> = files
            .iter()
            .map(|(path, content)| {
                serde_json::json!({
                    "path": path,
                    "mode": "100644",
                    "type": "blob",
                    "content": content,
                })
            })
            .collect();
        let tree: GitObject = self
            .send(
                self.request(Method::POST, &format!("/repos/{}/git/trees", full_name))
                    .json(&serde_json::json!({ "tree": tree })),
            )
            .await?;

        let commit: GitObject = self
            .send(
                self.request(Method::POST, &format!("/repos/{}/git/commits", full_name))
                    .json(&serde_json::json!({
                        "message": format!("Publish {} files", files.len()),
                        "tree": tree.sha,
                        "parents": [head.object.sha],
                    })),
            )
            .await?;

        let _: serde_json::Value = self
            .send(
                self.request(
                    Method::PATCH,
                    &format!("/repos/{}/git/refs/heads/{}", full_name, branch),
                )
                .json(&serde_json::json!({ "sha": commit.sha, "force": false })),
            )
            .await?;

        debug!(repo = %full_name, commit = %commit.sha, files = files.len(), "Published files");
        Ok(RepoRef {
            repo_url: repo.html_url,
            full_name: repo.full_name,
            commit_id: commit.sha,
        })
    }
}
