//! Build commands.

use anyhow::{Result, bail};
use mobilize_core::{BuildStatus, JobStatusView, JobSummary, StageOutcome};
use reqwest::Method;
use std::time::Duration;

use super::ApiClient;

pub async fn list(client: &ApiClient, limit: u32) -> Result<()> {
    let builds: Vec<JobSummary> = client
        .send(
            client
                .request(Method::GET, "/api/builds")?
                .query(&[("limit", limit)]),
        )
        .await?;

    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<9} {:<8} CREATED",
        "ID", "PROJECT", "STATUS", "PLATFORM"
    );
    for build in builds {
        println!(
            "{:<38} {:<24} {:<9} {:<8} {}",
            build.id,
            truncate(&build.project_name, 24),
            build.status.as_str(),
            build.platform,
            build.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn fetch(client: &ApiClient, id: &str) -> Result<JobStatusView> {
    client
        .send(client.request(Method::GET, &format!("/api/builds/{}", id))?)
        .await
}

pub async fn show(client: &ApiClient, id: &str) -> Result<()> {
    let view = fetch(client, id).await?;
    print_view(&view);
    Ok(())
}

/// Poll until the build succeeds or fails, printing each state change.
pub async fn watch(client: &ApiClient, id: &str, interval: Duration) -> Result<()> {
    let mut last_version = None;
    loop {
        let view = fetch(client, id).await?;
        if last_version != Some(view.version) {
            println!("{} ({})", view.status, view.state);
            last_version = Some(view.version);
        }

        if view.status.is_finished() {
            print_view(&view);
            if view.status == BuildStatus::Failed {
                bail!("Build failed");
            }
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn cancel(client: &ApiClient, id: &str) -> Result<()> {
    let view: JobStatusView = client
        .send(client.request(Method::POST, &format!("/api/builds/{}/cancel", id))?)
        .await?;
    println!("Cancellation requested for {} ({})", view.id, view.state);
    Ok(())
}

fn print_view(view: &JobStatusView) {
    println!("Build {}", view.id);
    println!("  project: {}", view.project_name);
    println!("  kind:    {}", view.kind);
    println!("  status:  {} ({})", view.status, view.state);
    if let Some(url) = &view.repo_url {
        println!("  repo:    {}", url);
    }
    if let Some(url) = &view.actions_url {
        println!("  compile: {}", url);
    }
    if let Some(error) = &view.last_error {
        println!("  error:   {}", error);
    }

    if !view.stage_history.is_empty() {
        println!("  history:");
        for entry in &view.stage_history {
            let detail = match &entry.outcome {
                StageOutcome::Retrying { attempt, .. } => format!(" (attempt {})", attempt),
                StageOutcome::Failed { error, .. } => format!(": {}", error.message),
                _ => String::new(),
            };
            println!(
                "    {} {:<8} {}{}",
                entry.entered_at.format("%H:%M:%S"),
                entry.stage.as_str(),
                entry.outcome.name(),
                detail
            );
        }
    }

    if let Some(artifacts) = &view.artifacts {
        println!("  artifacts:");
        for (name, url) in artifacts {
            println!("    {}: {}", name, url);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
