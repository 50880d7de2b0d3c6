//! Archive upload command.

use anyhow::{Context, Result};
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;

use super::ApiClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedJob {
    id: String,
    status: String,
    deduplicated: bool,
}

pub async fn upload(
    client: &ApiClient,
    archive: &str,
    project: Option<String>,
    platform: &str,
) -> Result<()> {
    let path = Path::new(archive);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read archive: {}", archive))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.zip")
        .to_string();

    let file = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/zip")?;
    let mut form = Form::new()
        .part("file", file)
        .text("platform", platform.to_string());
    if let Some(project) = project {
        form = form.text("projectName", project);
    }

    let created: CreatedJob = client
        .send(
            client
                .request(Method::POST, "/api/convert/upload")?
                .multipart(form),
        )
        .await?;

    if created.deduplicated {
        println!("Matching build already exists: {} ({})", created.id, created.status);
    } else {
        println!("Build queued: {}", created.id);
    }
    println!("Follow it with: mobilize builds watch {}", created.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::serve;
    use axum::Json;
    use axum::extract::Multipart;
    use axum::routing::post;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_upload_sends_archive_and_fields() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::default();
        let recorder = seen.clone();
        let router = axum::Router::new().route(
            "/api/convert/upload",
            post(move |mut multipart: Multipart| {
                let recorder = recorder.clone();
                async move {
                    while let Some(field) = multipart.next_field().await.unwrap() {
                        let name = field.name().unwrap().to_string();
                        let value = match field.file_name() {
                            Some(file_name) => file_name.to_string(),
                            None => field.text().await.unwrap(),
                        };
                        recorder.lock().unwrap().push((name, value));
                    }
                    Json(json!({
                        "id": "0192e4a0-0000-7000-8000-000000000001",
                        "kind": "conversion",
                        "status": "pending",
                        "state": "pending",
                        "deduplicated": false,
                    }))
                }
            }),
        );

        let dir = std::env::temp_dir().join(format!("mobilize-upload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let archive = dir.join("weather.zip");
        std::fs::write(&archive, b"PK\x03\x04").unwrap();

        let client = ApiClient::new(&serve(router).await, "alice").unwrap();
        upload(
            &client,
            archive.to_str().unwrap(),
            Some("Weather".to_string()),
            "ios",
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.contains(&("file".to_string(), "weather.zip".to_string())));
        assert!(seen.contains(&("platform".to_string(), "ios".to_string())));
        assert!(seen.contains(&("projectName".to_string(), "Weather".to_string())));

        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let client = ApiClient::new("http://127.0.0.1:9", "alice").unwrap();
        let err = upload(&client, "/nonexistent/site.zip", None, "both")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read archive"));
    }
}
