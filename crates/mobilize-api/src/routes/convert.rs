//! Archive upload endpoint.

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use mobilize_core::platform::parse_platforms;
use mobilize_core::{JobInput, JobKind, NewJob};

use super::{CreatedJob, submit};
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Owner, idempotency_key};

pub fn router() -> Router<AppState> {
    Router::new().route("/convert/upload", post(upload))
}

/// Multipart fields: `file`, `projectName`, `platform`.
async fn upload(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedJob>), ApiError> {
    let mut archive: Option<(String, Vec<u8>)> = None;
    let mut project_name = None;
    let mut platform = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.zip").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                archive = Some((file_name, bytes.to_vec()));
            }
            "projectName" => project_name = Some(text(field).await?),
            "platform" => platform = Some(text(field).await?),
            _ => {}
        }
    }

    let (file_name, archive) =
        archive.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    let project_name = project_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| file_stem(&file_name));
    let platforms = parse_platforms(platform.as_deref().unwrap_or("both"))?;

    submit(
        &state,
        NewJob {
            kind: JobKind::Conversion,
            owner,
            project_name,
            platforms,
            input: JobInput::Archive { file_name, archive },
            idempotency_key: idempotency_key(&headers),
        },
    )
    .await
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid form field: {}", e)))
}

fn file_stem(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("my-app.zip"), "my-app");
        assert_eq!(file_stem("dir/site.tar.gz"), "site.tar");
        assert_eq!(file_stem("noext"), "noext");
    }
}
