//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Reports which collaborators are configured.
async fn ready(State(state): State<AppState>) -> Json<Value> {
    let c = &state.collaborators;
    Json(json!({
        "status": "ready",
        "collaborators": {
            "conversion": c.conversion.is_some(),
            "generation": c.generation.is_some(),
            "publisher": c.publisher.is_some(),
            "compile": c.compile.is_some(),
        }
    }))
}
