//! HTTP handlers for atrium-api, one module per resource.

pub mod blobs;
pub mod invitations;
pub mod messaging;
pub mod notes;
pub mod realtime;
pub mod workflows;
pub mod workspaces;

use axum::{response::IntoResponse, Json};

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
