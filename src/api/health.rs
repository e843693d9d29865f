use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};

pub const SERVICE_NAME: &str = "gitea-astro-webhook";

/// Liveness probe
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

/// Everything the router does not know about
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
