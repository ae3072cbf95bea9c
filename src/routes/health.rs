use axum::{Router, routing::get, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/health", get(health_check))
}

async fn hello() -> &'static str {
    "Hello, World!"
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
