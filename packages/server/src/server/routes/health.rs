use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    components: Vec<String>,
    workers: usize,
}

/// Health check endpoint
///
/// Reports the registered components. The registry is built at startup, so
/// a running server is always healthy.
pub async fn health_handler(Extension(state): Extension<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            components: state.registry.names(),
            workers: state.config.workers,
        }),
    )
}
