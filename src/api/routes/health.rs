//! Health check endpoints

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /ping
///
/// Fixed liveness response for uptime checkers
pub async fn ping() -> &'static str {
    "ok"
}

/// GET /health
///
/// Returns a simple health check response
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        observers: state.protocol.broadcaster().observer_count().await,
    })
}
