//! Liveness endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
///
/// `200 ok` while the backend answers, `503 unavailable` otherwise
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let healthy = match state.backend.health_check().await {
        Ok(health) => health.healthy,
        Err(e) => {
            tracing::warn!("backend health check failed: {}", e);
            false
        }
    };

    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}
