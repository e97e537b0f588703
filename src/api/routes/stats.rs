//! System statistics endpoint

use axum::{Json, extract::State};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{CollectorInfo, StatsResponse};

/// GET /api/v1/stats
///
/// Returns ingestion counters, the backend summary and the running collectors
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let storage = state
        .storage
        .get_stats()
        .await
        .ok_or_else(|| ApiError::Internal("storage actor is not running".to_string()))?;

    let backend = state.backend.get_stats().await?;

    let collectors = state
        .collectors
        .iter()
        .map(|collector| CollectorInfo {
            name: collector.display_name.clone(),
            kind: collector.kind,
            nodes: collector.node_count,
        })
        .collect();

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        backend,
        collectors,
    }))
}
