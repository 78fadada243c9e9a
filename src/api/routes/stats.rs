//! Pipeline statistics and thresholds

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::MachineId;
use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{StatsResponse, ThresholdsResponse},
};

/// GET /api/v1/stats
///
/// Ingestion counters (per-kind drop counts included), notifier counters
/// and a storage summary
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let pipeline = state.pipeline.stats().await?;
    let storage = state.pipeline.backend().get_stats().await?;
    let now = chrono::Utc::now();

    Ok(Json(StatsResponse {
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        pipeline,
        storage,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    /// Show the effective thresholds of this machine
    machine_id: Option<MachineId>,
}

/// GET /api/v1/thresholds
pub async fn get_thresholds(
    State(state): State<ApiState>,
    Query(query): Query<ThresholdQuery>,
) -> Json<ThresholdsResponse> {
    let thresholds = match query.machine_id {
        Some(machine_id) => state.pipeline.thresholds_for(machine_id),
        None => state.pipeline.thresholds(),
    };

    Json(ThresholdsResponse {
        machine_id: query.machine_id,
        thresholds,
    })
}
