//! Machine state, alert and usage endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertsResponse, MachinesResponse, UsageResponse},
};
use crate::storage::{AlertQuery, MachineRecord};
use crate::{AlertType, MachineId};

/// Default number of brews returned by the usage endpoint
const DEFAULT_USAGE_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct MachineAlertQuery {
    resolved: Option<bool>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    limit: Option<usize>,
}

async fn require_machine(state: &ApiState, machine_id: MachineId) -> ApiResult<MachineRecord> {
    state
        .pipeline
        .backend()
        .get_machine(machine_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("machine {machine_id} is not registered")))
}

/// GET /api/v1/machines
///
/// All registered machines with their latest snapshot
pub async fn list_machines(State(state): State<ApiState>) -> ApiResult<Json<MachinesResponse>> {
    let machines = state.pipeline.backend().list_machines().await?;

    Ok(Json(MachinesResponse {
        count: machines.len(),
        machines,
    }))
}

/// GET /api/v1/machines/:id
pub async fn get_machine(
    State(state): State<ApiState>,
    Path(machine_id): Path<MachineId>,
) -> ApiResult<Json<MachineRecord>> {
    Ok(Json(require_machine(&state, machine_id).await?))
}

/// GET /api/v1/machines/:id/alerts
pub async fn get_machine_alerts(
    State(state): State<ApiState>,
    Path(machine_id): Path<MachineId>,
    Query(query): Query<MachineAlertQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    require_machine(&state, machine_id).await?;

    let alerts = state
        .pipeline
        .backend()
        .query_alerts(AlertQuery {
            machine_id: Some(machine_id),
            resolved: query.resolved,
            limit: query.limit,
            ..AlertQuery::default()
        })
        .await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

/// GET /api/v1/machines/:id/usage
///
/// Most recent brews, newest first
pub async fn get_machine_usage(
    State(state): State<ApiState>,
    Path(machine_id): Path<MachineId>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageResponse>> {
    require_machine(&state, machine_id).await?;

    let events = state
        .pipeline
        .backend()
        .query_usage(machine_id, query.limit.unwrap_or(DEFAULT_USAGE_LIMIT))
        .await?;

    Ok(Json(UsageResponse {
        machine_id,
        count: events.len(),
        events,
    }))
}

/// POST /api/v1/machines/:id/alerts/:type/resolve
///
/// Resolve every open alert of a type for a machine
pub async fn resolve_machine_alerts(
    State(state): State<ApiState>,
    Path((machine_id, alert_type)): Path<(MachineId, String)>,
) -> ApiResult<Json<AlertsResponse>> {
    let alert_type = AlertType::from_token(&alert_type)
        .ok_or_else(|| ApiError::InvalidRequest(format!("unknown alert type '{alert_type}'")))?;

    require_machine(&state, machine_id).await?;

    let alerts = state.pipeline.resolve_alerts(machine_id, alert_type).await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}
