//! Alert listing, statistics and resolution

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertStatsResponse, AlertsResponse},
};
use crate::notify::AlertSummary;
use crate::storage::AlertQuery;
use crate::{Alert, AlertType, MachineId, Severity};

/// Filters for GET /api/v1/alerts
#[derive(Debug, Default, Deserialize)]
pub struct AlertListQuery {
    machine_id: Option<MachineId>,

    /// Alert type, e.g. `LOW_WATER`
    #[serde(rename = "type")]
    alert_type: Option<String>,

    severity: Option<String>,

    resolved: Option<bool>,

    limit: Option<usize>,
}

impl AlertListQuery {
    fn to_query(&self) -> ApiResult<AlertQuery> {
        let alert_type = self
            .alert_type
            .as_deref()
            .map(|token| {
                AlertType::from_token(token)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("unknown alert type '{token}'")))
            })
            .transpose()?;

        let severity = self
            .severity
            .as_deref()
            .map(|token| {
                Severity::from_token(token)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("unknown severity '{token}'")))
            })
            .transpose()?;

        Ok(AlertQuery {
            machine_id: self.machine_id,
            alert_type,
            severity,
            resolved: self.resolved,
            limit: self.limit,
        })
    }
}

/// GET /api/v1/alerts
///
/// Alert history, newest first
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertListQuery>,
) -> ApiResult<Json<AlertsResponse>> {
    let alerts = state
        .pipeline
        .backend()
        .query_alerts(query.to_query()?)
        .await?;

    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

/// GET /api/v1/alerts/summary
pub async fn get_alert_stats(State(state): State<ApiState>) -> ApiResult<Json<AlertStatsResponse>> {
    let all = state
        .pipeline
        .backend()
        .query_alerts(AlertQuery::default())
        .await?;

    let open: Vec<Alert> = all.iter().filter(|alert| !alert.resolved).cloned().collect();

    let mut open_by_type: BTreeMap<String, usize> = AlertType::ALL
        .iter()
        .map(|kind| (kind.to_string(), 0))
        .collect();
    for alert in &open {
        *open_by_type.entry(alert.alert_type.to_string()).or_default() += 1;
    }

    Ok(Json(AlertStatsResponse {
        open: AlertSummary::from_alerts(&open),
        open_by_type,
        total: all.len(),
    }))
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<u64>,
) -> ApiResult<Json<Alert>> {
    state
        .pipeline
        .backend()
        .get_alert(alert_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("alert #{alert_id} not found")))
}

/// POST /api/v1/alerts/:id/resolve
///
/// 404 when the alert does not exist or is already resolved
pub async fn resolve_alert(
    State(state): State<ApiState>,
    Path(alert_id): Path<u64>,
) -> ApiResult<Json<Alert>> {
    state
        .pipeline
        .resolve_alert(alert_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no open alert #{alert_id}")))
}
