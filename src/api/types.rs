//! Shared API request and response types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::notify::AlertSummary;
use crate::pipeline::PipelineStats;
use crate::storage::{HealthStatus, MachineRecord};
use crate::{Alert, MachineId, UsageEvent};

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage: HealthStatus,
    pub timestamp: String,
}

/// Response for GET /api/v1/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub uptime_secs: i64,
    pub pipeline: PipelineStats,
    pub storage: String,
}

/// Response for GET /api/v1/thresholds
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<MachineId>,
    pub thresholds: Thresholds,
}

/// Response for GET /api/v1/machines
#[derive(Debug, Clone, Serialize)]
pub struct MachinesResponse {
    pub machines: Vec<MachineRecord>,
    pub count: usize,
}

/// Response for the alert listings
#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

/// Response for GET /api/v1/machines/:id/usage
#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub machine_id: MachineId,
    pub events: Vec<UsageEvent>,
    pub count: usize,
}

/// Response for GET /api/v1/alerts/summary
#[derive(Debug, Clone, Serialize)]
pub struct AlertStatsResponse {
    /// Open alerts by severity
    pub open: AlertSummary,

    /// Open alerts by type
    pub open_by_type: BTreeMap<String, usize>,

    /// Alerts ever opened, resolved ones included
    pub total: usize,
}

/// Body of POST /api/v1/telemetry
///
/// `payload` is either the raw payload as a string, or a JSON object that is
/// forwarded as its serialized form.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryRequest {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl TelemetryRequest {
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            serde_json::Value::String(raw) => raw.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Response for POST /api/v1/telemetry
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryAccepted {
    pub accepted: bool,
    pub topic: String,
}
