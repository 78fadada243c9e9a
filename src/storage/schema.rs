//! Row types shared by all storage backends
//!
//! The machine registry, the latest telemetry snapshot per machine, the
//! alert history and the brew log. Backends translate these to and from
//! their native representation; the SQLite backend keeps timestamps as Unix
//! milliseconds and the per-field clock as JSON.

use serde::{Deserialize, Serialize};

use crate::{Alert, AlertType, MachineId, MachineTelemetryState, Severity};

/// Registry entry of a known machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// A registered machine together with its latest snapshot
///
/// `state` is `None` until the first reading for the machine was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    #[serde(flatten)]
    pub info: MachineInfo,
    pub state: Option<MachineTelemetryState>,
}

/// An alert that is about to be opened
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub machine_id: MachineId,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub threshold_value: f64,
}

/// Outcome of [`open_alert`](super::StorageBackend::open_alert)
///
/// At most one unresolved alert exists per (machine, type). Opening a second
/// one hands back the alert that is already open instead of inserting.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenAlertResult {
    Opened(Alert),
    AlreadyOpen(Alert),
}

/// Filter for alert history queries
///
/// Results are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertQuery {
    pub machine_id: Option<MachineId>,
    pub alert_type: Option<AlertType>,
    pub severity: Option<Severity>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl AlertQuery {
    /// All unresolved alerts
    pub fn open() -> Self {
        Self {
            resolved: Some(false),
            ..Self::default()
        }
    }

    /// Whether an alert passes every filter that is set
    pub fn matches(&self, alert: &Alert) -> bool {
        self.machine_id.is_none_or(|id| alert.machine_id == id)
            && self.alert_type.is_none_or(|kind| alert.alert_type == kind)
            && self.severity.is_none_or(|severity| alert.severity == severity)
            && self.resolved.is_none_or(|resolved| alert.resolved == resolved)
    }
}
