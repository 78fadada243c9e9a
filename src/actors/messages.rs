//! Message types for actor communication
//!
//! Commands travel over mpsc channels to a single actor, optionally carrying a
//! oneshot `respond_to` for request/response. Events are broadcast to any
//! number of subscribers and may lag for slow ones.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::IngestError;
use crate::notify::NotificationEvent;
use crate::telemetry::MetricValue;
use crate::{Alert, AlertType, MachineId, MachineTelemetryState, UsageEvent};

/// A raw message as handed over by the transport
#[derive(Debug, Clone)]
pub struct TelemetryMessage {
    pub topic: String,
    pub payload: Vec<u8>,

    /// When the transport received the message; used when the payload
    /// carries no timestamp of its own
    pub received_at: DateTime<Utc>,
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Event published after the pipeline changed something
///
/// Published on a broadcast channel; subscribers that fall behind miss
/// events, nothing else is affected.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A snapshot was updated
    StateChanged(MachineTelemetryState),

    /// A brew was recorded
    UsageRecorded(UsageEvent),

    AlertOpened(Alert),

    AlertResolved(Alert),
}

/// Commands accepted by the ingest actor
#[derive(Debug)]
pub enum IngestCommand {
    /// Route, parse and dispatch a message
    Message(TelemetryMessage),

    /// Resolve one alert on the worker owning its machine
    ResolveAlert {
        machine_id: MachineId,
        alert_id: u64,
        respond_to: oneshot::Sender<Result<Option<Alert>, IngestError>>,
    },

    /// Resolve all open alerts of a type for a machine
    ResolveAlerts {
        machine_id: MachineId,
        alert_type: AlertType,
        respond_to: oneshot::Sender<Result<Vec<Alert>, IngestError>>,
    },

    /// Answer once every message received before this command is processed
    Flush { respond_to: oneshot::Sender<()> },

    /// Process what is queued, then stop
    Shutdown,
}

/// Commands accepted by a machine worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Apply a parsed value to a machine's snapshot
    Apply {
        machine_id: MachineId,
        value: MetricValue,
        observed_at: DateTime<Utc>,
    },

    ResolveAlert {
        machine_id: MachineId,
        alert_id: u64,
        respond_to: oneshot::Sender<Result<Option<Alert>, IngestError>>,
    },

    ResolveAlerts {
        machine_id: MachineId,
        alert_type: AlertType,
        respond_to: oneshot::Sender<Result<Vec<Alert>, IngestError>>,
    },

    Flush { respond_to: oneshot::Sender<()> },
}

impl WorkerCommand {
    /// Answer a command that never reached its worker
    pub fn reject(self, err: IngestError) {
        match self {
            WorkerCommand::ResolveAlert { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            WorkerCommand::ResolveAlerts { respond_to, .. } => {
                let _ = respond_to.send(Err(err));
            }
            WorkerCommand::Apply { .. } | WorkerCommand::Flush { .. } => {}
        }
    }
}

/// Commands accepted by the notifier actor
#[derive(Debug)]
pub enum NotifierCommand {
    Notify(NotificationEvent),

    /// Answer once every notification queued before this command is delivered
    Flush { respond_to: oneshot::Sender<()> },

    /// Deliver what is queued, then stop
    Shutdown,
}

/// Notifier statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotifierStats {
    /// Events taken off the queue
    pub received: u64,

    /// Successful sink deliveries
    pub delivered: u64,

    /// Failed or timed out sink deliveries
    pub failed: u64,

    /// Events dropped because the queue was full
    pub dropped: u64,
}

/// Ingestion statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub applied: u64,
    pub stale: u64,
    pub usage_recorded: u64,
    pub alerts_opened: u64,
    pub alerts_suppressed: u64,
    pub alerts_resolved: u64,
    pub malformed_topic: u64,
    pub unparseable_payload: u64,
    pub unknown_machine: u64,
    pub downstream_unavailable: u64,
}

impl IngestStats {
    /// Messages dropped for any reason
    pub fn dropped(&self) -> u64 {
        self.malformed_topic + self.unparseable_payload + self.unknown_machine + self.downstream_unavailable
    }
}
