//! Errors raised while ingesting a single telemetry message
//!
//! None of these stop the pipeline: the offending message is logged with
//! enough context to diagnose and dropped, and the next one is processed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::MachineId;
use crate::storage::{StorageError, StorageResult};
use crate::telemetry::{MetricKind, ParseError, TopicError};

#[derive(Debug)]
pub enum IngestError {
    /// The channel name cannot be routed
    MalformedTopic { topic: String, reason: TopicError },

    /// The payload does not decode, or a value is out of range
    UnparseablePayload {
        machine_id: MachineId,
        kind: MetricKind,
        payload: String,
        reason: ParseError,
    },

    /// Valid message for a machine the registry does not know
    UnknownMachine { machine_id: MachineId },

    /// Storage or a queue failed or did not answer in time
    DownstreamUnavailable {
        machine_id: Option<MachineId>,
        operation: &'static str,
        reason: String,
    },
}

/// Coarse classification, used for drop counters and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestErrorKind {
    MalformedTopic,
    UnparseablePayload,
    UnknownMachine,
    DownstreamUnavailable,
}

impl IngestError {
    pub fn kind(&self) -> IngestErrorKind {
        match self {
            IngestError::MalformedTopic { .. } => IngestErrorKind::MalformedTopic,
            IngestError::UnparseablePayload { .. } => IngestErrorKind::UnparseablePayload,
            IngestError::UnknownMachine { .. } => IngestErrorKind::UnknownMachine,
            IngestError::DownstreamUnavailable { .. } => IngestErrorKind::DownstreamUnavailable,
        }
    }

    pub fn machine_id(&self) -> Option<MachineId> {
        match self {
            IngestError::MalformedTopic { .. } => None,
            IngestError::UnparseablePayload { machine_id, .. }
            | IngestError::UnknownMachine { machine_id } => Some(*machine_id),
            IngestError::DownstreamUnavailable { machine_id, .. } => *machine_id,
        }
    }

    pub(crate) fn downstream(
        machine_id: Option<MachineId>,
        operation: &'static str,
        reason: impl fmt::Display,
    ) -> Self {
        IngestError::DownstreamUnavailable {
            machine_id,
            operation,
            reason: reason.to_string(),
        }
    }

    /// Map a storage failure, keeping unknown machines distinguishable
    pub(crate) fn from_storage(
        machine_id: MachineId,
        operation: &'static str,
        err: StorageError,
    ) -> Self {
        match err {
            StorageError::UnknownMachine(id) => IngestError::UnknownMachine { machine_id: id },
            other => IngestError::downstream(Some(machine_id), operation, other),
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::MalformedTopic { topic, reason } => {
                write!(f, "malformed topic '{topic}': {reason}")
            }
            IngestError::UnparseablePayload {
                machine_id,
                kind,
                payload,
                reason,
            } => write!(
                f,
                "unparseable {kind} payload for machine {machine_id} ('{payload}'): {reason}"
            ),
            IngestError::UnknownMachine { machine_id } => {
                write!(f, "machine {machine_id} is not registered")
            }
            IngestError::DownstreamUnavailable {
                machine_id: Some(machine_id),
                operation,
                reason,
            } => write!(f, "{operation} for machine {machine_id} failed: {reason}"),
            IngestError::DownstreamUnavailable {
                machine_id: None,
                operation,
                reason,
            } => write!(f, "{operation} failed: {reason}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::MalformedTopic { reason, .. } => Some(reason),
            IngestError::UnparseablePayload { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Run a storage call with a deadline
///
/// A timeout or storage failure becomes [`IngestError::DownstreamUnavailable`]
/// (or [`IngestError::UnknownMachine`] when storage says so).
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    machine_id: MachineId,
    operation: &'static str,
    call: impl Future<Output = StorageResult<T>>,
) -> Result<T, IngestError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(IngestError::from_storage(machine_id, operation, err)),
        Err(_) => Err(IngestError::downstream(
            Some(machine_id),
            operation,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}
