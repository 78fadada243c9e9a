//! Channel name routing
//!
//! Machines publish on `coffeeMachine/{machineId}/{metric}`. Anything else is
//! rejected with a [`TopicError`] so the caller can log and drop it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::MachineId;

/// First segment of every telemetry channel
pub const TOPIC_PREFIX: &str = "coffeeMachine";

/// The metric carried on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Temperature,
    WaterLevel,
    MilkLevel,
    BeansLevel,
    Status,
    Usage,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Temperature,
        MetricKind::WaterLevel,
        MetricKind::MilkLevel,
        MetricKind::BeansLevel,
        MetricKind::Status,
        MetricKind::Usage,
    ];

    /// The channel segment naming this metric
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Temperature => "temperature",
            MetricKind::WaterLevel => "waterLevel",
            MetricKind::MilkLevel => "milkLevel",
            MetricKind::BeansLevel => "beansLevel",
            MetricKind::Status => "status",
            MetricKind::Usage => "usage",
        }
    }

    /// Channel segments are matched exactly (they are case-sensitive on the broker too).
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == segment)
    }

    /// Broker subscription filter for this metric across all machines
    pub fn subscription_filter(&self) -> String {
        format!("{TOPIC_PREFIX}/+/{}", self.as_str())
    }

    /// Channel name for a given machine
    pub fn topic_for(&self, machine_id: MachineId) -> String {
        format!("{TOPIC_PREFIX}/{machine_id}/{}", self.as_str())
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully decoded channel name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub machine_id: MachineId,
    pub kind: MetricKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// Expected exactly three `/`-separated segments
    SegmentCount(usize),

    /// First segment is not the telemetry prefix
    Prefix(String),

    /// Machine id is not a positive integer
    MachineId(String),

    /// Metric segment names no known metric
    MetricKind(String),
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::SegmentCount(count) => {
                write!(f, "expected 3 topic segments, found {count}")
            }
            TopicError::Prefix(prefix) => {
                write!(f, "unexpected topic prefix '{prefix}' (expected '{TOPIC_PREFIX}')")
            }
            TopicError::MachineId(id) => write!(f, "invalid machine id '{id}'"),
            TopicError::MetricKind(kind) => write!(f, "unknown metric kind '{kind}'"),
        }
    }
}

impl std::error::Error for TopicError {}

/// Decode a channel name into machine id and metric kind
pub fn parse_topic(topic: &str) -> Result<Route, TopicError> {
    let segments: Vec<&str> = topic.split('/').collect();

    let [prefix, machine_id, kind] = segments.as_slice() else {
        return Err(TopicError::SegmentCount(segments.len()));
    };

    if *prefix != TOPIC_PREFIX {
        return Err(TopicError::Prefix(prefix.to_string()));
    }

    let machine_id = parse_machine_id(machine_id)?;

    let kind =
        MetricKind::from_segment(kind).ok_or_else(|| TopicError::MetricKind(kind.to_string()))?;

    Ok(Route { machine_id, kind })
}

fn parse_machine_id(segment: &str) -> Result<MachineId, TopicError> {
    // `u64::from_str` accepts a leading '+', which is not a valid id here
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TopicError::MachineId(segment.to_string()));
    }

    match segment.parse::<MachineId>() {
        Ok(0) | Err(_) => Err(TopicError::MachineId(segment.to_string())),
        Ok(id) => Ok(id),
    }
}
