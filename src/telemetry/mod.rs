//! Decoding of raw telemetry messages
//!
//! [`topic`] turns the channel name into a machine id and metric kind,
//! [`payload`] turns the body into a validated value for that metric.

pub mod payload;
pub mod topic;

pub use payload::{
    Field, MetricValue, ParseError, ParsedPayload, StateUpdate, UsageReading, parse_payload,
    parse_timestamp,
};
pub use topic::{MetricKind, Route, TOPIC_PREFIX, TopicError, parse_topic};

/// Split a bridge line (`topic payload`) into its parts
///
/// This is the format `mosquitto_sub -v` prints. The payload is everything
/// after the first run of whitespace and may itself contain spaces. Blank
/// lines yield `None`.
pub fn split_bridge_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.split_once(char::is_whitespace) {
        Some((topic, payload)) => Some((topic, payload.trim_start())),
        None => Some((line, "")),
    }
}
