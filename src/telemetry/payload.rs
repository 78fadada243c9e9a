//! Payload decoding and validation
//!
//! Every metric accepts two encodings:
//!
//! ```text
//! structured   {"temperature": 92.5}   {"level": 85}   {"status": "ON"}
//!              {"brewType": "ESPRESSO", "volumeMl": 30, "tempAtBrew": 92.0}
//! plain text   92.5   85   ON   ESPRESSO:30:92.0
//! ```
//!
//! Structured payloads may carry a `timestamp` (RFC 3339, or an ISO local
//! date-time read as UTC) which becomes the reading's source timestamp.
//!
//! Out-of-range values are rejected, never clamped: a sensor fault must not
//! look like a valid reading.

use std::borrow::Cow;
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::topic::MetricKind;
use crate::{BrewType, MachineStatus};

/// Accepted temperature readings in °C
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.0..=150.0;

/// Accepted supply levels in percent
pub const LEVEL_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// A single-field update of a machine's telemetry state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateUpdate {
    Temperature(f64),
    WaterLevel(u8),
    MilkLevel(u8),
    BeansLevel(u8),
    Status(MachineStatus),
}

/// The state field touched by a [`StateUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Temperature,
    WaterLevel,
    MilkLevel,
    BeansLevel,
    Status,
}

impl StateUpdate {
    pub fn field(&self) -> Field {
        match self {
            StateUpdate::Temperature(_) => Field::Temperature,
            StateUpdate::WaterLevel(_) => Field::WaterLevel,
            StateUpdate::MilkLevel(_) => Field::MilkLevel,
            StateUpdate::BeansLevel(_) => Field::BeansLevel,
            StateUpdate::Status(_) => Field::Status,
        }
    }
}

/// A decoded brew event, before it is attached to a machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReading {
    pub brew_type: BrewType,
    pub volume_ml: Option<u32>,
    pub temp_at_brew_c: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    State(StateUpdate),
    Usage(UsageReading),
}

/// Output of [`parse_payload`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedPayload {
    pub value: MetricValue,

    /// Timestamp reported by the machine, if the payload carried one
    pub source_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Payload bytes are not UTF-8
    NotUtf8,

    /// Payload is empty or whitespace
    Empty,

    /// Payload looks like JSON but does not decode
    InvalidJson(String),

    /// Structured payload lacks the key this metric needs
    MissingKey(&'static str),

    /// Value is not a number (or not an integer where one is required)
    NotANumber { field: &'static str, value: String },

    /// Numeric value outside the accepted range
    OutOfRange { field: &'static str, value: f64 },

    UnknownStatus(String),

    UnknownBrewType(String),

    /// Plain-text usage payload with too many `:` segments
    TooManySegments(usize),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotUtf8 => write!(f, "payload is not valid UTF-8"),
            ParseError::Empty => write!(f, "payload is empty"),
            ParseError::InvalidJson(msg) => write!(f, "invalid JSON payload: {msg}"),
            ParseError::MissingKey(key) => write!(f, "missing key '{key}'"),
            ParseError::NotANumber { field, value } => {
                write!(f, "{field} is not a valid number: '{value}'")
            }
            ParseError::OutOfRange { field, value } => {
                write!(f, "{field} out of range: {value}")
            }
            ParseError::UnknownStatus(status) => write!(f, "unknown machine status '{status}'"),
            ParseError::UnknownBrewType(brew) => write!(f, "unknown brew type '{brew}'"),
            ParseError::TooManySegments(count) => {
                write!(f, "usage payload has {count} segments (at most 3 allowed)")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Decode a raw payload for the given metric
pub fn parse_payload(kind: MetricKind, raw: &[u8]) -> Result<ParsedPayload, ParseError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ParseError::NotUtf8)?
        .trim();

    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    if text.starts_with('{') {
        let json: Map<String, Value> =
            serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        return parse_structured(kind, &json);
    }

    // A JSON string literal ("92.5") is unwrapped and read as plain text
    let scalar: Cow<'_, str> = if text.starts_with('"') {
        let inner: String =
            serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        Cow::Owned(inner)
    } else {
        Cow::Borrowed(text)
    };

    let scalar = scalar.trim();
    if scalar.is_empty() {
        return Err(ParseError::Empty);
    }

    Ok(ParsedPayload {
        value: parse_plain(kind, scalar)?,
        source_timestamp: None,
    })
}

fn parse_structured(kind: MetricKind, json: &Map<String, Value>) -> Result<ParsedPayload, ParseError> {
    let value = match kind {
        MetricKind::Temperature => {
            let raw = json
                .get("temperature")
                .ok_or(ParseError::MissingKey("temperature"))?;
            MetricValue::State(StateUpdate::Temperature(temperature(json_number(
                "temperature",
                raw,
            )?)?))
        }
        MetricKind::WaterLevel => {
            MetricValue::State(StateUpdate::WaterLevel(structured_level(json)?))
        }
        MetricKind::MilkLevel => MetricValue::State(StateUpdate::MilkLevel(structured_level(json)?)),
        MetricKind::BeansLevel => {
            MetricValue::State(StateUpdate::BeansLevel(structured_level(json)?))
        }
        MetricKind::Status => {
            let raw = json.get("status").ok_or(ParseError::MissingKey("status"))?;
            let token = raw
                .as_str()
                .ok_or_else(|| ParseError::UnknownStatus(raw.to_string()))?;
            MetricValue::State(StateUpdate::Status(status(token)?))
        }
        MetricKind::Usage => MetricValue::Usage(structured_usage(json)?),
    };

    let source_timestamp = json
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Ok(ParsedPayload {
        value,
        source_timestamp,
    })
}

fn structured_level(json: &Map<String, Value>) -> Result<u8, ParseError> {
    let raw = json.get("level").ok_or(ParseError::MissingKey("level"))?;
    level(json_number("level", raw)?, raw.to_string())
}

fn structured_usage(json: &Map<String, Value>) -> Result<UsageReading, ParseError> {
    let raw = json.get("brewType").ok_or(ParseError::MissingKey("brewType"))?;
    let token = raw
        .as_str()
        .ok_or_else(|| ParseError::UnknownBrewType(raw.to_string()))?;
    let brew_type = brew_type(token)?;

    // `volume` / `temperature` are the older key names some firmware still sends
    let volume_ml = match json.get("volumeMl").or_else(|| json.get("volume")) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(volume(json_number("volumeMl", raw)?, raw.to_string())?),
    };

    let temp_at_brew_c = match json.get("tempAtBrew").or_else(|| json.get("temperature")) {
        None | Some(Value::Null) => None,
        Some(raw) => Some(brew_temperature(json_number("tempAtBrew", raw)?)?),
    };

    Ok(UsageReading {
        brew_type,
        volume_ml,
        temp_at_brew_c,
    })
}

fn parse_plain(kind: MetricKind, text: &str) -> Result<MetricValue, ParseError> {
    let value = match kind {
        MetricKind::Temperature => {
            MetricValue::State(StateUpdate::Temperature(temperature(text_number(
                "temperature",
                text,
            )?)?))
        }
        MetricKind::WaterLevel => MetricValue::State(StateUpdate::WaterLevel(text_level(text)?)),
        MetricKind::MilkLevel => MetricValue::State(StateUpdate::MilkLevel(text_level(text)?)),
        MetricKind::BeansLevel => MetricValue::State(StateUpdate::BeansLevel(text_level(text)?)),
        MetricKind::Status => MetricValue::State(StateUpdate::Status(status(text)?)),
        MetricKind::Usage => MetricValue::Usage(plain_usage(text)?),
    };

    Ok(value)
}

fn text_level(text: &str) -> Result<u8, ParseError> {
    level(text_number("level", text)?, text.to_string())
}

/// `brewType[:volumeMl[:temperature]]`
fn plain_usage(text: &str) -> Result<UsageReading, ParseError> {
    let segments: Vec<&str> = text.split(':').map(str::trim).collect();
    if segments.len() > 3 {
        return Err(ParseError::TooManySegments(segments.len()));
    }

    let brew_type = brew_type(segments[0])?;

    let volume_ml = match segments.get(1) {
        None | Some(&"") => None,
        Some(raw) => Some(volume(text_number("volumeMl", raw)?, raw.to_string())?),
    };

    let temp_at_brew_c = match segments.get(2) {
        None | Some(&"") => None,
        Some(raw) => Some(brew_temperature(text_number("tempAtBrew", raw)?)?),
    };

    Ok(UsageReading {
        brew_type,
        volume_ml,
        temp_at_brew_c,
    })
}

fn json_number(field: &'static str, value: &Value) -> Result<f64, ParseError> {
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(|| ParseError::NotANumber {
            field,
            value: number.to_string(),
        }),
        Value::String(text) => text_number(field, text),
        other => Err(ParseError::NotANumber {
            field,
            value: other.to_string(),
        }),
    }
}

fn text_number(field: &'static str, text: &str) -> Result<f64, ParseError> {
    let text = text.trim();
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::NotANumber {
            field,
            value: text.to_string(),
        }),
    }
}

fn temperature(value: f64) -> Result<f64, ParseError> {
    if TEMPERATURE_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(ParseError::OutOfRange {
            field: "temperature",
            value,
        })
    }
}

fn brew_temperature(value: f64) -> Result<f64, ParseError> {
    if TEMPERATURE_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(ParseError::OutOfRange {
            field: "tempAtBrew",
            value,
        })
    }
}

fn level(value: f64, original: String) -> Result<u8, ParseError> {
    if value.fract() != 0.0 {
        return Err(ParseError::NotANumber {
            field: "level",
            value: original,
        });
    }

    if !LEVEL_RANGE.contains(&value) {
        return Err(ParseError::OutOfRange {
            field: "level",
            value,
        });
    }

    Ok(value as u8)
}

fn volume(value: f64, original: String) -> Result<u32, ParseError> {
    if value.fract() != 0.0 {
        return Err(ParseError::NotANumber {
            field: "volumeMl",
            value: original,
        });
    }

    if value < 0.0 || value > u32::MAX as f64 {
        return Err(ParseError::OutOfRange {
            field: "volumeMl",
            value,
        });
    }

    Ok(value as u32)
}

fn status(token: &str) -> Result<MachineStatus, ParseError> {
    MachineStatus::from_token(token).ok_or_else(|| ParseError::UnknownStatus(token.to_string()))
}

fn brew_type(token: &str) -> Result<BrewType, ParseError> {
    BrewType::from_token(token).ok_or_else(|| ParseError::UnknownBrewType(token.to_string()))
}

/// RFC 3339, or an ISO local date-time interpreted as UTC.
///
/// An unreadable timestamp is not an error: the reading falls back to its
/// receive time.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    match NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(e) => {
            debug!("ignoring unreadable payload timestamp '{text}': {e}");
            None
        }
    }
}
