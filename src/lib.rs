pub mod actors;
pub mod alerts;
pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod util;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a coffee machine as used in channel names and the registry.
pub type MachineId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MachineStatus {
    On,
    #[default]
    Off,
    Error,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::On => "ON",
            MachineStatus::Off => "OFF",
            MachineStatus::Error => "ERROR",
        }
    }

    /// Case-insensitive lookup of a status token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(MachineStatus::On),
            "OFF" => Some(MachineStatus::Off),
            "ERROR" => Some(MachineStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    LowWater,
    LowMilk,
    LowBeans,
    Malfunction,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::LowWater,
        AlertType::LowMilk,
        AlertType::LowBeans,
        AlertType::Malfunction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowWater => "LOW_WATER",
            AlertType::LowMilk => "LOW_MILK",
            AlertType::LowBeans => "LOW_BEANS",
            AlertType::Malfunction => "MALFUNCTION",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(token))
    }

    /// Supply alerts close on their own once the level recovers; malfunctions
    /// stay open until an operator resolves them.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, AlertType::Malfunction)
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warning),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrewType {
    Espresso,
    DoubleEspresso,
    Americano,
    Cappuccino,
    Latte,
    Macchiato,
    Mocha,
    FlatWhite,
}

impl BrewType {
    pub const ALL: [BrewType; 8] = [
        BrewType::Espresso,
        BrewType::DoubleEspresso,
        BrewType::Americano,
        BrewType::Cappuccino,
        BrewType::Latte,
        BrewType::Macchiato,
        BrewType::Mocha,
        BrewType::FlatWhite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BrewType::Espresso => "ESPRESSO",
            BrewType::DoubleEspresso => "DOUBLE_ESPRESSO",
            BrewType::Americano => "AMERICANO",
            BrewType::Cappuccino => "CAPPUCCINO",
            BrewType::Latte => "LATTE",
            BrewType::Macchiato => "MACCHIATO",
            BrewType::Mocha => "MOCHA",
            BrewType::FlatWhite => "FLAT_WHITE",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|brew| brew.as_str().eq_ignore_ascii_case(token))
    }
}

impl std::fmt::Display for BrewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field source timestamps of the last applied update.
///
/// Used to ignore telemetry that arrives after a newer reading for the same
/// field has already been applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldClock {
    pub status: Option<DateTime<Utc>>,
    pub temperature: Option<DateTime<Utc>>,
    pub water_level: Option<DateTime<Utc>>,
    pub milk_level: Option<DateTime<Utc>>,
    pub beans_level: Option<DateTime<Utc>>,
}

/// Current telemetry snapshot of one machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineTelemetryState {
    pub machine_id: MachineId,
    pub status: MachineStatus,
    pub temperature_c: Option<f64>,
    pub water_level_pct: Option<u8>,
    pub milk_level_pct: Option<u8>,
    pub beans_level_pct: Option<u8>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub clock: FieldClock,
}

impl MachineTelemetryState {
    /// Empty snapshot for a machine that has not reported anything yet
    pub fn new(machine_id: MachineId, now: DateTime<Utc>) -> Self {
        Self {
            machine_id,
            status: MachineStatus::default(),
            temperature_c: None,
            water_level_pct: None,
            milk_level_pct: None,
            beans_level_pct: None,
            last_updated: now,
            clock: FieldClock::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub machine_id: MachineId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub threshold_value: f64,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single recorded brew
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub machine_id: MachineId,
    pub brew_type: BrewType,
    pub volume_ml: Option<u32>,
    pub temp_at_brew_c: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
