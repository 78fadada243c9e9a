use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::MachineId;
use crate::storage::MachineInfo;

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database file
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./brewwatch.db")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Machines known to the registry; telemetry for any other id is dropped
    #[serde(default)]
    pub machines: Vec<MachineConfig>,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub alerts: AlertSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub notifications: Vec<Notification>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub id: MachineId,
    pub name: Option<String>,
    pub location: Option<String>,
    pub thresholds: Option<ThresholdOverrides>,
}

impl MachineConfig {
    pub fn info(&self) -> MachineInfo {
        MachineInfo {
            id: self.id,
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("Machine {}", self.id)),
            location: self.location.clone(),
        }
    }
}

/// Alert thresholds applied to every machine unless overridden
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_level_threshold")]
    pub low_water: u8,

    #[serde(default = "default_level_threshold")]
    pub low_milk: u8,

    #[serde(default = "default_level_threshold")]
    pub low_beans: u8,

    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,

    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Deviation beyond the temperature band that escalates to CRITICAL
    #[serde(default = "default_critical_margin")]
    pub critical_margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_water: default_level_threshold(),
            low_milk: default_level_threshold(),
            low_beans: default_level_threshold(),
            min_temperature: default_min_temperature(),
            max_temperature: default_max_temperature(),
            critical_margin: default_critical_margin(),
        }
    }
}

impl Thresholds {
    pub fn with_overrides(&self, overrides: &ThresholdOverrides) -> Self {
        Self {
            low_water: overrides.low_water.unwrap_or(self.low_water),
            low_milk: overrides.low_milk.unwrap_or(self.low_milk),
            low_beans: overrides.low_beans.unwrap_or(self.low_beans),
            min_temperature: overrides.min_temperature.unwrap_or(self.min_temperature),
            max_temperature: overrides.max_temperature.unwrap_or(self.max_temperature),
            critical_margin: overrides.critical_margin.unwrap_or(self.critical_margin),
        }
    }

    fn validate(&self, scope: &str) -> anyhow::Result<()> {
        for (name, level) in [
            ("low_water", self.low_water),
            ("low_milk", self.low_milk),
            ("low_beans", self.low_beans),
        ] {
            if level > 100 {
                anyhow::bail!("{scope}: {name} threshold {level}% is above 100%");
            }
        }

        if !(self.min_temperature < self.max_temperature) {
            anyhow::bail!(
                "{scope}: temperature band [{}, {}] is empty",
                self.min_temperature,
                self.max_temperature
            );
        }

        if !(self.critical_margin >= 0.0) {
            anyhow::bail!("{scope}: critical margin must not be negative");
        }

        Ok(())
    }
}

/// Per-machine replacements for individual thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    pub low_water: Option<u8>,
    pub low_milk: Option<u8>,
    pub low_beans: Option<u8>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub critical_margin: Option<f64>,
}

fn default_level_threshold() -> u8 {
    20
}

fn default_min_temperature() -> f64 {
    85.0
}

fn default_max_temperature() -> f64 {
    100.0
}

fn default_critical_margin() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    /// Look up an open alert before creating a new one. Storage still refuses
    /// a second open alert per (machine, type) when this is off.
    #[serde(default = "default_true")]
    pub debounce: bool,

    /// Interval for the periodic open-alert summary; no summary when unset
    pub summary_interval_secs: Option<u64>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            debounce: true,
            summary_interval_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Sizing and timeouts of the ingestion pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Number of machine workers; each machine id is pinned to one worker
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_notification_queue_size")]
    pub notification_queue_size: usize,

    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,

    /// How long the router waits for room in a full worker queue
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
            notification_queue_size: default_notification_queue_size(),
            storage_timeout_ms: default_storage_timeout_ms(),
            notification_timeout_ms: default_notification_timeout_ms(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

impl PipelineSettings {
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_size() -> usize {
    1024
}

fn default_notification_queue_size() -> usize {
    256
}

fn default_storage_timeout_ms() -> u64 {
    2_000
}

fn default_notification_timeout_ms() -> u64 {
    5_000
}

fn default_dispatch_timeout_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Bind address; falls back to `BREWWATCH_API_ADDR` / `BREWWATCH_API_PORT`
    pub bind: Option<SocketAddr>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: None,
            enable_cors: true,
        }
    }
}

impl ApiSettings {
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind
            .unwrap_or_else(|| SocketAddr::new(crate::util::get_api_addr(), crate::util::get_api_port()))
    }
}

impl Config {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.queue_size == 0 || self.pipeline.notification_queue_size == 0 {
            anyhow::bail!("pipeline queue sizes must be at least 1");
        }

        self.thresholds.validate("thresholds")?;

        let mut seen = HashSet::new();
        for machine in &self.machines {
            if machine.id == 0 {
                anyhow::bail!("machine ids must be positive");
            }
            if !seen.insert(machine.id) {
                anyhow::bail!("machine {} is configured twice", machine.id);
            }
            if let Some(overrides) = &machine.thresholds {
                self.thresholds
                    .with_overrides(overrides)
                    .validate(&format!("machine {}", machine.id))?;
            }
        }

        Ok(())
    }

    /// Threshold overrides keyed by machine id
    pub fn threshold_overrides(&self) -> HashMap<MachineId, ThresholdOverrides> {
        self.machines
            .iter()
            .filter_map(|machine| machine.thresholds.map(|overrides| (machine.id, overrides)))
            .collect()
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;

    config.validate()?;
    trace!("loaded config: {config:?}");

    Ok(config)
}
