//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use super::error::StorageResult;
use super::schema::{AlertQuery, MachineInfo, MachineRecord, NewAlert, OpenAlertResult};
use crate::{Alert, AlertType, MachineId, MachineTelemetryState, UsageEvent};

/// Health status of the storage backend
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The pipeline only ever talks to storage through this trait, so the
/// in-memory backend (tests, no persistence configured) and SQLite are
/// interchangeable.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// machine workers, the notifier and the API.
///
/// ## Alert uniqueness
///
/// `open_alert` must be atomic with respect to other `open_alert` calls:
/// for a given (machine, type) at most one unresolved alert may exist, no
/// matter how many callers race.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Add a machine to the registry, or update its name and location
    async fn register_machine(&self, machine: MachineInfo) -> StorageResult<()>;

    /// Look up a registered machine and its latest snapshot
    async fn get_machine(&self, machine_id: MachineId) -> StorageResult<Option<MachineRecord>>;

    /// All registered machines, ordered by id
    async fn list_machines(&self) -> StorageResult<Vec<MachineRecord>>;

    /// Replace the stored snapshot of a registered machine
    async fn save_machine_state(&self, state: &MachineTelemetryState) -> StorageResult<()>;

    /// Append a brew to the usage log
    async fn append_usage(&self, event: &UsageEvent) -> StorageResult<()>;

    /// The most recent brews of a machine, newest first
    async fn query_usage(&self, machine_id: MachineId, limit: usize)
    -> StorageResult<Vec<UsageEvent>>;

    /// Open an alert unless one of the same type is already open for the machine
    async fn open_alert(&self, alert: NewAlert) -> StorageResult<OpenAlertResult>;

    /// The unresolved alert of a type for a machine, if any
    async fn find_open_alert(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>>;

    /// Resolve every open alert of a type for a machine
    ///
    /// Returns the alerts that were resolved by this call.
    async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Vec<Alert>>;

    /// Resolve a single alert by id
    ///
    /// Returns `None` if the alert does not exist or was already resolved.
    async fn resolve_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>>;

    async fn get_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>>;

    async fn query_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats about the backend
    /// (e.g., "SQLite: 12 machines, 3 open alerts, 0.42 MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
