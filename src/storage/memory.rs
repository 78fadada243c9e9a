//! In-memory storage backend (no persistence)
//!
//! Used when no storage is configured and throughout the tests. Everything
//! lives behind one `RwLock`; alert uniqueness is checked and enforced under
//! the write lock.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertQuery, MachineInfo, MachineRecord, NewAlert, OpenAlertResult};
use crate::{Alert, AlertType, MachineId, MachineTelemetryState, UsageEvent};

/// Maximum brews to keep in memory per machine
const MAX_USAGE_PER_MACHINE: usize = 1000;

#[derive(Default)]
struct Inner {
    machines: BTreeMap<MachineId, MachineRecord>,
    alerts: BTreeMap<u64, Alert>,
    usage: HashMap<MachineId, VecDeque<UsageEvent>>,
    next_alert_id: u64,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn register_machine(&self, machine: MachineInfo) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        match inner.machines.get_mut(&machine.id) {
            Some(record) => record.info = machine,
            None => {
                inner.machines.insert(
                    machine.id,
                    MachineRecord {
                        info: machine,
                        state: None,
                    },
                );
            }
        }

        Ok(())
    }

    async fn get_machine(&self, machine_id: MachineId) -> StorageResult<Option<MachineRecord>> {
        Ok(self.inner.read().await.machines.get(&machine_id).cloned())
    }

    async fn list_machines(&self) -> StorageResult<Vec<MachineRecord>> {
        Ok(self.inner.read().await.machines.values().cloned().collect())
    }

    async fn save_machine_state(&self, state: &MachineTelemetryState) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        let record = inner
            .machines
            .get_mut(&state.machine_id)
            .ok_or(StorageError::UnknownMachine(state.machine_id))?;
        record.state = Some(state.clone());

        Ok(())
    }

    async fn append_usage(&self, event: &UsageEvent) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        if !inner.machines.contains_key(&event.machine_id) {
            return Err(StorageError::UnknownMachine(event.machine_id));
        }

        let log = inner.usage.entry(event.machine_id).or_default();
        if log.len() == MAX_USAGE_PER_MACHINE {
            log.pop_front();
        }
        log.push_back(event.clone());

        Ok(())
    }

    async fn query_usage(
        &self,
        machine_id: MachineId,
        limit: usize,
    ) -> StorageResult<Vec<UsageEvent>> {
        let inner = self.inner.read().await;

        Ok(inner
            .usage
            .get(&machine_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn open_alert(&self, alert: NewAlert) -> StorageResult<OpenAlertResult> {
        let mut inner = self.inner.write().await;

        if !inner.machines.contains_key(&alert.machine_id) {
            return Err(StorageError::UnknownMachine(alert.machine_id));
        }

        if let Some(existing) = inner.alerts.values().find(|existing| {
            !existing.resolved
                && existing.machine_id == alert.machine_id
                && existing.alert_type == alert.alert_type
        }) {
            return Ok(OpenAlertResult::AlreadyOpen(existing.clone()));
        }

        inner.next_alert_id += 1;
        let now = Utc::now();
        let opened = Alert {
            id: inner.next_alert_id,
            machine_id: alert.machine_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            message: alert.message,
            threshold_value: alert.threshold_value,
            resolved: false,
            created_at: now,
            updated_at: now,
        };
        inner.alerts.insert(opened.id, opened.clone());

        debug!("in-memory backend: opened alert #{}", opened.id);
        Ok(OpenAlertResult::Opened(opened))
    }

    async fn find_open_alert(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>> {
        let inner = self.inner.read().await;

        Ok(inner
            .alerts
            .values()
            .find(|alert| {
                !alert.resolved && alert.machine_id == machine_id && alert.alert_type == alert_type
            })
            .cloned())
    }

    async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Vec<Alert>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let resolved = inner
            .alerts
            .values_mut()
            .filter(|alert| {
                !alert.resolved && alert.machine_id == machine_id && alert.alert_type == alert_type
            })
            .map(|alert| {
                alert.resolved = true;
                alert.updated_at = now;
                alert.clone()
            })
            .collect();

        Ok(resolved)
    }

    async fn resolve_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        let mut inner = self.inner.write().await;

        match inner.alerts.get_mut(&alert_id) {
            Some(alert) if !alert.resolved => {
                alert.resolved = true;
                alert.updated_at = Utc::now();
                Ok(Some(alert.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn get_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        Ok(self.inner.read().await.alerts.get(&alert_id).cloned())
    }

    async fn query_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>> {
        let inner = self.inner.read().await;

        // ids grow monotonically, so reverse id order is newest first
        Ok(inner
            .alerts
            .values()
            .rev()
            .filter(|alert| query.matches(alert))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("machines".to_string(), inner.machines.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        let open = inner.alerts.values().filter(|alert| !alert.resolved).count();
        let brews: usize = inner.usage.values().map(VecDeque::len).sum();

        Ok(format!(
            "In-Memory: {} machines, {} alerts ({} open), {} brews",
            inner.machines.len(),
            inner.alerts.len(),
            open,
            brews
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
