//! Helper functions for integration tests

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coffee_monitoring::{
    Alert, AlertType, MachineId, MachineTelemetryState, UsageEvent,
    config::{Config, MachineConfig},
    notify::{NotificationEvent, NotificationSink},
    pipeline::{Pipeline, PipelineHandle, seed_registry},
    storage::{
        AlertQuery, HealthStatus, MachineInfo, MachineRecord, MemoryBackend, NewAlert,
        OpenAlertResult, StorageBackend, StorageError, StorageResult,
    },
};

/// Sink that keeps every event it receives
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NotificationEvent::AlertOpened(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }

    pub fn resolved(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                NotificationEvent::AlertResolved(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Config with the given machines registered and short timeouts
pub fn test_config(machines: &[MachineId], workers: usize) -> Config {
    let mut config = Config::default();
    config.machines = machines
        .iter()
        .map(|&id| MachineConfig {
            id,
            name: Some(format!("Test machine {id}")),
            location: None,
            thresholds: None,
        })
        .collect();
    config.pipeline.workers = workers;
    config.pipeline.storage_timeout_ms = 200;
    config.pipeline.dispatch_timeout_ms = 200;
    config.pipeline.notification_timeout_ms = 200;
    config
}

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub handle: PipelineHandle,
    pub backend: Arc<dyn StorageBackend>,
    pub sink: RecordingSink,
}

/// Spawn a pipeline on `backend` with the machines of `config` registered
pub async fn spawn_with_backend(config: Config, backend: Arc<dyn StorageBackend>) -> TestPipeline {
    seed_registry(backend.as_ref(), &config.machines)
        .await
        .unwrap();

    let sink = RecordingSink::default();
    let pipeline = Pipeline::spawn(&config, backend.clone(), vec![Box::new(sink.clone())]);
    let handle = pipeline.handle();

    TestPipeline {
        pipeline,
        handle,
        backend,
        sink,
    }
}

/// Spawn a pipeline on a fresh in-memory backend
pub async fn spawn_pipeline(machines: &[MachineId]) -> TestPipeline {
    spawn_with_backend(test_config(machines, 4), Arc::new(MemoryBackend::new())).await
}

/// Publish messages and wait until they and their notifications are processed
pub async fn publish_all(handle: &PipelineHandle, messages: &[(&str, &str)]) {
    for (topic, payload) in messages {
        handle.publish(*topic, payload.as_bytes()).await.unwrap();
    }
    handle.flush().await.unwrap();
}

pub async fn snapshot(backend: &dyn StorageBackend, machine_id: MachineId) -> MachineTelemetryState {
    backend
        .get_machine(machine_id)
        .await
        .unwrap()
        .and_then(|record| record.state)
        .expect("machine has a snapshot")
}

pub async fn open_alerts(backend: &dyn StorageBackend, machine_id: MachineId) -> Vec<Alert> {
    backend
        .query_alerts(AlertQuery {
            machine_id: Some(machine_id),
            ..AlertQuery::open()
        })
        .await
        .unwrap()
}

const HEALTHY: u8 = 0;
const FAILING: u8 = 1;
const HANGING: u8 = 2;

/// In-memory backend whose writes can be made to fail, hang or crawl
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    mode: AtomicU8,
    /// Snapshot saves for this machine take [`SLOW_SAVE`]; 0 for none
    slow_machine: AtomicU64,
}

/// Below the storage timeout of [`test_config`]
pub const SLOW_SAVE: Duration = Duration::from_millis(150);

impl FlakyBackend {
    pub fn slow_saves_for(&self, machine_id: MachineId) {
        self.slow_machine.store(machine_id, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.mode.store(FAILING, Ordering::SeqCst);
    }

    pub fn hang_writes(&self) {
        self.mode.store(HANGING, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.mode.store(HEALTHY, Ordering::SeqCst);
    }

    async fn before_write(&self) -> StorageResult<()> {
        match self.mode.load(Ordering::SeqCst) {
            FAILING => Err(StorageError::Unavailable("database is locked".to_string())),
            HANGING => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn register_machine(&self, machine: MachineInfo) -> StorageResult<()> {
        self.inner.register_machine(machine).await
    }

    async fn get_machine(&self, machine_id: MachineId) -> StorageResult<Option<MachineRecord>> {
        self.inner.get_machine(machine_id).await
    }

    async fn list_machines(&self) -> StorageResult<Vec<MachineRecord>> {
        self.inner.list_machines().await
    }

    async fn save_machine_state(&self, state: &MachineTelemetryState) -> StorageResult<()> {
        if self.slow_machine.load(Ordering::SeqCst) == state.machine_id {
            tokio::time::sleep(SLOW_SAVE).await;
        }
        self.before_write().await?;
        self.inner.save_machine_state(state).await
    }

    async fn append_usage(&self, event: &UsageEvent) -> StorageResult<()> {
        self.before_write().await?;
        self.inner.append_usage(event).await
    }

    async fn query_usage(&self, machine_id: MachineId, limit: usize) -> StorageResult<Vec<UsageEvent>> {
        self.inner.query_usage(machine_id, limit).await
    }

    async fn open_alert(&self, alert: NewAlert) -> StorageResult<OpenAlertResult> {
        self.before_write().await?;
        self.inner.open_alert(alert).await
    }

    async fn find_open_alert(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>> {
        self.inner.find_open_alert(machine_id, alert_type).await
    }

    async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> StorageResult<Vec<Alert>> {
        self.inner.resolve_alerts(machine_id, alert_type).await
    }

    async fn resolve_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        self.inner.resolve_alert(alert_id).await
    }

    async fn get_alert(&self, alert_id: u64) -> StorageResult<Option<Alert>> {
        self.inner.get_alert(alert_id).await
    }

    async fn query_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>> {
        self.inner.query_alerts(query).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
