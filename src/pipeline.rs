//! Wiring of the ingestion pipeline
//!
//! [`Pipeline::spawn`] starts the notifier, the machine workers and the
//! ingest actor on top of a storage backend. Everything outside the pipeline
//! (HTTP API, stdin bridge, tests) talks to it through a cloneable
//! [`PipelineHandle`].

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::actors::ingest::{IngestCounters, IngestHandle};
use crate::actors::machine::MachineWorker;
use crate::actors::messages::{IngestStats, NotifierStats, PipelineEvent, TelemetryMessage};
use crate::actors::notifier::{NotifierHandle, spawn_summary_reporter};
use crate::alerts::AlertEvaluator;
use crate::config::{Config, MachineConfig, Thresholds};
use crate::error::IngestError;
use crate::notify::NotificationSink;
use crate::state::MachineStateStore;
use crate::storage::{StorageBackend, StorageResult};
use crate::{Alert, AlertType, MachineId};

/// Capacity of the pipeline event broadcast channel
const EVENT_CHANNEL_SIZE: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub workers: usize,
    pub ingest: IngestStats,
    pub notifications: NotifierStats,
}

/// Register every configured machine with the backend
///
/// Registering an already known machine only refreshes its name and
/// location.
pub async fn seed_registry(
    backend: &dyn StorageBackend,
    machines: &[MachineConfig],
) -> StorageResult<()> {
    for machine in machines {
        backend.register_machine(machine.info()).await?;
        debug!("registered machine {}", machine.id);
    }

    info!("{} machines registered", machines.len());
    Ok(())
}

/// A running pipeline
pub struct Pipeline {
    handle: PipelineHandle,
    ingest_task: JoinHandle<()>,
    worker_tasks: Vec<JoinHandle<()>>,
    notifier_task: JoinHandle<()>,
    summary_task: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start all actors
    pub fn spawn(
        config: &Config,
        backend: Arc<dyn StorageBackend>,
        sinks: Vec<Box<dyn NotificationSink>>,
    ) -> Self {
        let settings = &config.pipeline;
        let workers = settings.workers.max(1);

        let (notifier, notifier_task) = NotifierHandle::spawn_with_task(
            sinks,
            settings.notification_queue_size,
            settings.notification_timeout(),
        );

        let evaluator = AlertEvaluator::new(backend.clone(), notifier.clone(), settings.storage_timeout())
            .with_thresholds(config.thresholds, config.threshold_overrides())
            .with_debounce(config.alerts.debounce);

        let counters = Arc::new(IngestCounters::default());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let mut worker_senders = Vec::with_capacity(workers);
        let mut worker_tasks = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
            let worker = MachineWorker::new(
                index,
                MachineStateStore::new(backend.clone(), settings.storage_timeout()),
                evaluator.clone(),
                rx,
                event_tx.clone(),
                counters.clone(),
            );

            worker_senders.push(tx);
            worker_tasks.push(tokio::spawn(worker.run()));
        }

        let (ingest, ingest_task) = IngestHandle::spawn(
            worker_senders,
            settings.queue_size,
            counters.clone(),
            settings.dispatch_timeout(),
        );

        let summary_task = config.alerts.summary_interval_secs.map(|secs| {
            info!("sending open-alert summaries every {secs}s");
            spawn_summary_reporter(
                backend.clone(),
                notifier.clone(),
                std::time::Duration::from_secs(secs.max(1)),
            )
        });

        info!("pipeline started with {workers} machine workers");

        Self {
            handle: PipelineHandle {
                ingest,
                notifier,
                backend,
                counters,
                events: event_tx,
                evaluator,
                workers,
            },
            ingest_task,
            worker_tasks,
            notifier_task,
            summary_task,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Process everything already queued, then stop all actors and close
    /// the backend
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down pipeline");

        if let Some(summary) = &self.summary_task {
            summary.abort();
        }

        self.handle.ingest.shutdown().await?;
        self.ingest_task.await.context("ingest actor panicked")?;

        // the ingest actor held the only worker senders
        for result in join_all(self.worker_tasks).await {
            if let Err(e) = result {
                error!("machine worker panicked: {e}");
            }
        }

        self.handle.notifier.shutdown().await?;
        self.notifier_task.await.context("notifier actor panicked")?;

        self.handle
            .backend
            .close()
            .await
            .context("failed to close storage")?;

        info!("pipeline stopped");
        Ok(())
    }
}

/// Cloneable access to a running pipeline
#[derive(Clone)]
pub struct PipelineHandle {
    ingest: IngestHandle,
    notifier: NotifierHandle,
    backend: Arc<dyn StorageBackend>,
    counters: Arc<IngestCounters>,
    events: broadcast::Sender<PipelineEvent>,
    evaluator: AlertEvaluator,
    workers: usize,
}

impl PipelineHandle {
    /// Hand a raw message to the pipeline
    ///
    /// Waits while the ingest queue is full; fails only once the pipeline
    /// is shutting down.
    pub async fn ingest(&self, message: TelemetryMessage) -> Result<()> {
        self.ingest.ingest(message).await
    }

    /// Shorthand for [`PipelineHandle::ingest`] with a message received now
    pub async fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.ingest(TelemetryMessage::new(topic, payload)).await
    }

    /// Resolve an alert on behalf of an operator
    ///
    /// `None` if the alert does not exist or is already resolved.
    pub async fn resolve_alert(&self, alert_id: u64) -> Result<Option<Alert>, IngestError> {
        let Some(alert) = self
            .backend
            .get_alert(alert_id)
            .await
            .map_err(|e| IngestError::downstream(None, "get alert", e.to_string()))?
        else {
            return Ok(None);
        };

        if alert.resolved {
            return Ok(None);
        }

        self.ingest
            .resolve_alert(alert.machine_id, alert_id)
            .await
            .map_err(|e| IngestError::downstream(Some(alert.machine_id), "resolve alert", e.to_string()))?
    }

    /// Resolve every open alert of a type for a machine
    pub async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> Result<Vec<Alert>, IngestError> {
        self.ingest
            .resolve_alerts(machine_id, alert_type)
            .await
            .map_err(|e| IngestError::downstream(Some(machine_id), "resolve alerts", e.to_string()))?
    }

    /// Wait until every message and notification queued so far is processed
    pub async fn flush(&self) -> Result<()> {
        self.ingest.flush().await?;
        self.notifier.flush().await
    }

    pub async fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            workers: self.workers,
            ingest: self.counters.snapshot(),
            notifications: self.notifier.stats(),
        })
    }

    /// Subscribe to state and alert changes
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Thresholds for machines without overrides
    pub fn thresholds(&self) -> Thresholds {
        self.evaluator.thresholds()
    }

    /// Effective thresholds of a machine
    pub fn thresholds_for(&self, machine_id: MachineId) -> Thresholds {
        self.evaluator.thresholds_for(machine_id)
    }
}
