//! MachineWorker - Applies telemetry and evaluates alerts for a shard of machines
//!
//! Every machine is pinned to exactly one worker (`machine_id % workers`), so
//! updates for a machine are applied strictly one after another while
//! different machines make progress in parallel.
//!
//! ```text
//! WorkerCommand::Apply → MachineStateStore::apply_metric → AlertEvaluator::evaluate
//!                              │                                 │
//!                              └── PipelineEvent::StateChanged   └── PipelineEvent::Alert*
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument, trace, warn};

use super::ingest::IngestCounters;
use super::messages::{PipelineEvent, WorkerCommand};
use crate::MachineId;
use crate::alerts::{AlertEvaluator, AlertOutcome};
use crate::error::IngestError;
use crate::state::{ApplyOutcome, MachineStateStore};
use crate::telemetry::{MetricValue, StateUpdate};

pub struct MachineWorker {
    /// Shard index, for logging
    index: usize,

    store: MachineStateStore,

    evaluator: AlertEvaluator,

    command_rx: mpsc::Receiver<WorkerCommand>,

    event_tx: broadcast::Sender<PipelineEvent>,

    counters: Arc<IngestCounters>,
}

impl MachineWorker {
    pub fn new(
        index: usize,
        store: MachineStateStore,
        evaluator: AlertEvaluator,
        command_rx: mpsc::Receiver<WorkerCommand>,
        event_tx: broadcast::Sender<PipelineEvent>,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            index,
            store,
            evaluator,
            command_rx,
            event_tx,
            counters,
        }
    }

    /// Run until every sender of the command channel is gone
    #[instrument(skip(self), fields(worker = self.index))]
    pub async fn run(mut self) {
        debug!("starting machine worker");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                WorkerCommand::Apply {
                    machine_id,
                    value,
                    observed_at,
                } => self.apply(machine_id, value, observed_at).await,

                WorkerCommand::ResolveAlert {
                    machine_id,
                    alert_id,
                    respond_to,
                } => {
                    let result = self.evaluator.resolve_by_id(machine_id, alert_id).await;
                    if let Ok(Some(alert)) = &result {
                        self.counters.alert_resolved(1);
                        self.publish(PipelineEvent::AlertResolved(alert.clone()));
                    }
                    let _ = respond_to.send(result);
                }

                WorkerCommand::ResolveAlerts {
                    machine_id,
                    alert_type,
                    respond_to,
                } => {
                    let result = self.evaluator.resolve_type(machine_id, alert_type).await;
                    if let Ok(alerts) = &result {
                        self.counters.alert_resolved(alerts.len());
                        for alert in alerts {
                            self.publish(PipelineEvent::AlertResolved(alert.clone()));
                        }
                    }
                    let _ = respond_to.send(result);
                }

                WorkerCommand::Flush { respond_to } => {
                    let _ = respond_to.send(());
                }
            }
        }

        debug!("machine worker stopped");
    }

    async fn apply(&mut self, machine_id: MachineId, value: MetricValue, observed_at: DateTime<Utc>) {
        let result = match value {
            MetricValue::State(update) => self.apply_state(machine_id, update, observed_at).await,
            MetricValue::Usage(reading) => self
                .store
                .record_usage(machine_id, reading, observed_at)
                .await
                .map(|event| {
                    trace!("recorded {} brew for machine {machine_id}", event.brew_type);
                    self.counters.usage_recorded();
                    self.publish(PipelineEvent::UsageRecorded(event));
                }),
        };

        if let Err(err) = result {
            self.counters.dropped(&err);
            warn!(kind = ?err.kind(), "dropping message: {err}");
        }
    }

    async fn apply_state(
        &mut self,
        machine_id: MachineId,
        update: StateUpdate,
        observed_at: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let (previous, current) = match self.store.apply_metric(machine_id, update, observed_at).await? {
            ApplyOutcome::Applied { previous, current } => (previous, current),
            ApplyOutcome::Stale { .. } => {
                debug!("stale {:?} update for machine {machine_id}", update.field());
                self.counters.stale();
                return Ok(());
            }
        };

        self.counters.applied();
        self.publish(PipelineEvent::StateChanged(current.clone()));

        match self.evaluator.evaluate(update.field(), &previous, &current).await? {
            AlertOutcome::Unchanged => {}
            AlertOutcome::Opened(alert) => {
                self.counters.alert_opened();
                self.publish(PipelineEvent::AlertOpened(alert));
            }
            AlertOutcome::Suppressed(alert) => {
                trace!("breach folded into alert #{}", alert.id);
                self.counters.alert_suppressed();
            }
            AlertOutcome::Resolved(alerts) => {
                self.counters.alert_resolved(alerts.len());
                for alert in alerts {
                    self.publish(PipelineEvent::AlertResolved(alert));
                }
            }
        }

        Ok(())
    }

    fn publish(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
