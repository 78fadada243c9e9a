//! IngestActor - Routes raw telemetry to the machine workers
//!
//! ```text
//! transport → IngestHandle::ingest → IngestActor ─┬─ parse_topic ─ parse_payload
//!                                                 │
//!                                                 └─► workers[machine_id % n]
//! ```
//!
//! Malformed topics and payloads are logged, counted and dropped here; they
//! never reach a worker. A worker whose queue stays full past the dispatch
//! timeout causes the message to be dropped as well, so one slow shard
//! cannot stall the transport.
//!
//! Operator resolutions are forwarded with the caller's `respond_to` and
//! answered by the worker; flushes wait in a task of their own. The actor
//! never waits for a worker to reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use super::messages::{IngestCommand, IngestStats, TelemetryMessage, WorkerCommand};
use crate::error::{IngestError, IngestErrorKind};
use crate::telemetry::{parse_payload, parse_topic};
use crate::{Alert, AlertType, MachineId};

/// Payload bytes kept in error reports
const PAYLOAD_PREVIEW: usize = 128;

/// Lock-free counters shared between the ingest actor and the workers
#[derive(Debug, Default)]
pub struct IngestCounters {
    received: AtomicU64,
    applied: AtomicU64,
    stale: AtomicU64,
    usage_recorded: AtomicU64,
    alerts_opened: AtomicU64,
    alerts_suppressed: AtomicU64,
    alerts_resolved: AtomicU64,
    malformed_topic: AtomicU64,
    unparseable_payload: AtomicU64,
    unknown_machine: AtomicU64,
    downstream_unavailable: AtomicU64,
}

impl IngestCounters {
    pub fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn usage_recorded(&self) {
        self.usage_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_opened(&self) {
        self.alerts_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alert_resolved(&self, count: usize) {
        self.alerts_resolved.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn dropped(&self, err: &IngestError) {
        let counter = match err.kind() {
            IngestErrorKind::MalformedTopic => &self.malformed_topic,
            IngestErrorKind::UnparseablePayload => &self.unparseable_payload,
            IngestErrorKind::UnknownMachine => &self.unknown_machine,
            IngestErrorKind::DownstreamUnavailable => &self.downstream_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        IngestStats {
            received: load(&self.received),
            applied: load(&self.applied),
            stale: load(&self.stale),
            usage_recorded: load(&self.usage_recorded),
            alerts_opened: load(&self.alerts_opened),
            alerts_suppressed: load(&self.alerts_suppressed),
            alerts_resolved: load(&self.alerts_resolved),
            malformed_topic: load(&self.malformed_topic),
            unparseable_payload: load(&self.unparseable_payload),
            unknown_machine: load(&self.unknown_machine),
            downstream_unavailable: load(&self.downstream_unavailable),
        }
    }
}

pub struct IngestActor {
    /// One sender per machine worker
    workers: Vec<mpsc::Sender<WorkerCommand>>,

    command_rx: mpsc::Receiver<IngestCommand>,

    counters: Arc<IngestCounters>,

    /// How long to wait for room in a worker queue
    dispatch_timeout: Duration,
}

impl IngestActor {
    pub fn new(
        workers: Vec<mpsc::Sender<WorkerCommand>>,
        command_rx: mpsc::Receiver<IngestCommand>,
        counters: Arc<IngestCounters>,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            workers,
            command_rx,
            counters,
            dispatch_timeout,
        }
    }

    #[instrument(skip(self), fields(workers = self.workers.len()))]
    pub async fn run(mut self) {
        debug!("starting ingest actor");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        self.drain().await;
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        // dropping the worker senders lets the workers drain and stop
        debug!("ingest actor stopped");
    }

    /// Returns false once the actor should stop
    async fn handle_command(&mut self, cmd: IngestCommand) -> bool {
        match cmd {
            IngestCommand::Message(message) => self.ingest(message).await,

            // the worker answers the caller directly
            IngestCommand::ResolveAlert {
                machine_id,
                alert_id,
                respond_to,
            } => {
                let cmd = WorkerCommand::ResolveAlert {
                    machine_id,
                    alert_id,
                    respond_to,
                };
                self.forward(machine_id, cmd, "resolve alert").await;
            }

            IngestCommand::ResolveAlerts {
                machine_id,
                alert_type,
                respond_to,
            } => {
                let cmd = WorkerCommand::ResolveAlerts {
                    machine_id,
                    alert_type,
                    respond_to,
                };
                self.forward(machine_id, cmd, "resolve alerts").await;
            }

            IngestCommand::Flush { respond_to } => self.flush_workers(respond_to),

            IngestCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }

        true
    }

    /// Process everything still queued, refusing new commands
    async fn drain(&mut self) {
        self.command_rx.close();

        while let Some(cmd) = self.command_rx.recv().await {
            self.handle_command(cmd).await;
        }
    }

    /// Route, parse and hand one message to its worker
    #[instrument(skip_all, fields(topic = %message.topic))]
    async fn ingest(&mut self, message: TelemetryMessage) {
        self.counters.received();

        if let Err(err) = self.dispatch(message).await {
            self.counters.dropped(&err);
            warn!(kind = ?err.kind(), "dropping message: {err}");
        }
    }

    async fn dispatch(&self, message: TelemetryMessage) -> Result<(), IngestError> {
        let route = parse_topic(&message.topic).map_err(|reason| IngestError::MalformedTopic {
            topic: message.topic.clone(),
            reason,
        })?;

        let parsed = parse_payload(route.kind, &message.payload).map_err(|reason| {
            IngestError::UnparseablePayload {
                machine_id: route.machine_id,
                kind: route.kind,
                payload: preview(&message.payload),
                reason,
            }
        })?;

        let observed_at = parsed.source_timestamp.unwrap_or(message.received_at);
        trace!("dispatching {} update for machine {}", route.kind, route.machine_id);

        self.send_to_worker(
            route.machine_id,
            WorkerCommand::Apply {
                machine_id: route.machine_id,
                value: parsed.value,
                observed_at,
            },
            "dispatch",
        )
        .await
        .map_err(|(err, _)| err)
    }

    /// Hand an operator command to its worker without waiting for the answer
    async fn forward(&self, machine_id: MachineId, cmd: WorkerCommand, operation: &'static str) {
        if let Err((err, cmd)) = self.send_to_worker(machine_id, cmd, operation).await {
            warn!("failed to {operation}: {err}");
            cmd.reject(err);
        }
    }

    fn worker_for(&self, machine_id: MachineId) -> &mpsc::Sender<WorkerCommand> {
        let index = (machine_id % self.workers.len() as u64) as usize;
        &self.workers[index]
    }

    async fn send_to_worker(
        &self,
        machine_id: MachineId,
        cmd: WorkerCommand,
        operation: &'static str,
    ) -> Result<(), (IngestError, WorkerCommand)> {
        match self
            .worker_for(machine_id)
            .send_timeout(cmd, self.dispatch_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(cmd)) => Err((
                IngestError::downstream(
                    Some(machine_id),
                    operation,
                    format!(
                        "worker queue full for {}ms",
                        self.dispatch_timeout.as_millis()
                    ),
                ),
                cmd,
            )),
            Err(SendTimeoutError::Closed(cmd)) => Err((
                IngestError::downstream(Some(machine_id), operation, "worker stopped".to_string()),
                cmd,
            )),
        }
    }

    /// Answer `respond_to` once every worker has processed what was
    /// dispatched to it so far
    ///
    /// Runs in its own task so a busy shard never holds up routing.
    fn flush_workers(&self, respond_to: oneshot::Sender<()>) {
        let workers = self.workers.clone();

        tokio::spawn(async move {
            let pending = workers.iter().map(|worker| async move {
                let (tx, rx) = oneshot::channel();
                if worker.send(WorkerCommand::Flush { respond_to: tx }).await.is_ok() {
                    let _ = rx.await;
                }
            });

            join_all(pending).await;
            let _ = respond_to.send(());
        });
    }
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= PAYLOAD_PREVIEW {
        return text.into_owned();
    }

    let mut truncated: String = text.chars().take(PAYLOAD_PREVIEW).collect();
    truncated.push('…');
    truncated
}

/// Handle for the IngestActor
#[derive(Clone)]
pub struct IngestHandle {
    sender: mpsc::Sender<IngestCommand>,
}

impl IngestHandle {
    pub(crate) fn spawn(
        workers: Vec<mpsc::Sender<WorkerCommand>>,
        queue_size: usize,
        counters: Arc<IngestCounters>,
        dispatch_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(queue_size.max(1));

        let actor = IngestActor::new(workers, cmd_rx, counters, dispatch_timeout);
        let task = tokio::spawn(actor.run());

        (Self { sender: cmd_tx }, task)
    }

    /// Queue a message, waiting for room when the queue is full
    pub async fn ingest(&self, message: TelemetryMessage) -> Result<()> {
        self.sender
            .send(IngestCommand::Message(message))
            .await
            .context("failed to send Message command")
    }

    pub async fn resolve_alert(
        &self,
        machine_id: MachineId,
        alert_id: u64,
    ) -> Result<Result<Option<Alert>, IngestError>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IngestCommand::ResolveAlert {
                machine_id,
                alert_id,
                respond_to: tx,
            })
            .await
            .context("failed to send ResolveAlert command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn resolve_alerts(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> Result<Result<Vec<Alert>, IngestError>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IngestCommand::ResolveAlerts {
                machine_id,
                alert_type,
                respond_to: tx,
            })
            .await
            .context("failed to send ResolveAlerts command")?;

        rx.await.context("failed to receive response")
    }

    /// Wait until every message queued so far has been processed
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IngestCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive flush response")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(IngestCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
