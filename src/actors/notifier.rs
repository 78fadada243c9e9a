//! NotifierActor - Delivers alert notifications to the configured sinks
//!
//! Alert evaluation hands events over with a non-blocking send and moves on;
//! a slow or failing sink only ever delays other notifications.
//!
//! ```text
//! AlertEvaluator ──try_send──► [bounded queue] ──► NotifierActor ──► sink 1..n
//!                                   │                    (timeout per delivery)
//!                              full → dropped + warn
//! ```
//!
//! Events are delivered one at a time in queue order, so the notifications
//! of one alert always arrive opened-then-resolved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{NotifierCommand, NotifierStats};
use crate::notify::{AlertSummary, NotificationEvent, NotificationSink};
use crate::storage::{AlertQuery, StorageBackend};

/// Delivery counters shared between the notifier actor and its handles
///
/// Readable at any time, without queueing behind pending deliveries.
#[derive(Debug, Default)]
pub struct NotifierCounters {
    received: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl NotifierCounters {
    pub fn snapshot(&self) -> NotifierStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        NotifierStats {
            received: load(&self.received),
            delivered: load(&self.delivered),
            failed: load(&self.failed),
            dropped: load(&self.dropped),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct NotifierActor {
    sinks: Vec<Box<dyn NotificationSink>>,

    command_rx: mpsc::Receiver<NotifierCommand>,

    /// Deadline for a single sink delivery
    timeout: Duration,

    /// Shared with the handles, which count queue overflows
    counters: Arc<NotifierCounters>,
}

impl NotifierActor {
    pub fn new(
        sinks: Vec<Box<dyn NotificationSink>>,
        command_rx: mpsc::Receiver<NotifierCommand>,
        timeout: Duration,
        counters: Arc<NotifierCounters>,
    ) -> Self {
        Self {
            sinks,
            command_rx,
            timeout,
            counters,
        }
    }

    #[instrument(skip(self), fields(sinks = self.sinks.len()))]
    pub async fn run(mut self) {
        debug!("starting notifier actor");

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        let stats = self.counters.snapshot();
        debug!(
            "notifier actor stopped ({} delivered, {} failed)",
            stats.delivered, stats.failed
        );
    }

    /// Returns false once the actor should stop
    async fn handle_command(&mut self, cmd: NotifierCommand) -> bool {
        match cmd {
            NotifierCommand::Notify(event) => self.deliver(&event).await,

            NotifierCommand::Flush { respond_to } => {
                let _ = respond_to.send(());
            }

            NotifierCommand::Shutdown => {
                debug!("received shutdown command, draining queue");
                self.command_rx.close();

                while let Some(cmd) = self.command_rx.recv().await {
                    match cmd {
                        NotifierCommand::Notify(event) => self.deliver(&event).await,
                        NotifierCommand::Flush { respond_to } => {
                            let _ = respond_to.send(());
                        }
                        NotifierCommand::Shutdown => {}
                    }
                }

                return false;
            }
        }

        true
    }

    async fn deliver(&mut self, event: &NotificationEvent) {
        NotifierCounters::bump(&self.counters.received);

        for sink in &self.sinks {
            match time::timeout(self.timeout, sink.deliver(event)).await {
                Ok(Ok(())) => {
                    trace!("delivered notification via {}", sink.name());
                    NotifierCounters::bump(&self.counters.delivered);
                }
                Ok(Err(e)) => {
                    error!("failed to deliver notification via {}: {:#}", sink.name(), e);
                    NotifierCounters::bump(&self.counters.failed);
                }
                Err(_) => {
                    error!(
                        "notification via {} timed out after {}ms",
                        sink.name(),
                        self.timeout.as_millis()
                    );
                    NotifierCounters::bump(&self.counters.failed);
                }
            }
        }
    }

}

/// Handle for the NotifierActor
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
    counters: Arc<NotifierCounters>,
}

impl NotifierHandle {
    /// Spawn a notifier actor with a queue of `queue_size` events
    pub fn spawn(
        sinks: Vec<Box<dyn NotificationSink>>,
        queue_size: usize,
        timeout: Duration,
    ) -> Self {
        Self::spawn_with_task(sinks, queue_size, timeout).0
    }

    pub(crate) fn spawn_with_task(
        sinks: Vec<Box<dyn NotificationSink>>,
        queue_size: usize,
        timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(queue_size.max(1));
        let counters = Arc::new(NotifierCounters::default());

        let actor = NotifierActor::new(sinks, cmd_rx, timeout, counters.clone());
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender: cmd_tx,
                counters,
            },
            task,
        )
    }

    /// Queue a notification without waiting
    ///
    /// A full queue drops the event with a warning.
    pub fn notify(&self, event: NotificationEvent) {
        match self.sender.try_send(NotifierCommand::Notify(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(NotifierCommand::Notify(event))) => {
                NotifierCounters::bump(&self.counters.dropped);
                warn!("notification queue full, dropping: {}", event.describe());
            }
            Err(TrySendError::Full(_)) => {
                NotifierCounters::bump(&self.counters.dropped);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("notifier stopped, dropping notification");
            }
        }
    }

    /// Wait until every notification queued so far has been delivered
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(NotifierCommand::Flush { respond_to: tx })
            .await
            .context("failed to send Flush command")?;

        rx.await.context("failed to receive flush response")
    }

    pub fn stats(&self) -> NotifierStats {
        self.counters.snapshot()
    }

    /// Deliver what is queued, then stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(NotifierCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

/// Periodically send a summary of all open alerts
///
/// Nothing is sent while no alert is open.
pub fn spawn_summary_reporter(
    backend: Arc<dyn StorageBackend>,
    notifier: NotifierHandle,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match backend.query_alerts(AlertQuery::open()).await {
                Ok(alerts) if alerts.is_empty() => trace!("no open alerts, skipping summary"),
                Ok(alerts) => {
                    notifier.notify(NotificationEvent::AlertSummary(AlertSummary::from_alerts(
                        &alerts,
                    )));
                }
                Err(e) => error!("failed to query open alerts for summary: {e}"),
            }
        }
    })
}
