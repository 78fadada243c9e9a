//! Alert lifecycle
//!
//! ```text
//! breach ──► OPEN ──► RESOLVED (terminal)
//!              ▲
//!              └── a later breach opens a new alert
//! ```
//!
//! Supply alerts resolve on their own once the level is back at or above the
//! threshold. Malfunctions (temperature band, ERROR status) stay open until
//! an operator resolves them.
//!
//! At most one unresolved alert exists per (machine, type). Each machine is
//! evaluated by exactly one worker, and storage refuses a second open alert,
//! so repeated or concurrent breaches collapse into the alert already open.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, trace};

use crate::actors::notifier::NotifierHandle;
use crate::config::{ThresholdOverrides, Thresholds};
use crate::error::{IngestError, with_timeout};
use crate::notify::NotificationEvent;
use crate::storage::{NewAlert, OpenAlertResult, StorageBackend};
use crate::telemetry::Field;
use crate::{Alert, AlertType, MachineId, MachineTelemetryState};

pub mod rules;

pub use rules::{Breach, Evaluation};

/// What an evaluation did to the alert set
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    /// Nothing opened or resolved
    Unchanged,

    /// A new alert was opened
    Opened(Alert),

    /// The condition is breached but an alert is already open
    Suppressed(Alert),

    /// Open alerts were resolved because the condition recovered
    Resolved(Vec<Alert>),
}

#[derive(Clone)]
pub struct AlertEvaluator {
    backend: Arc<dyn StorageBackend>,
    notifier: NotifierHandle,
    thresholds: Thresholds,
    overrides: Arc<HashMap<MachineId, ThresholdOverrides>>,
    debounce: bool,
    timeout: Duration,
}

impl AlertEvaluator {
    pub fn new(backend: Arc<dyn StorageBackend>, notifier: NotifierHandle, timeout: Duration) -> Self {
        Self {
            backend,
            notifier,
            thresholds: Thresholds::default(),
            overrides: Arc::new(HashMap::new()),
            debounce: true,
            timeout,
        }
    }

    pub fn with_thresholds(
        mut self,
        thresholds: Thresholds,
        overrides: HashMap<MachineId, ThresholdOverrides>,
    ) -> Self {
        self.thresholds = thresholds;
        self.overrides = Arc::new(overrides);
        self
    }

    pub fn with_debounce(mut self, debounce: bool) -> Self {
        self.debounce = debounce;
        self
    }

    /// Thresholds for machines without overrides
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Effective thresholds of a machine
    pub fn thresholds_for(&self, machine_id: MachineId) -> Thresholds {
        match self.overrides.get(&machine_id) {
            Some(overrides) => self.thresholds.with_overrides(overrides),
            None => self.thresholds,
        }
    }

    /// Evaluate the condition watched by `field` after an update was applied
    #[instrument(skip(self, previous, current), fields(machine_id = current.machine_id))]
    pub async fn evaluate(
        &self,
        field: Field,
        previous: &MachineTelemetryState,
        current: &MachineTelemetryState,
    ) -> Result<AlertOutcome, IngestError> {
        let machine_id = current.machine_id;
        let thresholds = self.thresholds_for(machine_id);

        match rules::evaluate(field, current, previous.status, &thresholds) {
            Evaluation::Ok => Ok(AlertOutcome::Unchanged),
            Evaluation::Breached(breach) => self.open(machine_id, breach).await,
            Evaluation::Recovered(alert_type) if alert_type.auto_resolves() => {
                let resolved = self.resolve_type(machine_id, alert_type).await?;
                if resolved.is_empty() {
                    Ok(AlertOutcome::Unchanged)
                } else {
                    Ok(AlertOutcome::Resolved(resolved))
                }
            }
            Evaluation::Recovered(_) => Ok(AlertOutcome::Unchanged),
        }
    }

    async fn open(&self, machine_id: MachineId, breach: Breach) -> Result<AlertOutcome, IngestError> {
        if self.debounce {
            let existing = with_timeout(
                self.timeout,
                machine_id,
                "find open alert",
                self.backend.find_open_alert(machine_id, breach.alert_type),
            )
            .await?;

            if let Some(alert) = existing {
                trace!("{} alert #{} already open", alert.alert_type, alert.id);
                return Ok(AlertOutcome::Suppressed(alert));
            }
        }

        let new_alert = NewAlert {
            machine_id,
            alert_type: breach.alert_type,
            severity: breach.severity,
            message: breach.message,
            threshold_value: breach.threshold_value,
        };

        let result = with_timeout(
            self.timeout,
            machine_id,
            "open alert",
            self.backend.open_alert(new_alert),
        )
        .await?;

        match result {
            OpenAlertResult::Opened(alert) => {
                info!(
                    "opened {} alert #{} for machine {}: {}",
                    alert.alert_type, alert.id, machine_id, alert.message
                );
                self.notifier
                    .notify(NotificationEvent::AlertOpened(alert.clone()));
                Ok(AlertOutcome::Opened(alert))
            }
            OpenAlertResult::AlreadyOpen(alert) => {
                debug!("{} alert #{} already open", alert.alert_type, alert.id);
                Ok(AlertOutcome::Suppressed(alert))
            }
        }
    }

    /// Resolve every open alert of a type for a machine
    ///
    /// Used both for auto-resolution and by operators.
    #[instrument(skip(self))]
    pub async fn resolve_type(
        &self,
        machine_id: MachineId,
        alert_type: AlertType,
    ) -> Result<Vec<Alert>, IngestError> {
        let resolved = with_timeout(
            self.timeout,
            machine_id,
            "resolve alerts",
            self.backend.resolve_alerts(machine_id, alert_type),
        )
        .await?;

        for alert in &resolved {
            info!("resolved {} alert #{} for machine {}", alert.alert_type, alert.id, machine_id);
            self.notifier
                .notify(NotificationEvent::AlertResolved(alert.clone()));
        }

        Ok(resolved)
    }

    /// Resolve a single alert by id
    ///
    /// `None` if the alert does not exist or is already resolved.
    #[instrument(skip(self))]
    pub async fn resolve_by_id(
        &self,
        machine_id: MachineId,
        alert_id: u64,
    ) -> Result<Option<Alert>, IngestError> {
        let resolved = with_timeout(
            self.timeout,
            machine_id,
            "resolve alert",
            self.backend.resolve_alert(alert_id),
        )
        .await?;

        if let Some(alert) = &resolved {
            info!("operator resolved {} alert #{}", alert.alert_type, alert.id);
            self.notifier
                .notify(NotificationEvent::AlertResolved(alert.clone()));
        }

        Ok(resolved)
    }
}
