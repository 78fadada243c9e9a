//! Alert notifications
//!
//! Sinks receive [`NotificationEvent`]s from the notifier actor. Delivery is
//! best effort: a failing sink is logged and never affects the alert that
//! caused the notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Notification;
use crate::{Alert, Severity};

pub mod discord;
pub mod webhook;

pub use discord::DiscordSink;
pub use webhook::WebhookSink;

/// Counts of currently open alerts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub generated_at: DateTime<Utc>,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let count = |severity: Severity| alerts.iter().filter(|a| a.severity == severity).count();

        Self {
            total: alerts.len(),
            critical: count(Severity::Critical),
            warning: count(Severity::Warning),
            info: count(Severity::Info),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum NotificationEvent {
    AlertOpened(Alert),
    AlertResolved(Alert),
    AlertSummary(AlertSummary),
}

impl NotificationEvent {
    /// One-line human readable form, shared by all sinks
    pub fn describe(&self) -> String {
        match self {
            NotificationEvent::AlertOpened(alert) => format!(
                "[{}] Alert #{} - Machine {} ({}): {}",
                alert.severity, alert.id, alert.machine_id, alert.alert_type, alert.message
            ),
            NotificationEvent::AlertResolved(alert) => format!(
                "RESOLVED - Alert #{} - Machine {} ({}): {}",
                alert.id, alert.machine_id, alert.alert_type, alert.message
            ),
            NotificationEvent::AlertSummary(summary) => format!(
                "Alert Summary - Total: {} | Critical: {} | Warning: {} | Info: {}",
                summary.total, summary.critical, summary.warning, summary.info
            ),
        }
    }
}

/// A destination for alert notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()>;
}

/// Writes every notification to the log, at a level matching its severity
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        let line = event.describe();

        match event {
            NotificationEvent::AlertOpened(alert) => match alert.severity {
                Severity::Critical => error!("CRITICAL ALERT: {line}"),
                Severity::Warning => warn!("WARNING ALERT: {line}"),
                Severity::Info => info!("INFO ALERT: {line}"),
            },
            NotificationEvent::AlertResolved(_) => info!("ALERT RESOLVED: {line}"),
            NotificationEvent::AlertSummary(_) => info!("ALERT SUMMARY: {line}"),
        }

        Ok(())
    }
}

/// Build the configured sinks; the log sink is always present
pub fn build_sinks(notifications: &[Notification]) -> Vec<Box<dyn NotificationSink>> {
    let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink)];

    for notification in notifications {
        match notification {
            Notification::Discord(discord) => sinks.push(Box::new(DiscordSink::new(discord.clone()))),
            Notification::Webhook(webhook) => sinks.push(Box::new(WebhookSink::new(webhook.clone()))),
        }
    }

    sinks
}
