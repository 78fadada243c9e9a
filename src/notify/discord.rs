use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{NotificationEvent, NotificationSink};
use crate::config::Discord;
use crate::{Alert, AlertType, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => RED,
        Severity::Warning => ORANGE,
        Severity::Info => LIGHT_BLUE,
    }
}

fn type_emoji(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::LowWater => "💧",
        AlertType::LowMilk => "🥛",
        AlertType::LowBeans => "🫘",
        AlertType::Malfunction => "🔧",
    }
}

fn alert_fields(alert: &Alert) -> Vec<EmbedField> {
    vec![
        EmbedField {
            name: "☕ Machine".to_string(),
            value: alert.machine_id.to_string(),
            inline: true,
        },
        EmbedField {
            name: "🏷️ Type".to_string(),
            value: alert.alert_type.to_string(),
            inline: true,
        },
        EmbedField {
            name: "⚠️ Severity".to_string(),
            value: alert.severity.to_string(),
            inline: true,
        },
    ]
}

pub fn build_embed(event: &NotificationEvent) -> Embed {
    let (title, description, color, fields, footer) = match event {
        NotificationEvent::AlertOpened(alert) => (
            format!("{} {} Alert", type_emoji(alert.alert_type), alert.alert_type),
            alert.message.clone(),
            severity_color(alert.severity),
            alert_fields(alert),
            Some(format!("Alert #{}", alert.id)),
        ),
        NotificationEvent::AlertResolved(alert) => (
            format!("✅ {} Resolved", alert.alert_type),
            format!("Machine **{}**: {}", alert.machine_id, alert.message),
            GREEN,
            alert_fields(alert),
            Some(format!("Alert #{}", alert.id)),
        ),
        NotificationEvent::AlertSummary(summary) => (
            "📊 Alert Summary".to_string(),
            format!("{} open alerts", summary.total),
            if summary.critical > 0 { RED } else { LIGHT_BLUE },
            vec![
                EmbedField {
                    name: "🔴 Critical".to_string(),
                    value: summary.critical.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "🟠 Warning".to_string(),
                    value: summary.warning.to_string(),
                    inline: true,
                },
                EmbedField {
                    name: "🔵 Info".to_string(),
                    value: summary.info.to_string(),
                    inline: true,
                },
            ],
            None,
        ),
    };

    Embed {
        title: Some(title),
        description: Some(description),
        color: Some(color),
        fields,
        footer: footer.map(|text| EmbedFooter { text }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

/// Posts notifications to a Discord webhook as embeds
pub struct DiscordSink {
    client: Client,
    config: Discord,
}

impl DiscordSink {
    pub fn new(config: Discord) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn build_message(&self, event: &NotificationEvent) -> Message {
        let mut builder = MessageBuilder::new().add_embed(build_embed(event));

        // only ping for new critical alerts
        if let (Some(user_id), NotificationEvent::AlertOpened(alert)) = (&self.config.user_id, event)
        {
            if alert.severity == Severity::Critical {
                builder = builder.content(format!(
                    "🚨 Machine {} needs attention <@{user_id}>",
                    alert.machine_id
                ));
            }
        }

        builder.build()
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
    }

    #[instrument(skip_all)]
    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        let message = self.build_message(event);

        let response = self
            .client
            .post(&self.config.url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord message failed with status {status}: {body}");
        }

        debug!("sent Discord message");
        Ok(())
    }
}
