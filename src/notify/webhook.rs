use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};

use super::{NotificationEvent, NotificationSink};
use crate::config::Webhook;

/// Posts every notification as JSON to a generic HTTP endpoint
///
/// ```json
/// {"message": "...", "event": "alert_opened", "data": {...}, "timestamp": "..."}
/// ```
pub struct WebhookSink {
    client: Client,
    config: Webhook,
}

impl WebhookSink {
    pub fn new(config: Webhook) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(url = %self.config.url))]
    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        let mut payload = serde_json::to_value(event)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("message".to_string(), json!(event.describe()));
            object.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        }

        let response = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("webhook failed with status: {}", response.status());
        }

        debug!("sent webhook notification");
        Ok(())
    }
}
