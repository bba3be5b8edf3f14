//! Generic JSON webhook transport.

use async_trait::async_trait;
use serde_json::json;

use super::{Notification, NotificationChannel};
use crate::notification::NotificationError;

/// Posts notifications as a JSON body to one URL.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut body = json!({
            "title": notification.title,
            "message": notification.message,
        });
        if let Some(priority) = notification.priority {
            body["priority"] = json!(priority);
        }

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected(format!(
                "{} answered {}",
                self.url, status
            )));
        }
        Ok(())
    }
}
