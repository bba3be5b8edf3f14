//! Notification formatting and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::channels::{Notification, NotificationChannel};
use super::events::NotificationEvent;

/// Operator override for one event's rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationFormat {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub priority: Option<i32>,
}

/// Map of event key to format override, straight from the YAML config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct NotificationFormats(pub HashMap<String, NotificationFormat>);

impl NotificationFormats {
    fn get(&self, key: &str) -> NotificationFormat {
        self.0.get(key).cloned().unwrap_or_default()
    }
}

/// Replace the recognized placeholders in a format template.
fn render(template: &str, event: &NotificationEvent) -> String {
    let mut out = template.to_string();
    for (placeholder, value) in [
        ("ChannelID", event.channel_id()),
        ("Title", event.title()),
        ("Error", event.error()),
    ] {
        out = out
            .replace(&format!("{{{{ .{placeholder} }}}}"), value)
            .replace(&format!("{{{{.{placeholder}}}}}"), value);
    }
    out
}

/// Formats events and delivers them to every configured channel.
pub struct NotificationService {
    channels: Vec<Arc<dyn NotificationChannel>>,
    formats: NotificationFormats,
    include_title_in_message: bool,
    no_priority: bool,
}

impl NotificationService {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        formats: NotificationFormats,
        include_title_in_message: bool,
        no_priority: bool,
    ) -> Self {
        Self {
            channels,
            formats,
            include_title_in_message,
            no_priority,
        }
    }

    /// Render an event with the operator's overrides applied.
    /// Returns `None` when the event is disabled.
    pub fn format(&self, event: &NotificationEvent) -> Option<Notification> {
        let format = self.formats.get(event.key());
        if !format.enabled.unwrap_or(true) {
            return None;
        }

        let title = match &format.title {
            Some(template) => render(template, event),
            None => event.default_title(),
        };
        let mut message = match &format.message {
            Some(template) => render(template, event),
            None => event.default_message(),
        };
        if self.include_title_in_message && !title.is_empty() {
            message = if message.is_empty() {
                title.clone()
            } else {
                format!("{title}\n{message}")
            };
        }
        let priority = if self.no_priority {
            None
        } else {
            Some(format.priority.unwrap_or_else(|| event.default_priority()))
        };

        Some(Notification {
            title,
            message,
            priority,
        })
    }

    /// Deliver an event to every channel. Failures are logged, never
    /// propagated.
    pub async fn notify(&self, event: &NotificationEvent) {
        let Some(notification) = self.format(event) else {
            return;
        };
        for channel in &self.channels {
            if let Err(e) = channel.send(&notification).await {
                warn!(channel = channel.name(), error = %e, "notify failed");
            }
        }
    }
}
