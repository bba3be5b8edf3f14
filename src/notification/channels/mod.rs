//! Notification transports.

pub mod webhook;

use async_trait::async_trait;

use super::NotificationError;

/// A formatted notification ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: Option<i32>,
}

/// One delivery transport.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}
