//! User-facing notifications.
//!
//! The service formats lifecycle events and fans them out to the
//! configured channels. The active service is swapped on config reload;
//! reconfiguration is single-writer (the reloader).

pub mod channels;
pub mod events;
pub mod service;

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub use events::NotificationEvent;
pub use service::{NotificationFormat, NotificationFormats, NotificationService};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

static ACTIVE: RwLock<Option<Arc<NotificationService>>> = RwLock::new(None);

/// Swap the process-wide notification service.
pub fn set_active(service: Option<Arc<NotificationService>>) {
    *ACTIVE.write() = service;
}

pub fn active() -> Option<Arc<NotificationService>> {
    ACTIVE.read().clone()
}

/// Send an event through the active service, if any. Failures are logged
/// inside the service and never propagate.
pub async fn notify(event: NotificationEvent) {
    if let Some(service) = active() {
        service.notify(&event).await;
    }
}

pub async fn notify_login_failed(error: &crate::platform::ApiError) {
    notify(NotificationEvent::LoginFailed {
        error: error.to_string(),
    })
    .await;
}

/// Post-mortem notification, callable from the panic hook (sync context).
/// Blocks the calling thread for at most a few seconds.
pub fn notify_panicked_blocking(message: &str) {
    let Some(service) = active() else {
        return;
    };
    let message = message.to_string();
    let handle = std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(_) => return,
        };
        runtime.block_on(async {
            let _ = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                service.notify(&NotificationEvent::Panicked { message }),
            )
            .await;
        });
    });
    let _ = handle.join();
}
