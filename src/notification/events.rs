//! Lifecycle events surfaced to the operator.

/// Everything the system may notify about.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Idle {
        channel_id: String,
    },
    PreparingFiles {
        channel_id: String,
        title: String,
    },
    Downloading {
        channel_id: String,
        title: String,
    },
    PostProcessing {
        channel_id: String,
        title: String,
    },
    Finished {
        channel_id: String,
        title: String,
    },
    Canceled {
        channel_id: String,
    },
    Error {
        channel_id: String,
        error: String,
    },
    LoginFailed {
        error: String,
    },
    Panicked {
        message: String,
    },
    ConfigReloaded,
}

impl NotificationEvent {
    /// Stable key used to look up the operator's format override.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "idle",
            Self::PreparingFiles { .. } => "preparingFiles",
            Self::Downloading { .. } => "downloading",
            Self::PostProcessing { .. } => "postProcessing",
            Self::Finished { .. } => "finished",
            Self::Canceled { .. } => "canceled",
            Self::Error { .. } => "error",
            Self::LoginFailed { .. } => "loginFailed",
            Self::Panicked { .. } => "panicked",
            Self::ConfigReloaded => "configReloaded",
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            Self::Idle { channel_id }
            | Self::PreparingFiles { channel_id, .. }
            | Self::Downloading { channel_id, .. }
            | Self::PostProcessing { channel_id, .. }
            | Self::Finished { channel_id, .. }
            | Self::Canceled { channel_id }
            | Self::Error { channel_id, .. } => channel_id,
            _ => "",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::PreparingFiles { title, .. }
            | Self::Downloading { title, .. }
            | Self::PostProcessing { title, .. }
            | Self::Finished { title, .. } => title,
            _ => "",
        }
    }

    pub fn error(&self) -> &str {
        match self {
            Self::Error { error, .. } | Self::LoginFailed { error } => error,
            Self::Panicked { message } => message,
            _ => "",
        }
    }

    pub fn default_title(&self) -> String {
        let channel = self.channel_id();
        match self {
            Self::Idle { .. } => format!("{channel} is offline"),
            Self::PreparingFiles { .. } => format!("{channel}: preparing files"),
            Self::Downloading { .. } => format!("{channel} is streaming"),
            Self::PostProcessing { .. } => format!("{channel}: post-processing"),
            Self::Finished { .. } => format!("{channel}: finished recording"),
            Self::Canceled { .. } => format!("{channel}: canceled"),
            Self::Error { .. } => format!("{channel}: error"),
            Self::LoginFailed { .. } => "login failed".to_string(),
            Self::Panicked { .. } => "panicked".to_string(),
            Self::ConfigReloaded => "config reloaded".to_string(),
        }
    }

    pub fn default_message(&self) -> String {
        match self {
            Self::Downloading { title, .. }
            | Self::PreparingFiles { title, .. }
            | Self::PostProcessing { title, .. }
            | Self::Finished { title, .. } => title.clone(),
            Self::Error { error, .. } | Self::LoginFailed { error } => error.clone(),
            Self::Panicked { message } => message.clone(),
            _ => String::new(),
        }
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Error { .. } | Self::LoginFailed { .. } | Self::Panicked { .. } => 5,
            Self::Finished { .. } | Self::Canceled { .. } => 3,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_stable() {
        let event = NotificationEvent::Downloading {
            channel_id: "chan".into(),
            title: "t".into(),
        };
        assert_eq!(event.key(), "downloading");
        assert_eq!(event.channel_id(), "chan");
        assert_eq!(event.title(), "t");
    }

    #[test]
    fn test_error_events_have_high_priority() {
        let event = NotificationEvent::LoginFailed {
            error: "denied".into(),
        };
        assert_eq!(event.default_priority(), 5);
        assert_eq!(event.error(), "denied");
    }
}
