//! Per-channel download state, observable via the status endpoint.

use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// State of a channel's recording loop. Transitions are monotonic within a
/// single recording; on loop restart the state returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    Idle,
    PreparingFiles,
    Downloading,
    PostProcessing,
    Finished,
    Canceled,
    Error,
}

/// Snapshot of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub state: DownloadState,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registry of channel states. One writer per channel (the watcher itself),
/// many readers.
#[derive(Debug, Default)]
pub struct StateRegistry {
    channels: DashMap<String, ChannelStatus>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_channel_state(
        &self,
        channel_id: &str,
        state: DownloadState,
        labels: Option<&HashMap<String, String>>,
    ) {
        self.channels.insert(
            channel_id.to_string(),
            ChannelStatus {
                state,
                labels: labels.cloned().unwrap_or_default(),
                error: None,
            },
        );
    }

    pub fn set_channel_error(&self, channel_id: &str, error: &str) {
        let labels = self
            .channels
            .get(channel_id)
            .map(|status| status.labels.clone())
            .unwrap_or_default();
        self.channels.insert(
            channel_id.to_string(),
            ChannelStatus {
                state: DownloadState::Error,
                labels,
                error: Some(error.to_string()),
            },
        );
    }

    pub fn get_channel_state(&self, channel_id: &str) -> Option<DownloadState> {
        self.channels.get(channel_id).map(|status| status.state)
    }

    /// Sorted snapshot for the status endpoint.
    pub fn snapshot(&self) -> BTreeMap<String, ChannelStatus> {
        self.channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of channels currently downloading or post-processing.
    pub fn active_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|entry| {
                matches!(
                    entry.value().state,
                    DownloadState::Downloading | DownloadState::PostProcessing
                )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_state() {
        let registry = StateRegistry::new();
        assert!(registry.get_channel_state("chan").is_none());

        registry.set_channel_state("chan", DownloadState::Idle, None);
        assert_eq!(
            registry.get_channel_state("chan"),
            Some(DownloadState::Idle)
        );
    }

    #[test]
    fn test_error_keeps_labels() {
        let registry = StateRegistry::new();
        let labels = HashMap::from([("env".to_string(), "prod".to_string())]);
        registry.set_channel_state("chan", DownloadState::Downloading, Some(&labels));

        registry.set_channel_error("chan", "boom");
        let snapshot = registry.snapshot();
        let status = &snapshot["chan"];
        assert_eq!(status.state, DownloadState::Error);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert_eq!(status.labels["env"], "prod");
    }

    #[test]
    fn test_snapshot_serializes_state_names() {
        let registry = StateRegistry::new();
        registry.set_channel_state("chan", DownloadState::PreparingFiles, None);
        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        assert!(json.contains("PREPARING_FILES"));
    }

    #[test]
    fn test_active_count() {
        let registry = StateRegistry::new();
        registry.set_channel_state("a", DownloadState::Downloading, None);
        registry.set_channel_state("b", DownloadState::PostProcessing, None);
        registry.set_channel_state("c", DownloadState::Idle, None);
        assert_eq!(registry.active_count(), 2);
    }
}
