//! In-process metrics collector.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters and gauges for the recording system. Cheap to update from any
/// task.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    channels_watching: AtomicI64,
    active_recordings: AtomicI64,
    recordings_total: AtomicU64,
    fragments_downloaded_total: AtomicU64,
    fragments_skipped_total: AtomicU64,
    bytes_downloaded_total: AtomicU64,
    download_errors_total: AtomicU64,
    post_process_runs_total: AtomicU64,
    post_process_errors_total: AtomicU64,
    login_refreshes_total: AtomicU64,
    login_failures_total: AtomicU64,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub channels_watching: i64,
    pub active_recordings: i64,
    pub recordings_total: u64,
    pub fragments_downloaded_total: u64,
    pub fragments_skipped_total: u64,
    pub bytes_downloaded_total: u64,
    pub download_errors_total: u64,
    pub post_process_runs_total: u64,
    pub post_process_errors_total: u64,
    pub login_refreshes_total: u64,
    pub login_failures_total: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_channels_watching(&self, count: i64) {
        self.channels_watching.store(count, Ordering::Relaxed);
    }

    pub fn record_recording_started(&self) {
        self.active_recordings.fetch_add(1, Ordering::Relaxed);
        self.recordings_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_finished(&self) {
        self.active_recordings.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_fragment(&self, bytes: u64) {
        self.fragments_downloaded_total
            .fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_fragment_skipped(&self) {
        self.fragments_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_error(&self) {
        self.download_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post_process_run(&self) {
        self.post_process_runs_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_post_process_error(&self) {
        self.post_process_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login_refresh(&self) {
        self.login_refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_login_failure(&self) {
        self.login_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            channels_watching: self.channels_watching.load(Ordering::Relaxed),
            active_recordings: self.active_recordings.load(Ordering::Relaxed),
            recordings_total: self.recordings_total.load(Ordering::Relaxed),
            fragments_downloaded_total: self.fragments_downloaded_total.load(Ordering::Relaxed),
            fragments_skipped_total: self.fragments_skipped_total.load(Ordering::Relaxed),
            bytes_downloaded_total: self.bytes_downloaded_total.load(Ordering::Relaxed),
            download_errors_total: self.download_errors_total.load(Ordering::Relaxed),
            post_process_runs_total: self.post_process_runs_total.load(Ordering::Relaxed),
            post_process_errors_total: self.post_process_errors_total.load(Ordering::Relaxed),
            login_refreshes_total: self.login_refreshes_total.load(Ordering::Relaxed),
            login_failures_total: self.login_failures_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.record_fragment(100);
        collector.record_fragment(50);
        collector.record_fragment_skipped();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.fragments_downloaded_total, 2);
        assert_eq!(snapshot.bytes_downloaded_total, 150);
        assert_eq!(snapshot.fragments_skipped_total, 1);
    }

    #[test]
    fn test_active_recordings_gauge() {
        let collector = MetricsCollector::new();
        collector.record_recording_started();
        collector.record_recording_started();
        collector.record_recording_finished();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.active_recordings, 1);
        assert_eq!(snapshot.recordings_total, 2);
    }
}
