//! Prometheus text-format exporter.

use std::fmt::Write as _;
use std::sync::Arc;

use super::collector::MetricsCollector;

/// Renders the collector's snapshot in Prometheus text format.
pub struct PrometheusExporter {
    collector: Arc<MetricsCollector>,
    namespace: String,
}

impl PrometheusExporter {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self {
            collector,
            namespace: "withny_dl".to_string(),
        }
    }

    pub fn export(&self) -> String {
        let snapshot = self.collector.snapshot();
        let mut out = String::new();

        self.write_gauge(
            &mut out,
            "channels_watching",
            "Number of channels currently watched",
            snapshot.channels_watching as f64,
        );
        self.write_gauge(
            &mut out,
            "active_recordings",
            "Number of recordings in flight",
            snapshot.active_recordings as f64,
        );
        self.write_counter(
            &mut out,
            "recordings_total",
            "Total number of recordings started",
            snapshot.recordings_total as f64,
        );
        self.write_counter(
            &mut out,
            "fragments_downloaded_total",
            "Total number of fragments written to disk",
            snapshot.fragments_downloaded_total as f64,
        );
        self.write_counter(
            &mut out,
            "fragments_skipped_total",
            "Total number of fragments skipped under the packet-loss budget",
            snapshot.fragments_skipped_total as f64,
        );
        self.write_counter(
            &mut out,
            "download_bytes_total",
            "Total bytes downloaded",
            snapshot.bytes_downloaded_total as f64,
        );
        self.write_counter(
            &mut out,
            "download_errors_total",
            "Total download errors",
            snapshot.download_errors_total as f64,
        );
        self.write_counter(
            &mut out,
            "post_process_runs_total",
            "Total post-processing runs",
            snapshot.post_process_runs_total as f64,
        );
        self.write_counter(
            &mut out,
            "post_process_errors_total",
            "Total post-processing errors",
            snapshot.post_process_errors_total as f64,
        );
        self.write_counter(
            &mut out,
            "login_refreshes_total",
            "Total successful token refreshes",
            snapshot.login_refreshes_total as f64,
        );
        self.write_counter(
            &mut out,
            "login_failures_total",
            "Total failed token refreshes",
            snapshot.login_failures_total as f64,
        );

        out
    }

    fn write_gauge(&self, out: &mut String, name: &str, help: &str, value: f64) {
        self.write_metric(out, name, help, "gauge", value);
    }

    fn write_counter(&self, out: &mut String, name: &str, help: &str, value: f64) {
        self.write_metric(out, name, help, "counter", value);
    }

    fn write_metric(&self, out: &mut String, name: &str, help: &str, kind: &str, value: f64) {
        let full = format!("{}_{}", self.namespace, name);
        let _ = writeln!(out, "# HELP {full} {help}");
        let _ = writeln!(out, "# TYPE {full} {kind}");
        let _ = writeln!(out, "{full} {value}");
    }
}
