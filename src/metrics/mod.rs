//! Metrics collection and Prometheus text export.

mod collector;
mod prometheus;

pub use collector::{MetricsCollector, MetricsSnapshot};
pub use prometheus::PrometheusExporter;
