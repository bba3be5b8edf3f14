//! Read-only status endpoint.
//!
//! `GET /` returns a JSON snapshot of per-channel state, `GET /health`
//! answers `OK`, and `GET /metrics` serves Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::PrometheusExporter;
use crate::state::StateRegistry;
use crate::Result;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StateRegistry>,
    pub exporter: Arc<PrometheusExporter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(state_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn state_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.exporter.export()
}

/// Parse a listen address; a bare `:port` binds every interface.
pub fn parse_listen_address(raw: &str) -> Result<SocketAddr> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .map_err(|e| crate::Error::Configuration(format!("invalid listen address {raw:?}: {e}")))
}

/// Serve the status endpoint until `token` is canceled.
pub async fn serve(addr: SocketAddr, state: AppState, token: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(listen_address = %addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::state::DownloadState;

    fn test_state() -> AppState {
        let registry = Arc::new(StateRegistry::new());
        let collector = Arc::new(MetricsCollector::new());
        AppState {
            registry,
            exporter: Arc::new(PrometheusExporter::new(collector)),
        }
    }

    #[test]
    fn test_parse_listen_address() {
        assert_eq!(
            parse_listen_address(":3000").unwrap(),
            "0.0.0.0:3000".parse().unwrap()
        );
        assert_eq!(
            parse_listen_address("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse().unwrap()
        );
        assert!(parse_listen_address("not-an-address").is_err());
    }

    #[tokio::test]
    async fn test_endpoints() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let state = test_state();
        state
            .registry
            .set_channel_state("chan", DownloadState::Downloading, None);
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["chan"]["state"], "DOWNLOADING");

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }
}
