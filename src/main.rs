use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use withny_dl::api::{self, AppState};
use withny_dl::config::reloader;
use withny_dl::metrics::{MetricsCollector, PrometheusExporter};
use withny_dl::state::StateRegistry;
use withny_dl::{panic_hook, Error};

fn parse_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => return args.next().map(PathBuf::from),
            _ => {}
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "withny_dl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    panic_hook::install();

    let Some(config_path) = parse_args() else {
        error!("usage: withny-dl --config <config.yaml>");
        std::process::exit(1);
    };

    let root = CancellationToken::new();

    // SIGINT/SIGTERM cancel the root context; everything drains from there.
    {
        let root = root.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            root.cancel();
        });
    }

    let state = Arc::new(StateRegistry::new());
    let metrics = Arc::new(MetricsCollector::new());
    let exporter = Arc::new(PrometheusExporter::new(metrics.clone()));

    // Status endpoint.
    let listen_address =
        std::env::var("PPROF_LISTEN_ADDRESS").unwrap_or_else(|_| ":3000".to_string());
    let addr = api::server::parse_listen_address(&listen_address)?;
    {
        let app_state = AppState {
            registry: state.clone(),
            exporter,
        };
        let token = root.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(addr, app_state, token).await {
                error!(error = %e, "status server stopped");
            }
        });
    }

    let (config_tx, config_rx) = mpsc::channel(1);
    {
        let token = root.clone();
        tokio::spawn(async move {
            if let Err(e) = reloader::observe_config(token, config_path, config_tx).await {
                error!(error = %e, "config observer stopped");
            }
        });
    }

    match reloader::reload_loop(root.clone(), config_rx, state, metrics).await {
        Ok(()) => {
            info!("clean shutdown");
            Ok(())
        }
        Err(e) if matches!(e, Error::Canceled) => Ok(()),
        Err(e) => {
            error!(error = %e, "fatal error");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
