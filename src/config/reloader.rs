//! Config hot reload.
//!
//! The file is watched both through filesystem events (debounced) and a
//! fallback ticker keyed by modification time. Loaded configs are handed
//! to a serial reload driver: the previous supervisor is canceled and
//! drained before the next one starts, and queued reloads coalesce so only
//! the latest is applied.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{load_config, Config};
use crate::metrics::MetricsCollector;
use crate::monitor::supervisor;
use crate::state::StateRegistry;
use crate::{Error, Result};

/// Quiet period after a filesystem event before the file is re-read.
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Fallback poll interval in case filesystem events are not delivered.
const FALLBACK_TICK: Duration = Duration::from_secs(5);

/// How long a draining supervisor may take before the process is killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

fn mod_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

async fn load_and_send(
    path: &Path,
    tx: &mpsc::Sender<Config>,
    token: &CancellationToken,
) -> Result<()> {
    let config = load_config(path)?;
    tokio::select! {
        res = tx.send(config) => {
            res.map_err(|_| Error::Other("config channel closed".to_string()))
        }
        _ = token.cancelled() => Err(Error::Canceled),
    }
}

/// Watch `path` and send each new configuration over `tx`, starting with
/// the current content.
pub async fn observe_config(
    token: CancellationToken,
    path: PathBuf,
    tx: mpsc::Sender<Config>,
) -> Result<()> {
    let mut last_mod_time = mod_time(&path);

    info!(file = %path.display(), "initial config detected");
    if let Err(e) = load_and_send(&path, &tx, &token).await {
        if e.is_canceled() {
            return Ok(());
        }
        error!(file = %path.display(), error = %e, "failed to load config");
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(
        move |result: notify::Result<notify::Event>| {
            let _ = event_tx.send(result);
        },
    )
    .map_err(|e| Error::Configuration(format!("failed to watch config: {e}")))?;
    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Configuration(format!("failed to watch config: {e}")))?;

    let mut ticker = tokio::time::interval(FALLBACK_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let changed = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => true,
            event = event_rx.recv() => match event {
                None => {
                    error!("watcher channel closed");
                    return Err(Error::Other("watcher channel closed".to_string()));
                }
                Some(Err(e)) => {
                    error!(file = %path.display(), error = %e, "config watcher error");
                    false
                }
                Some(Ok(_)) => {
                    // Editors fire bursts of events; settle before reloading.
                    tokio::time::sleep(DEBOUNCE).await;
                    while event_rx.try_recv().is_ok() {}
                    true
                }
            },
        };
        if !changed {
            continue;
        }

        let current = mod_time(&path);
        if current == last_mod_time {
            continue;
        }
        last_mod_time = current;

        info!("new config detected");
        match load_and_send(&path, &tx, &token).await {
            Ok(()) => {}
            Err(e) if e.is_canceled() => return Ok(()),
            Err(e) => error!(file = %path.display(), error = %e, "failed to load config"),
        }
    }
}

/// Serial reload driver: runs one supervisor per configuration, tearing
/// down the previous one first. Returns on cancellation.
pub async fn reload_loop(
    token: CancellationToken,
    mut rx: mpsc::Receiver<Config>,
    state: Arc<StateRegistry>,
    metrics: Arc<MetricsCollector>,
) -> Result<()> {
    let mut active: Option<(CancellationToken, JoinHandle<()>)> = None;

    loop {
        tokio::select! {
            maybe_config = rx.recv() => {
                let Some(mut config) = maybe_config else {
                    return Err(Error::Other("config channel closed".to_string()));
                };
                // Coalesce reloads queued while the previous one was
                // draining; only the latest is applied.
                while let Ok(newer) = rx.try_recv() {
                    config = newer;
                }

                if let Some((config_token, handle)) = active.take() {
                    config_token.cancel();
                    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                        Ok(_) => info!("loading new config"),
                        Err(_) => {
                            error!("couldn't load a new config because of a deadlock");
                            std::process::exit(1);
                        }
                    }
                }

                info!("loaded new config");
                let config_token = token.child_token();
                let handle = tokio::spawn(supervisor::run_config(
                    config_token.clone(),
                    Arc::new(config),
                    state.clone(),
                    metrics.clone(),
                ));
                active = Some((config_token, handle));
            }
            _ = token.cancelled() => {
                if let Some((config_token, handle)) = active.take() {
                    config_token.cancel();
                    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                        Ok(_) => info!("config reloader graceful exit"),
                        Err(_) => {
                            error!("config reloader force exit");
                            std::process::exit(1);
                        }
                    }
                }
                warn!("config reloader context canceled");
                return Ok(());
            }
        }
    }
}
