//! Watcher supervisor.
//!
//! Owns the watcher set for one loaded configuration: builds the HTTP
//! client and credential services, paces watcher start times, spawns the
//! periodic cleaners, and joins everything on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::params::Params;
use super::watcher::ChannelWatcher;
use crate::cleaner;
use crate::config::Config;
use crate::credentials::{CredentialsReader, CredentialsService, CredentialsStore};
use crate::metrics::MetricsCollector;
use crate::notification::{self, NotificationEvent, NotificationService};
use crate::notification::channels::webhook::WebhookChannel;
use crate::notification::channels::NotificationChannel;
use crate::platform::ApiClient;
use crate::state::StateRegistry;
use crate::utils::stream_set::StreamSet;

/// Global HTTP client timeout; individual calls use shorter deadlines.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Run one configuration until `token` is canceled.
///
/// Fatal configuration and login errors terminate the process with exit
/// code 1, as there is nothing sensible to retry.
pub async fn run_config(
    token: CancellationToken,
    config: Arc<Config>,
    state: Arc<StateRegistry>,
    metrics: Arc<MetricsCollector>,
) {
    if config.credentials_file.is_empty() {
        error!("no credentials file configured");
        std::process::exit(1);
    }

    let http = match reqwest::Client::builder()
        .cookie_store(true)
        .timeout(HTTP_TIMEOUT)
        .build()
    {
        Ok(http) => http,
        Err(e) => {
            error!(error = %e, "failed to build http client");
            std::process::exit(1);
        }
    };

    let store = Arc::new(CredentialsStore::new(
        config.cached_credentials_file(),
        std::env::var("WITHNY_ENCRYPTION_KEY").ok(),
    ));
    let client = Arc::new(ApiClient::new(http, store));
    let reader = CredentialsReader::new(&config.credentials_file);
    let credentials = CredentialsService::new(client.clone(), reader)
        .with_clear_cache_after(config.clear_credential_cache_on_failure_after())
        .with_metrics(metrics.clone());

    // Background token refresh for the lifetime of this config.
    let login_task = {
        let token = token.clone();
        tokio::spawn(async move {
            match credentials.login_loop(&token).await {
                Ok(()) => {}
                Err(e) if e.is_canceled() => info!("abort login"),
                Err(e) => {
                    error!(error = %e, "failed to login");
                    std::process::exit(1);
                }
            }
        })
    };

    if config.notifier.enabled {
        let channels: Vec<Arc<dyn NotificationChannel>> = config
            .notifier
            .urls
            .iter()
            .map(|url| {
                Arc::new(WebhookChannel::new(url, reqwest::Client::new()))
                    as Arc<dyn NotificationChannel>
            })
            .collect();
        if channels.is_empty() {
            warn!("notifier enabled but there are no URLs");
        }
        notification::set_active(Some(Arc::new(NotificationService::new(
            channels,
            config.notifier.notification_formats.clone(),
            config.notifier.include_title_in_message,
            config.notifier.no_priority,
        ))));
        info!("using webhook notifier");
    } else {
        notification::set_active(None);
        info!("no notifier configured");
    }
    notification::notify(NotificationEvent::ConfigReloaded).await;

    let mut default_params = Params::default();
    config.default_params.override_onto(&mut default_params);

    let processing = Arc::new(StreamSet::new());
    metrics.set_channels_watching(config.channels.len() as i64);

    let mut tasks: JoinSet<()> = JoinSet::new();
    for (channel_id, overrides) in &config.channels {
        let mut channel_params = default_params.clone();
        overrides.override_onto(&mut channel_params);

        // Scan for leftover concat intermediates.
        if !channel_params.keep_intermediates
            && channel_params.concat
            && !channel_params.scan_directory.is_empty()
        {
            tasks.spawn(cleaner::clean_periodically(
                token.child_token(),
                channel_params.scan_directory.clone().into(),
                channel_params.eligible_for_cleaning_age,
            ));
        }

        let watcher = ChannelWatcher::new(
            client.clone(),
            Arc::new(channel_params),
            (!channel_id.is_empty()).then(|| channel_id.clone()),
            processing.clone(),
            state.clone(),
            metrics.clone(),
        );
        let watcher_token = token.child_token();
        tasks.spawn(async move { watcher.watch(watcher_token).await });

        // Spread out the channel start times to avoid hammering the API.
        tokio::select! {
            _ = tokio::time::sleep(config.polling_pacing()) => {}
            _ = token.cancelled() => break,
        }
    }

    while tasks.join_next().await.is_some() {}
    login_task.abort();
    let _ = login_task.await;
}
