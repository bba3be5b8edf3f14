//! Per-channel watcher state machine.
//!
//! Polls for a new broadcast, dispatches a recording job and loops back to
//! detection. An empty filter watches every channel at once, so several
//! recordings may run concurrently; the in-flight stream set suppresses
//! duplicate dispatch of the same stream UUID.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::params::Params;
use super::recorder::Recorder;
use crate::metrics::MetricsCollector;
use crate::notification::{self, NotificationEvent};
use crate::platform::models::{Metadata, StreamDescriptor, UserRecord};
use crate::platform::playlist::Playlist;
use crate::platform::scraper::Scraper;
use crate::platform::session;
use crate::platform::{ApiClient, ApiError};
use crate::state::{DownloadState, StateRegistry};
use crate::utils::retry::retry_backoff;
use crate::utils::stream_set::StreamSet;
use crate::{Error, Result};

/// Detection backoff: initial 30 s, doubled, capped at 60 min, 60 attempts.
const DETECT_TRIES: u32 = 60;
const DETECT_INITIAL_BACKOFF: Duration = Duration::from_secs(30);
const DETECT_BACKOFF_MULTIPLIER: u32 = 2;
const DETECT_MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Grace period for in-flight recordings on shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

/// A detection hit, ready to record.
#[derive(Debug)]
pub struct Detection {
    pub stream: StreamDescriptor,
    pub user: UserRecord,
    pub playlists: Vec<Playlist>,
}

/// Watches one channel filter (a channel id, or everything when empty).
pub struct ChannelWatcher {
    client: Arc<ApiClient>,
    params: Arc<Params>,
    filter_channel_id: Option<String>,
    processing: Arc<StreamSet>,
    state: Arc<StateRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl ChannelWatcher {
    pub fn new(
        client: Arc<ApiClient>,
        params: Arc<Params>,
        filter_channel_id: Option<String>,
        processing: Arc<StreamSet>,
        state: Arc<StateRegistry>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            client,
            params,
            filter_channel_id,
            processing,
            state,
            metrics,
        }
    }

    fn pass_code(&self) -> Option<&str> {
        let code = self.params.pass_code.as_str();
        (!code.is_empty()).then_some(code)
    }

    /// Watch the channel until `token` is canceled, dispatching one
    /// recording task per detected stream.
    pub async fn watch(&self, token: CancellationToken) {
        info!(filter_channel_id = ?self.filter_channel_id, "watching channel");
        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            // Only meaningful for a fixed channel id; with an empty filter
            // the true channel id is unknown until detection.
            if let Some(channel_id) = &self.filter_channel_id {
                self.state.set_channel_state(
                    channel_id,
                    DownloadState::Idle,
                    Some(&self.params.labels),
                );
                notification::notify(NotificationEvent::Idle {
                    channel_id: channel_id.clone(),
                })
                .await;
            }

            // Reap recordings that finished since the last pass.
            while jobs.try_join_next().is_some() {}

            let Some(detection) = self.wait_for_new_stream(&token).await else {
                break;
            };

            let stream_uuid = detection.stream.uuid.clone();
            if !self.processing.insert(stream_uuid.clone()) {
                // Another watcher claimed this stream first.
                continue;
            }
            self.spawn_recording(&mut jobs, &token, detection, stream_uuid);
        }

        warn!("channel watcher context canceled, waiting for processing to finish");
        self.drain_or_fatal(jobs).await;
        warn!("processing finished");
    }

    fn spawn_recording(
        &self,
        jobs: &mut JoinSet<()>,
        token: &CancellationToken,
        detection: Detection,
        stream_uuid: String,
    ) {
        let recorder = Recorder {
            client: self.client.clone(),
            params: self.params.clone(),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
        };
        let processing = self.processing.clone();
        let state = self.state.clone();
        let labels = self.params.labels.clone();
        let job_token = token.child_token();

        jobs.spawn(async move {
            let meta = Metadata {
                user: detection.user,
                stream: detection.stream,
            };
            let channel_id = meta.user.username.clone();
            let title = meta.stream.title.clone();
            info!(channel_id = %channel_id, stream_uuid = %stream_uuid, "recording stream");

            let result = recorder.process(&job_token, &meta, &detection.playlists).await;
            processing.remove(&stream_uuid);

            match result {
                Ok(()) => {
                    state.set_channel_state(&channel_id, DownloadState::Finished, Some(&labels));
                    notification::notify(NotificationEvent::Finished { channel_id, title })
                        .await;
                }
                Err(e) if e.is_canceled() => {
                    state.set_channel_state(&channel_id, DownloadState::Canceled, Some(&labels));
                    notification::notify(NotificationEvent::Canceled { channel_id }).await;
                }
                Err(e) => {
                    error!(error = %e, "recording failed");
                    state.set_channel_error(&channel_id, &e.to_string());
                    notification::notify(NotificationEvent::Error {
                        channel_id,
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        });
    }

    /// Poll until a new stream is found. Returns `None` on cancellation.
    async fn wait_for_new_stream(&self, token: &CancellationToken) -> Option<Detection> {
        loop {
            match self.has_new_stream(token).await {
                Ok(Some(detection)) => return Some(detection),
                Ok(None) => {}
                Err(e) if e.is_canceled() => return None,
                Err(e) => error!(error = %e, "failed to check if online"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.params.wait_poll_interval) => {}
                _ = token.cancelled() => return None,
            }
        }
    }

    /// One detection round under exponential backoff.
    pub async fn has_new_stream(&self, token: &CancellationToken) -> Result<Option<Detection>> {
        retry_backoff(
            token,
            DETECT_TRIES,
            DETECT_INITIAL_BACKOFF,
            DETECT_BACKOFF_MULTIPLIER,
            DETECT_MAX_BACKOFF,
            || async {
                match (&self.filter_channel_id, self.pass_code()) {
                    // A pass code is only usable against a specific channel
                    // page; everything else goes through the REST API.
                    (Some(channel_id), Some(_)) => self.detect_scrape(token, channel_id).await,
                    _ => self.detect_api(token).await,
                }
            },
        )
        .await
    }

    /// API strategy: list current streams and validate the first usable
    /// candidate.
    async fn detect_api(&self, _token: &CancellationToken) -> Result<Option<Detection>> {
        let streams = match self
            .client
            .get_streams(self.filter_channel_id.as_deref(), self.pass_code())
            .await
        {
            Ok(streams) => streams,
            Err(e) => {
                // HTTP failures are routine polling noise; anything else
                // (transport, decode) is worth a notification.
                if e.status().is_none() {
                    self.notify_error(self.filter_channel_id.as_deref().unwrap_or(""), &e)
                        .await;
                }
                return Err(e.into());
            }
        };

        let mut last_err: Option<Error> = None;
        for stream in streams {
            let channel_id = stream.cast.agency_secret.channel_name.clone();
            if channel_id.is_empty() {
                // Scheduled but not started.
                warn!(stream_uuid = %stream.uuid, "stream is not ready");
                continue;
            }
            if self.params.ignore.contains(&channel_id) {
                continue;
            }
            if self.processing.contains(&stream.uuid) {
                continue;
            }

            info!(channel_id = %channel_id, title = %stream.title, "streams found");
            match self.validate_and_fetch(&channel_id, &stream.uuid).await {
                Ok(Some((user, playlists))) => {
                    return Ok(Some(Detection {
                        stream,
                        user,
                        playlists,
                    }));
                }
                Ok(None) => {}
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Scrape strategy: read the stream UUID off the channel page, then
    /// fetch the metadata over the Socket.IO session.
    async fn detect_scrape(
        &self,
        token: &CancellationToken,
        channel_id: &str,
    ) -> Result<Option<Detection>> {
        let scraper = Scraper::new(&self.client);
        let stream_uuid = match scraper.fetch_stream_uuid(channel_id, self.pass_code()).await {
            Ok(stream_uuid) => stream_uuid,
            Err(e) => {
                self.notify_error("", &e).await;
                return Err(Error::Api(e));
            }
        };

        let stream = match session::fetch_stream_metadata(
            &self.client,
            token,
            &stream_uuid,
            self.pass_code(),
        )
        .await
        {
            Ok(stream) => stream,
            Err(ApiError::StreamNotFound) => return Ok(None),
            Err(ApiError::Canceled) => return Err(Error::Canceled),
            Err(e) => return Err(Error::Api(e)),
        };

        if self.processing.contains(&stream.uuid) {
            return Ok(None);
        }

        match self.validate_and_fetch(channel_id, &stream.uuid).await? {
            Some((user, playlists)) => Ok(Some(Detection {
                stream,
                user,
                playlists,
            })),
            None => Ok(None),
        }
    }

    /// Resolve the user record, playback URL and playlists for a stream.
    /// Returns `Ok(None)` when the stream is not online yet.
    async fn validate_and_fetch(
        &self,
        channel_id: &str,
        stream_uuid: &str,
    ) -> Result<Option<(UserRecord, Vec<Playlist>)>> {
        let user = match self.client.get_user(channel_id).await {
            Ok(user) => user,
            Err(e) => {
                self.notify_on_client_or_unknown_error(channel_id, &e).await;
                return Err(Error::Api(e));
            }
        };

        let playback_url = match self.client.get_stream_playback_url(stream_uuid).await {
            Ok(url) => url,
            Err(e) => {
                self.notify_on_403_or_unknown_error(channel_id, &e).await;
                return Err(Error::Api(e));
            }
        };

        let playlists = match self
            .client
            .get_playlists(&playback_url, self.params.playlist_retries)
            .await
        {
            Ok(playlists) => playlists,
            Err(e) => {
                // The playlist shows up a little after the stream object;
                // a 404 just means "not online yet".
                if e.status() == Some(404) {
                    return Ok(None);
                }
                self.notify_on_403_or_unknown_error(channel_id, &e).await;
                return Err(Error::Api(e));
            }
        };
        if playlists.is_empty() {
            return Ok(None);
        }

        Ok(Some((user, playlists)))
    }

    /// Notify on client errors (< 500) and non-API errors.
    async fn notify_on_client_or_unknown_error(&self, channel_id: &str, error: &ApiError) {
        match error.status() {
            None => self.notify_error(channel_id, error).await,
            Some(status) if status < 500 => self.notify_error(channel_id, error).await,
            Some(_) => {}
        }
    }

    /// Notify on 403 and non-API errors only.
    async fn notify_on_403_or_unknown_error(&self, channel_id: &str, error: &ApiError) {
        match error.status() {
            None => self.notify_error(channel_id, error).await,
            Some(403) => self.notify_error(channel_id, error).await,
            Some(_) => {}
        }
    }

    async fn notify_error(&self, channel_id: &str, error: &ApiError) {
        notification::notify(NotificationEvent::Error {
            channel_id: channel_id.to_string(),
            error: error.to_string(),
        })
        .await;
    }

    /// Wait for in-flight recordings, killing the process after the grace
    /// period.
    async fn drain_or_fatal(&self, mut jobs: JoinSet<()>) {
        let drain = async {
            while jobs.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            error!("timeout waiting for processing to finish");
            std::process::exit(1);
        }
    }
}
