//! HLS pull engine.
//!
//! A producer task polls the media playlist and emits newly discovered
//! fragments; the consumer drains a bounded queue and appends each
//! fragment's bytes to the output sink in order. Fragments are opaque byte
//! blobs; the engine is format-agnostic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::metrics::MetricsCollector;
use crate::platform::client::{ApiClient, ORIGIN, REFERER};

const HLS_ACCEPT: &str =
    "application/x-mpegURL, application/vnd.apple.mpegurl, application/json, text/plain";

/// Per-request deadline for playlist polls and fragment downloads.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Capacity of the in-memory fragment queue. Bounds memory and
/// backpressures the producer.
const QUEUE_CAPACITY: usize = 10;

/// The producer reports EOF when no new fragment showed up for this long.
const NO_FRAGMENT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Pause between playlist polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_PACKET_LOSS_MAX: u32 = 20;
pub const DEFAULT_FRAGMENT_RETRIES: u32 = 10;
pub const DEFAULT_PLAYLIST_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum HlsError {
    #[error("hls download stopped with forbidden error")]
    Forbidden,

    /// The playlist answered 404: the broadcast is over. Success-equivalent.
    #[error("stream ended")]
    StreamEnded,

    #[error("HTTP error GET {url}, code={status}, body={body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("packet loss budget exceeded ({count} > {max})")]
    PacketLossExceeded { count: u32, max: u32 },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to write fragment: {0}")]
    Sink(#[from] std::io::Error),

    #[error("operation canceled")]
    Canceled,
}

impl HlsError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Transient failures counted against the packet-loss budget in the
    /// playlist poll loop.
    fn is_transient_transport(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// One media segment discovered in the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub url: String,
    /// Accumulated `EXT-X-PROGRAM-DATE-TIME`, when the playlist carries one.
    pub time: Option<DateTime<Utc>>,
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Parse a media playlist body into fragments, in source order.
///
/// `EXT-X-PROGRAM-DATE-TIME` lines accumulate into the following fragment;
/// invalid timestamps fall back to now. Duplicate URLs within one poll are
/// dropped.
fn parse_media_playlist(body: &str) -> Vec<Fragment> {
    let mut fragments: Vec<Fragment> = Vec::with_capacity(10);
    let mut exists: HashSet<&str> = HashSet::new();
    let mut current_time: Option<DateTime<Utc>> = None;

    for line in body.lines() {
        let line = line.trim();
        if let Some(ts) = line.strip_prefix("#EXT-X-PROGRAM-DATE-TIME:") {
            current_time = match DateTime::parse_from_rfc3339(ts) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    warn!(ts, error = %e, "failed to parse time, using now");
                    Some(Utc::now())
                }
            };
        } else if line.starts_with("https://") && !exists.contains(line) {
            if url::Url::parse(line).is_err() {
                warn!(line, "playlist returned a bad url, skipping that line");
                continue;
            }
            fragments.push(Fragment {
                url: line.to_string(),
                time: current_time,
            });
            exists.insert(line);
        }
    }
    fragments
}

/// De-duplication and resume state across playlist polls.
///
/// Ordering is by program date time while every observed fragment carries
/// one; as soon as a fragment without a timestamp shows up the tracker
/// falls back to basename ordering for the rest of the recording.
#[derive(Debug, Default)]
struct FragmentTracker {
    seen: HashSet<String>,
    last_name: Option<String>,
    last_time: Option<DateTime<Utc>>,
    name_based: bool,
}

impl FragmentTracker {
    /// Keep only the fragments strictly after the resume marker that were
    /// never emitted before, and advance the marker past them.
    fn select_new(&mut self, fragments: Vec<Fragment>) -> Vec<Fragment> {
        let mut new_idx = 0;

        if let Some(last_name) = self.last_name.clone() {
            if self.name_based || self.last_time.is_some() {
                for (i, fragment) in fragments.iter().enumerate() {
                    if !self.name_based && fragment.time.is_none() {
                        warn!("fragment time is missing, using name based sorting");
                        self.name_based = true;
                    }

                    // The marker matches only on exact name equality; under
                    // time ordering an equally-named fragment with a newer
                    // timestamp belongs to a different playlist rotation and
                    // is not the marker.
                    let name_matches = basename(&fragment.url) == last_name;
                    let time_matches = self.name_based
                        || matches!(
                            (self.last_time, fragment.time),
                            (Some(last), Some(current)) if last >= current
                        );
                    if name_matches && time_matches {
                        new_idx = i + 1;
                    }
                }
            }
        }

        let mut selected = Vec::new();
        for fragment in fragments.into_iter().skip(new_idx) {
            if self.seen.contains(&fragment.url) {
                continue;
            }
            self.last_name = Some(basename(&fragment.url).to_string());
            if !self.name_based {
                self.last_time = fragment.time;
            }
            self.seen.insert(fragment.url.clone());
            selected.push(fragment);
        }
        selected
    }
}

/// Downloads one HLS media playlist to a sink.
#[derive(Clone)]
pub struct HlsDownloader {
    client: Arc<ApiClient>,
    url: String,
    packet_loss_max: u32,
    fragment_retries: u32,
    playlist_retries: u32,
    metrics: Option<Arc<MetricsCollector>>,
    // Logged once on the first successful poll so the operator is not
    // spammed while the stream spins up.
    ready: Arc<AtomicBool>,
}

impl HlsDownloader {
    pub fn new(client: Arc<ApiClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            packet_loss_max: DEFAULT_PACKET_LOSS_MAX,
            fragment_retries: DEFAULT_FRAGMENT_RETRIES,
            playlist_retries: DEFAULT_PLAYLIST_RETRIES,
            metrics: None,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_packet_loss_max(mut self, max: u32) -> Self {
        self.packet_loss_max = max;
        self
    }

    pub fn with_fragment_retries(mut self, retries: u32) -> Self {
        self.fragment_retries = retries;
        self
    }

    pub fn with_playlist_retries(mut self, retries: u32) -> Self {
        self.playlist_retries = retries;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Check whether the playlist is ready to be downloaded.
    ///
    /// A 404 means "not ready yet" and is not an error.
    pub async fn probe(&self) -> Result<bool, HlsError> {
        let resp = self
            .client
            .auth_request(Method::GET, &self.url)
            .await
            .header(reqwest::header::ACCEPT, HLS_ACCEPT)
            .header(reqwest::header::REFERER, REFERER)
            .header(reqwest::header::ORIGIN, ORIGIN)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(true);
        }
        let body = resp.text().await.unwrap_or_default();
        if status == 404 {
            warn!(url = %self.url, status, "stream not ready");
            return Ok(false);
        }
        error!(url = %self.url, status, body, "http error");
        Err(HlsError::Http {
            status,
            url: self.url.clone(),
            body,
        })
    }

    /// Fetch the media playlist and return its fragments.
    async fn get_fragment_urls(&self) -> Result<Vec<Fragment>, HlsError> {
        let mut last_err: Option<HlsError> = None;
        for count in 0..=self.playlist_retries {
            let resp = self
                .client
                .auth_request(Method::GET, &self.url)
                .await
                .header(reqwest::header::ACCEPT, HLS_ACCEPT)
                .header(reqwest::header::REFERER, REFERER)
                .header(reqwest::header::ORIGIN, ORIGIN)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;

            let status = resp.status().as_u16();
            if (200..300).contains(&status) {
                let body = resp.text().await?;
                if !self.ready.swap(true, Ordering::Relaxed) {
                    info!("downloading");
                }
                return Ok(parse_media_playlist(&body));
            }

            let body = resp.text().await.unwrap_or_default();
            match status {
                403 => {
                    error!(url = %self.url, status, body, "http error");
                    return Err(HlsError::Forbidden);
                }
                404 => {
                    warn!(url = %self.url, status, "stream is no more available");
                    return Err(HlsError::StreamEnded);
                }
                500..=599 => {
                    warn!(
                        url = %self.url,
                        status,
                        count,
                        playlist_retries = self.playlist_retries,
                        "http error, retrying"
                    );
                    last_err = Some(HlsError::Http {
                        status,
                        url: self.url.clone(),
                        body,
                    });
                }
                _ => {
                    error!(url = %self.url, status, body, "http error");
                    return Err(HlsError::Http {
                        status,
                        url: self.url.clone(),
                        body,
                    });
                }
            }
        }

        let err = last_err.expect("retry loop only exhausts on 5xx");
        error!(
            url = %self.url,
            playlist_retries = self.playlist_retries,
            error = %err,
            "giving up after too many http errors"
        );
        Err(err)
    }

    /// Producer: poll the playlist and push new fragments until the stream
    /// ends. Returns `Ok(())` on a clean end of stream.
    async fn fill_queue(
        &self,
        token: CancellationToken,
        tx: mpsc::Sender<Fragment>,
    ) -> Result<(), HlsError> {
        debug!("started to fill queue");

        let mut tracker = FragmentTracker::default();
        let mut last_fragment_received = Instant::now();
        let mut last_progress_log = Instant::now();
        let mut error_count: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Err(HlsError::Canceled);
            }
            if last_progress_log.elapsed() >= Duration::from_secs(30) {
                debug!("still downloading");
                last_progress_log = Instant::now();
            }

            let fragments = match self.get_fragment_urls().await {
                Ok(fragments) => fragments,
                Err(HlsError::StreamEnded) => {
                    info!("stream has ended");
                    return Ok(());
                }
                Err(e) if e.is_transient_transport() => {
                    error_count += 1;
                    warn!(
                        error_count,
                        error_max = self.packet_loss_max,
                        error = %e,
                        "playlist poll failed, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_download_error();
                    }
                    if error_count <= self.packet_loss_max {
                        tokio::select! {
                            _ = tokio::time::sleep(POLL_INTERVAL) => continue,
                            _ = token.cancelled() => return Err(HlsError::Canceled),
                        }
                    }
                    error!(error = %e, "playlist poll failed");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "playlist poll failed");
                    return Err(e);
                }
            };

            let new_fragments = tracker.select_new(fragments);
            if !new_fragments.is_empty() {
                last_fragment_received = Instant::now();
                trace!(count = new_fragments.len(), "found new fragments");
            }
            for fragment in new_fragments {
                tokio::select! {
                    res = tx.send(fragment) => {
                        if res.is_err() {
                            return Err(HlsError::Canceled);
                        }
                    }
                    _ = token.cancelled() => return Err(HlsError::Canceled),
                }
            }

            if last_fragment_received.elapsed() > NO_FRAGMENT_TIMEOUT {
                warn!("timeout receiving new fragments, abort");
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = token.cancelled() => return Err(HlsError::Canceled),
            }
        }
    }

    /// Download one fragment and append its bytes to the sink.
    async fn download_fragment<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        url: &str,
    ) -> Result<(), HlsError> {
        let mut last_err: Option<HlsError> = None;
        for count in 0..=self.fragment_retries {
            let resp = self
                .client
                .auth_request(Method::GET, url)
                .await
                .header(reqwest::header::REFERER, REFERER)
                .header(reqwest::header::ORIGIN, ORIGIN)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;

            let status = resp.status().as_u16();
            if (200..300).contains(&status) {
                let bytes = resp.bytes().await?;
                writer.write_all(&bytes).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_fragment(bytes.len() as u64);
                }
                return Ok(());
            }

            let body = resp.text().await.unwrap_or_default();
            match status {
                403 => {
                    error!(url, status, body, "http error");
                    return Err(HlsError::Forbidden);
                }
                500..=599 => {
                    warn!(
                        url,
                        status,
                        count,
                        fragment_retries = self.fragment_retries,
                        "http error, retrying"
                    );
                    last_err = Some(HlsError::Http {
                        status,
                        url: url.to_string(),
                        body,
                    });
                }
                _ => {
                    error!(url, status, body, "http error");
                    return Err(HlsError::Http {
                        status,
                        url: url.to_string(),
                        body,
                    });
                }
            }
        }

        let err = last_err.expect("retry loop only exhausts on 5xx");
        error!(
            url,
            fragment_retries = self.fragment_retries,
            error = %err,
            "giving up after too many http errors"
        );
        Err(err)
    }

    /// Pull the stream to `writer` until it ends, the packet-loss budget is
    /// exceeded, a fatal error occurs, or `token` is canceled.
    ///
    /// Returns `Ok(())` when the stream ended cleanly and
    /// [`HlsError::Canceled`] on cancellation.
    pub async fn read<W: AsyncWrite + Unpin>(
        &self,
        token: &CancellationToken,
        writer: &mut W,
    ) -> Result<(), HlsError> {
        debug!("started to read stream");

        let (tx, mut rx) = mpsc::channel::<Fragment>(QUEUE_CAPACITY);
        let producer_token = token.child_token();
        let producer = {
            let downloader = self.clone();
            let producer_token = producer_token.clone();
            tokio::spawn(async move { downloader.fill_queue(producer_token, tx).await })
        };

        let mut error_count: u32 = 0;
        let mut fatal: Option<HlsError> = None;

        // Drain the queue until the producer closes it; fragments queued
        // before a fatal error or cancellation are skipped, not downloaded.
        while let Some(fragment) = rx.recv().await {
            if fatal.is_some() {
                continue;
            }
            if token.is_cancelled() {
                info!("skip fragment download because of context canceled");
                continue;
            }

            match self.download_fragment(writer, &fragment.url).await {
                Ok(()) => {}
                Err(HlsError::Forbidden) => {
                    error!("stream was interrupted");
                    fatal = Some(HlsError::Forbidden);
                    producer_token.cancel();
                }
                Err(e) => {
                    error_count += 1;
                    error!(
                        error_count,
                        error_max = self.packet_loss_max,
                        error = %e,
                        "a packet failed to be downloaded, skipping"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fragment_skipped();
                        metrics.record_download_error();
                    }
                    if error_count > self.packet_loss_max {
                        fatal = Some(HlsError::PacketLossExceeded {
                            count: error_count,
                            max: self.packet_loss_max,
                        });
                        producer_token.cancel();
                    }
                }
            }
        }

        let producer_result = match producer.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "producer task failed");
                Err(HlsError::Canceled)
            }
        };

        if let Some(fatal) = fatal {
            return Err(fatal);
        }
        match producer_result {
            Ok(()) => {
                info!("hls downloader exited with success");
                Ok(())
            }
            Err(HlsError::Canceled) => {
                info!("hls downloader canceled");
                Err(HlsError::Canceled)
            }
            Err(e) => {
                error!(error = %e, "hls downloader exited with error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn frag(url: &str, time: Option<DateTime<Utc>>) -> Fragment {
        Fragment {
            url: url.to_string(),
            time,
        }
    }

    #[test]
    fn test_parse_media_playlist_associates_pdt() {
        let body = "\
#EXTM3U
#EXT-X-TARGETDURATION:2
#EXT-X-PROGRAM-DATE-TIME:2024-05-01T10:00:00.000Z
https://cdn.example.net/frag/1.ts
#EXT-X-PROGRAM-DATE-TIME:2024-05-01T10:00:02.000Z
https://cdn.example.net/frag/2.ts
";
        let fragments = parse_media_playlist(body);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].url, "https://cdn.example.net/frag/1.ts");
        assert_eq!(
            fragments[0].time.unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            fragments[1].time.unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 2).unwrap()
        );
    }

    #[test]
    fn test_parse_media_playlist_invalid_pdt_falls_back_to_now() {
        let body = "\
#EXT-X-PROGRAM-DATE-TIME:not-a-timestamp
https://cdn.example.net/frag/1.ts
";
        let fragments = parse_media_playlist(body);
        assert_eq!(fragments.len(), 1);
        let time = fragments[0].time.unwrap();
        assert!((Utc::now() - time).num_seconds().abs() < 5);
    }

    #[test]
    fn test_parse_media_playlist_dedups_within_poll() {
        let body = "\
https://cdn.example.net/frag/1.ts
https://cdn.example.net/frag/1.ts
https://cdn.example.net/frag/2.ts
";
        let fragments = parse_media_playlist(body);
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_parse_media_playlist_no_pdt() {
        let body = "https://cdn.example.net/frag/1.ts\n";
        let fragments = parse_media_playlist(body);
        assert_eq!(fragments[0].time, None);
    }

    #[test]
    fn test_tracker_dedup_and_resume_across_polls() {
        // Poll A returns [u1, u2], poll B returns [u2, u3]: the engine
        // emits exactly u1, u2, u3 in that order.
        let mut tracker = FragmentTracker::default();

        let poll_a = vec![
            frag("https://cdn.example.net/frag/u1.ts", Some(t(1))),
            frag("https://cdn.example.net/frag/u2.ts", Some(t(2))),
        ];
        let emitted_a = tracker.select_new(poll_a);
        assert_eq!(
            emitted_a.iter().map(|f| f.url.as_str()).collect::<Vec<_>>(),
            [
                "https://cdn.example.net/frag/u1.ts",
                "https://cdn.example.net/frag/u2.ts"
            ]
        );

        let poll_b = vec![
            frag("https://cdn.example.net/frag/u2.ts", Some(t(2))),
            frag("https://cdn.example.net/frag/u3.ts", Some(t(3))),
        ];
        let emitted_b = tracker.select_new(poll_b);
        assert_eq!(
            emitted_b.iter().map(|f| f.url.as_str()).collect::<Vec<_>>(),
            ["https://cdn.example.net/frag/u3.ts"]
        );
    }

    #[test]
    fn test_tracker_never_reemits_a_url() {
        let mut tracker = FragmentTracker::default();
        let poll = vec![frag("https://cdn.example.net/frag/u1.ts", Some(t(1)))];
        assert_eq!(tracker.select_new(poll.clone()).len(), 1);
        assert_eq!(tracker.select_new(poll).len(), 0);
    }

    #[test]
    fn test_tracker_falls_back_to_name_ordering() {
        let mut tracker = FragmentTracker::default();

        let poll_a = vec![
            frag("https://cdn.example.net/frag/a.ts", Some(t(1))),
            frag("https://cdn.example.net/frag/b.ts", Some(t(2))),
        ];
        assert_eq!(tracker.select_new(poll_a).len(), 2);

        // A fragment without a timestamp flips the tracker to name-based
        // ordering; resume still works on the marker name.
        let poll_b = vec![
            frag("https://cdn.example.net/frag/b.ts", None),
            frag("https://cdn.example.net/frag/c.ts", None),
        ];
        let emitted = tracker.select_new(poll_b);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].url, "https://cdn.example.net/frag/c.ts");
        assert!(tracker.name_based);
    }

    #[test]
    fn test_tracker_equal_name_newer_time_is_new_rotation() {
        // A fragment whose basename equals the marker but whose timestamp
        // is newer comes from a different playlist rotation and must not be
        // dropped.
        let mut tracker = FragmentTracker::default();

        let poll_a = vec![frag("https://cdn.example.net/rot1/frag1.ts", Some(t(1)))];
        assert_eq!(tracker.select_new(poll_a).len(), 1);

        let poll_b = vec![frag("https://cdn.example.net/rot2/frag1.ts", Some(t(10)))];
        let emitted = tracker.select_new(poll_b);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].url, "https://cdn.example.net/rot2/frag1.ts");
    }

    #[test]
    fn test_tracker_emits_in_order_with_monotonic_times() {
        // Invariant: for consecutive emissions, times never decrease while
        // time ordering is in effect.
        let mut tracker = FragmentTracker::default();
        let polls = vec![
            vec![
                frag("https://x/f/1.ts", Some(t(1))),
                frag("https://x/f/2.ts", Some(t(2))),
            ],
            vec![
                frag("https://x/f/2.ts", Some(t(2))),
                frag("https://x/f/3.ts", Some(t(3))),
                frag("https://x/f/4.ts", Some(t(4))),
            ],
            vec![
                frag("https://x/f/4.ts", Some(t(4))),
                frag("https://x/f/5.ts", Some(t(5))),
            ],
        ];

        let mut all = Vec::new();
        for poll in polls {
            all.extend(tracker.select_new(poll));
        }
        let urls: Vec<&str> = all.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://x/f/1.ts",
                "https://x/f/2.ts",
                "https://x/f/3.ts",
                "https://x/f/4.ts",
                "https://x/f/5.ts"
            ]
        );
        for pair in all.windows(2) {
            assert!(pair[0].time.unwrap() <= pair[1].time.unwrap());
        }
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("https://x/a/b/frag.ts"), "frag.ts");
        assert_eq!(basename("frag.ts"), "frag.ts");
        assert_eq!(basename("https://x/a/frag.ts?auth=1"), "frag.ts?auth=1");
    }
}
