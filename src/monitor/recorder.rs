//! One recording job: file preparation, chat and HLS download,
//! post-processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::params::Params;
use super::preparer::{format_output, prepare_file, prepare_file_auto_rename};
use crate::chat;
use crate::hls::{HlsDownloader, HlsError};
use crate::metrics::MetricsCollector;
use crate::notification::{self, NotificationEvent};
use crate::pipeline;
use crate::platform::models::Metadata;
use crate::platform::playlist::{best_playlist, Playlist};
use crate::platform::ApiClient;
use crate::state::{DownloadState, StateRegistry};
use crate::utils::retry::retry;
use crate::{Error, Result};

/// Probe attempts per playlist candidate before it is ruled out.
const PLAYLIST_PROBE_TRIES: u32 = 5;
const PLAYLIST_PROBE_DELAY: Duration = Duration::from_secs(5);

/// Runs recording jobs for one channel.
pub struct Recorder {
    pub client: Arc<ApiClient>,
    pub params: Arc<Params>,
    pub state: Arc<StateRegistry>,
    pub metrics: Arc<MetricsCollector>,
}

/// Every output name of one recording, resolved before download starts.
struct OutputFiles {
    info: PathBuf,
    thumbnail: PathBuf,
    stream: PathBuf,
    chat: PathBuf,
    muxed: PathBuf,
    audio: PathBuf,
    concat_prefix: PathBuf,
    audio_concat_prefix: PathBuf,
}

impl Recorder {
    /// Run the whole preparation, download and post-processing pipeline.
    pub async fn process(
        &self,
        token: &CancellationToken,
        meta: &Metadata,
        playlists: &[Playlist],
    ) -> Result<()> {
        self.metrics.record_recording_started();
        let result = self.process_inner(token, meta, playlists).await;
        self.metrics.record_recording_finished();
        result
    }

    async fn process_inner(
        &self,
        token: &CancellationToken,
        meta: &Metadata,
        playlists: &[Playlist],
    ) -> Result<()> {
        let channel_id = meta.user.username.clone();
        let title = meta.stream.title.clone();

        self.state.set_channel_state(
            &channel_id,
            DownloadState::PreparingFiles,
            Some(&self.params.labels),
        );
        notification::notify(NotificationEvent::PreparingFiles {
            channel_id: channel_id.clone(),
            title: title.clone(),
        })
        .await;

        let files = self.prepare_output_files(meta)?;

        if self.params.write_meta_data_json {
            self.write_metadata_json(&files.info, meta).await;
        }
        if self.params.write_thumbnail {
            self.download_thumbnail(&files.thumbnail, &meta.stream.thumbnail_url)
                .await;
        }

        self.state.set_channel_state(
            &channel_id,
            DownloadState::Downloading,
            Some(&self.params.labels),
        );
        notification::notify(NotificationEvent::Downloading {
            channel_id: channel_id.clone(),
            title: title.clone(),
        })
        .await;

        let chat_token = token.child_token();
        let chat_task = if self.params.write_chat {
            let client = self.client.clone();
            let chat_token = chat_token.clone();
            let chat_channel = channel_id.clone();
            let pass_code = self.params.pass_code.clone();
            let output = files.chat.clone();
            Some(tokio::spawn(async move {
                let pass_code = (!pass_code.is_empty()).then_some(pass_code);
                if let Err(e) = chat::download_chat(
                    &client,
                    &chat_token,
                    &chat_channel,
                    pass_code.as_deref(),
                    &output,
                )
                .await
                {
                    match e {
                        chat::ChatError::Canceled => {}
                        e => error!(error = %e, "chat download failed"),
                    }
                }
            }))
        } else {
            None
        };

        let download_result = self.download_stream(token, playlists, &files.stream).await;

        chat_token.cancel();
        if let Some(task) = chat_task {
            let _ = task.await;
        }

        self.state.set_channel_state(
            &channel_id,
            DownloadState::PostProcessing,
            Some(&self.params.labels),
        );
        notification::notify(NotificationEvent::PostProcessing {
            channel_id: channel_id.clone(),
            title: title.clone(),
        })
        .await;
        info!("post-processing...");
        self.metrics.record_post_process_run();
        self.post_process(&files).await;

        info!("done");
        download_result
    }

    fn prepare_output_files(&self, meta: &Metadata) -> Result<OutputFiles> {
        let params = &self.params;
        let labels = &params.labels;
        let muxed_ext = params.remux_format.to_lowercase();

        let info = prepare_file_auto_rename(&params.out_format, meta, labels, "info.json")?;
        // With concat on, repeated crash recordings share one thumbnail.
        let thumbnail = if params.concat {
            prepare_file(&params.out_format, meta, labels, "avif")?
        } else {
            prepare_file_auto_rename(&params.out_format, meta, labels, "avif")?
        };
        let stream = prepare_file_auto_rename(&params.out_format, meta, labels, "ts")?;
        let chat = prepare_file_auto_rename(&params.out_format, meta, labels, "chat.json")?;
        let muxed = prepare_file_auto_rename(&params.out_format, meta, labels, &muxed_ext)?;
        let audio = prepare_file_auto_rename(&params.out_format, meta, labels, "m4a")?;

        let concat_ext = format!("combined.{muxed_ext}");
        let concatenated = format_output(&params.out_format, meta, labels, &concat_ext)?;
        let concat_prefix = PathBuf::from(
            concatenated
                .strip_suffix(&format!(".{concat_ext}"))
                .unwrap_or(&concatenated),
        );
        let audio_concatenated = format_output(&params.out_format, meta, labels, "combined.m4a")?;
        let audio_concat_prefix = PathBuf::from(
            audio_concatenated
                .strip_suffix(".combined.m4a")
                .unwrap_or(&audio_concatenated),
        );

        Ok(OutputFiles {
            info,
            thumbnail,
            stream,
            chat,
            muxed,
            audio,
            concat_prefix,
            audio_concat_prefix,
        })
    }

    async fn write_metadata_json(&self, path: &Path, meta: &Metadata) {
        info!(file = %path.display(), "writing info json");
        match serde_json::to_vec_pretty(meta) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    error!(file = %path.display(), error = %e, "failed to write info json");
                }
            }
            Err(e) => error!(error = %e, "failed to encode meta in info json"),
        }
    }

    async fn download_thumbnail(&self, path: &Path, url: &str) {
        if url.is_empty() {
            return;
        }
        info!(file = %path.display(), "writing thumbnail");
        match self.client.get_bytes(url).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, &bytes).await {
                    error!(file = %path.display(), error = %e, "failed to write thumbnail file");
                }
            }
            Err(e) => error!(error = %e, "failed to fetch thumbnail"),
        }
    }

    /// Select a playlist under the quality constraint, probe it, and pull
    /// the stream to `output`.
    async fn download_stream(
        &self,
        token: &CancellationToken,
        playlists: &[Playlist],
        output: &Path,
    ) -> Result<()> {
        if playlists.is_empty() {
            return Err(Error::Other("no playlists found".to_string()));
        }
        let mut constraint = self.params.quality.clone();

        let downloader = loop {
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            if playlists
                .iter()
                .all(|p| constraint.ignored_urls.contains(&p.url))
            {
                return Err(Error::Other(
                    "no usable playlist, all candidates failed probing".to_string(),
                ));
            }

            let playlist = match best_playlist(playlists, &constraint) {
                Some(playlist) => playlist,
                None => {
                    warn!(
                        constraint = ?constraint,
                        fallback = %playlists[0].url,
                        "no playlist found with current constraint"
                    );
                    &playlists[0]
                }
            };

            let downloader = HlsDownloader::new(self.client.clone(), &playlist.url)
                .with_packet_loss_max(self.params.packet_loss_max)
                .with_fragment_retries(self.params.fragment_retries)
                .with_playlist_retries(self.params.playlist_retries)
                .with_metrics(self.metrics.clone());

            let probed = retry(token, PLAYLIST_PROBE_TRIES, PLAYLIST_PROBE_DELAY, || {
                let downloader = downloader.clone();
                async move { downloader.probe().await.map_err(Error::Hls) }
            })
            .await;

            match probed {
                Ok(true) => {
                    info!(url = %playlist.url, resolution = %playlist.resolution, "received new HLS info");
                    break downloader;
                }
                Err(e) if e.is_canceled() => return Err(e),
                Ok(false) | Err(_) => {
                    warn!(url = %playlist.url, "failed to fetch playlist, switching to next playlist");
                    constraint.ignored_urls.push(playlist.url.clone());
                }
            }
        };

        let mut file = tokio::fs::File::create(output).await?;
        match downloader.read(token, &mut file).await {
            Ok(()) => Ok(()),
            Err(HlsError::Canceled) => Err(Error::Canceled),
            Err(e) => Err(Error::Hls(e)),
        }
    }

    /// Probe, remux, extract audio and concatenate. Errors are logged but
    /// never fail the recording.
    async fn post_process(&self, files: &OutputFiles) {
        let params = &self.params;

        let probe_ok = match pipeline::probe::probe(&files.stream).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "ts is unreadable by ffmpeg");
                self.metrics.record_post_process_error();
                if params.delete_corrupted {
                    if let Err(e) = tokio::fs::remove_file(&files.stream).await {
                        error!(
                            path = %files.stream.display(),
                            error = %e,
                            "failed to remove corrupted file"
                        );
                    }
                }
                false
            }
        };

        let mut remux_ok = true;
        if params.remux && probe_ok {
            info!(
                input = %files.stream.display(),
                output = %files.muxed.display(),
                "remuxing stream..."
            );
            if let Err(e) = pipeline::remux::remux(&files.stream, &files.muxed, false).await {
                error!(error = %e, "remux finished with error");
                self.metrics.record_post_process_error();
                remux_ok = false;
            }
        }

        let mut extract_ok = true;
        if params.extract_audio && (!params.concat || params.remux) && probe_ok {
            info!(
                input = %files.stream.display(),
                output = %files.audio.display(),
                "extracting audio..."
            );
            if let Err(e) = pipeline::remux::remux(&files.stream, &files.audio, true).await {
                error!(error = %e, "audio extract finished with error");
                self.metrics.record_post_process_error();
                extract_ok = false;
            }
        }

        if params.concat {
            info!(prefix = %files.concat_prefix.display(), "concatenating stream...");
            if let Err(e) = pipeline::concat::concat_with_prefix(
                &params.remux_format.to_lowercase(),
                &files.concat_prefix,
                false,
            )
            .await
            {
                error!(error = %e, "concat finished with error");
                self.metrics.record_post_process_error();
            }

            if params.extract_audio {
                info!(
                    prefix = %files.audio_concat_prefix.display(),
                    "concatenating audio stream..."
                );
                if let Err(e) = pipeline::concat::concat_with_prefix(
                    "m4a",
                    &files.audio_concat_prefix,
                    true,
                )
                .await
                {
                    error!(error = %e, "audio concat finished with error");
                    self.metrics.record_post_process_error();
                }
            }
        }

        // The raw stream is deleted only when remuxing is on and every
        // enabled step succeeded; otherwise it remains the only copy.
        if !params.keep_intermediates && params.remux && probe_ok && remux_ok && extract_ok {
            info!(file = %files.stream.display(), "delete intermediate files");
            if let Err(e) = tokio::fs::remove_file(&files.stream).await {
                error!(error = %e, "couldn't delete intermediate file");
                self.metrics.record_post_process_error();
            }
        }
    }
}
