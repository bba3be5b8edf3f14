//! Container remux and audio extraction via `ffmpeg`.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use super::PipelineError;

/// Remux `input` into `output` without re-encoding. With `audio_only` the
/// video streams are dropped, which is also how audio extraction works.
pub async fn remux(input: &Path, output: &Path, audio_only: bool) -> Result<(), PipelineError> {
    debug!(input = %input.display(), output = %output.display(), audio_only, "remuxing");

    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(input);
    if audio_only {
        command.arg("-vn");
    }
    command.arg("-c").arg("copy").arg(output);

    let out = command
        .output()
        .await
        .map_err(|source| PipelineError::Spawn {
            command: "ffmpeg",
            source,
        })?;

    if !out.status.success() {
        return Err(PipelineError::Failed {
            command: "ffmpeg",
            status: out.status,
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }
    Ok(())
}
