//! Readability probe via `ffprobe`.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use super::PipelineError;

/// Check that `ffprobe` can read the file. Used to detect recordings that
/// crashed mid-write before remuxing them.
pub async fn probe(input: &Path) -> Result<(), PipelineError> {
    debug!(input = %input.display(), "probing");
    let output = Command::new("ffprobe")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg(input)
        .output()
        .await
        .map_err(|source| PipelineError::Spawn {
            command: "ffprobe",
            source,
        })?;

    if !output.status.success() {
        return Err(PipelineError::Failed {
            command: "ffprobe",
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
