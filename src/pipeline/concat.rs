//! Concatenation of fragmented recordings.
//!
//! A crash mid-recording leaves `name.ts`, `name.1.ts`, `name.2.ts`, …
//! behind. This joins every media file sharing the prefix into
//! `name.combined.<ext>` with the `ffmpeg` concat demuxer.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use super::PipelineError;

/// Media extensions eligible for concatenation.
const MEDIA_EXTENSIONS: &[&str] = &["ts", "mp4", "m4a", "aac"];

/// Sort key for a fragment family member: `name.ts` sorts before
/// `name.1.ts`, which sorts before `name.10.ts`.
fn variant_index(prefix_stem: &str, file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(prefix_stem)?.strip_prefix('.')?;
    match rest.split_once('.') {
        // "<n>.<ext>"
        Some((n, ext)) if MEDIA_EXTENSIONS.contains(&ext) => n.parse::<u64>().ok().map(|n| n + 1),
        // "<ext>"
        None if MEDIA_EXTENSIONS.contains(&rest) => Some(0),
        Some(_) | None => None,
    }
}

/// Collect and order the inputs for a concat run.
fn collect_inputs(prefix: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = prefix.parent().unwrap_or_else(|| Path::new("."));
    let prefix_stem = prefix
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    let mut inputs: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.contains(".combined.") {
            continue;
        }
        if let Some(index) = variant_index(prefix_stem, name) {
            inputs.push((index, path));
        }
    }

    inputs.sort();
    Ok(inputs.into_iter().map(|(_, path)| path).collect())
}

/// Concatenate every fragment sharing `prefix` into
/// `<prefix>.combined.<format>`. Returns the output path.
pub async fn concat_with_prefix(
    format: &str,
    prefix: &Path,
    audio_only: bool,
) -> Result<PathBuf, PipelineError> {
    let inputs = collect_inputs(prefix)?;
    if inputs.is_empty() {
        return Err(PipelineError::NoInputs(prefix.display().to_string()));
    }

    let output = prefix.with_file_name(format!(
        "{}.combined.{format}",
        prefix
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    ));

    // The concat demuxer takes a list file with one input per line.
    let list_path = prefix.with_file_name(format!(
        "{}.concat.txt",
        prefix
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    ));
    let mut list = String::new();
    for input in &inputs {
        let escaped = input.display().to_string().replace('\'', "'\\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    tokio::fs::write(&list_path, list).await?;

    debug!(
        inputs = inputs.len(),
        output = %output.display(),
        "concatenating"
    );

    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(&list_path);
    if audio_only {
        command.arg("-vn");
    }
    command.arg("-c").arg("copy").arg(&output);

    let result = command.output().await;
    let _ = tokio::fs::remove_file(&list_path).await;

    let out = result.map_err(|source| PipelineError::Spawn {
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

    info!(output = %output.display(), "concatenated");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_index_ordering() {
        assert_eq!(variant_index("rec", "rec.ts"), Some(0));
        assert_eq!(variant_index("rec", "rec.1.ts"), Some(2));
        assert_eq!(variant_index("rec", "rec.10.ts"), Some(11));
        assert_eq!(variant_index("rec", "rec.mp4"), Some(0));
    }

    #[test]
    fn test_variant_index_rejects_foreign_files() {
        assert_eq!(variant_index("rec", "other.ts"), None);
        assert_eq!(variant_index("rec", "rec.chat.json"), None);
        assert_eq!(variant_index("rec", "rec.info.json"), None);
        assert_eq!(variant_index("rec", "recording.ts"), None);
        assert_eq!(variant_index("rec", "rec.txt"), None);
    }

    #[test]
    fn test_collect_inputs_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["rec.10.ts", "rec.ts", "rec.2.ts", "rec.combined.mp4", "x.ts"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let inputs = collect_inputs(&dir.path().join("rec")).unwrap();
        let names: Vec<String> = inputs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["rec.ts", "rec.2.ts", "rec.10.ts"]);
    }

    #[test]
    fn test_collect_inputs_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = collect_inputs(&dir.path().join("rec")).unwrap();
        assert!(inputs.is_empty());
    }
}
