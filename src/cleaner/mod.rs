//! Periodic cleaning of concatenated recordings.
//!
//! After a successful concat the raw fragment family (`x.ts`, `x.1.ts`,
//! `x.mp4`, …) sits next to `x.combined.mp4`. Once a combined file is old
//! enough and verified readable, the intermediates are deleted and the
//! combined file is renamed to its final form.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::probe::probe;

/// Default age before a combined file is eligible for cleaning.
pub const DEFAULT_ELIGIBLE_AGE: Duration = Duration::from_secs(48 * 3600);

const SCAN_INTERVAL: Duration = Duration::from_secs(3600);

const MEDIA_EXTENSIONS: &[&str] = &["ts", "mp4", "m4a", "aac"];

/// Split `x.combined.mp4` into (`x`, `mp4`).
fn split_combined(file_name: &str) -> Option<(&str, &str)> {
    let idx = file_name.find(".combined.")?;
    let stem = &file_name[..idx];
    let ext = &file_name[idx + ".combined.".len()..];
    if stem.is_empty() || ext.is_empty() || ext.contains('.') {
        return None;
    }
    Some((stem, ext))
}

/// Whether `file_name` is a raw intermediate of the `stem` family:
/// `stem.<ext>` or `stem.<n>.<ext>` for a media extension.
fn is_intermediate_of(stem: &str, file_name: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return false;
    };
    match rest.split_once('.') {
        Some((n, ext)) => {
            n.chars().all(|c| c.is_ascii_digit())
                && !n.is_empty()
                && MEDIA_EXTENSIONS.contains(&ext)
        }
        None => MEDIA_EXTENSIONS.contains(&rest),
    }
}

fn collect_combined_files(dir: &Path, age: Duration, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to scan directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_combined_files(&path, age, out);
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if split_combined(name).is_none() {
            continue;
        }
        let old_enough = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|elapsed| elapsed >= age);
        if old_enough {
            out.push(path);
        }
    }
}

/// One cleaning pass over `dir`: returns the number of combined files
/// promoted to their final name.
pub async fn scan_and_clean(dir: &Path, age: Duration) -> usize {
    let mut combined = Vec::new();
    collect_combined_files(dir, age, &mut combined);

    let mut cleaned = 0;
    for path in combined {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((stem, ext)) = split_combined(name) else {
            continue;
        };

        // Only promote files ffprobe can read; a broken concat output must
        // not replace the raw fragments.
        if let Err(e) = probe(&path).await {
            warn!(file = %path.display(), error = %e, "combined file is unreadable, keeping intermediates");
            continue;
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %parent.display(), error = %e, "failed to list intermediates");
                continue;
            }
        };
        for entry in entries.flatten() {
            let sibling = entry.path();
            let Some(sibling_name) = sibling.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_intermediate_of(stem, sibling_name) {
                info!(file = %sibling.display(), "deleting intermediate");
                if let Err(e) = std::fs::remove_file(&sibling) {
                    error!(file = %sibling.display(), error = %e, "failed to delete intermediate");
                }
            }
        }

        let final_path = path.with_file_name(format!("{stem}.{ext}"));
        info!(from = %path.display(), to = %final_path.display(), "promoting combined file");
        match std::fs::rename(&path, &final_path) {
            Ok(()) => cleaned += 1,
            Err(e) => error!(file = %path.display(), error = %e, "failed to rename combined file"),
        }
    }
    cleaned
}

/// Clean `dir` every hour until `token` is canceled.
pub async fn clean_periodically(token: CancellationToken, dir: PathBuf, age: Duration) {
    info!(dir = %dir.display(), age = ?age, "cleaning periodically");
    loop {
        scan_and_clean(&dir, age).await;
        tokio::select! {
            _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            _ = token.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_combined() {
        assert_eq!(split_combined("rec.combined.mp4"), Some(("rec", "mp4")));
        assert_eq!(
            split_combined("2024-05-01 title.combined.m4a"),
            Some(("2024-05-01 title", "m4a"))
        );
        assert_eq!(split_combined("rec.mp4"), None);
        assert_eq!(split_combined(".combined.mp4"), None);
    }

    #[test]
    fn test_is_intermediate_of() {
        assert!(is_intermediate_of("rec", "rec.ts"));
        assert!(is_intermediate_of("rec", "rec.1.ts"));
        assert!(is_intermediate_of("rec", "rec.12.mp4"));
        assert!(is_intermediate_of("rec", "rec.m4a"));

        assert!(!is_intermediate_of("rec", "rec.combined.mp4"));
        assert!(!is_intermediate_of("rec", "rec.chat.json"));
        assert!(!is_intermediate_of("rec", "rec.info.json"));
        assert!(!is_intermediate_of("rec", "other.ts"));
        assert!(!is_intermediate_of("rec", "recording.ts"));
    }

    #[test]
    fn test_collect_combined_files_recurses_and_filters_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("a.combined.mp4"), b"x").unwrap();
        std::fs::write(nested.join("b.combined.m4a"), b"x").unwrap();
        std::fs::write(dir.path().join("a.ts"), b"x").unwrap();

        // Age zero: everything just written is already eligible.
        let mut found = Vec::new();
        collect_combined_files(dir.path(), Duration::ZERO, &mut found);
        let mut names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["a.combined.mp4", "b.combined.m4a"]);

        // A 48h age keeps fresh files out of scope.
        let mut found = Vec::new();
        collect_combined_files(dir.path(), DEFAULT_ELIGIBLE_AGE, &mut found);
        assert!(found.is_empty());
    }
}
