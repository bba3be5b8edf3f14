//! JSON-array sink for chat comments.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::error;

use crate::platform::models::Comment;

/// Drain `rx` into a JSON array file: `[` on open, one comment object per
/// line, `]` when the channel closes.
pub async fn write_comments(path: &Path, mut rx: mpsc::Receiver<Comment>) {
    let mut file = match tokio::fs::File::create(path).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to create file, cannot write comments");
            return;
        }
    };

    if let Err(e) = file.write_all(b"[\n").await {
        error!(error = %e, "failed to write comment");
        return;
    }

    while let Some(comment) = rx.recv().await {
        let json = match serde_json::to_vec(&comment) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to marshal comment");
                continue;
            }
        };
        if let Err(e) = file.write_all(&json).await {
            error!(error = %e, "failed to write comment");
        }
        if let Err(e) = file.write_all(b",\n").await {
            error!(error = %e, "failed to write comment");
        }
    }

    if let Err(e) = file.write_all(b"]\n").await {
        error!(error = %e, "failed to write comment");
    }
    if let Err(e) = file.flush().await {
        error!(error = %e, "failed to flush comments");
    }
}
