//! Post-processing bridge.
//!
//! Remux, audio extraction and concatenation are delegated to external
//! `ffmpeg`/`ffprobe` processes; this module shells out, reports errors and
//! leaves policy (what to run, what to delete) to the recorder.

pub mod concat;
pub mod probe;
pub mod remux;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("no input files found for prefix {0}")]
    NoInputs(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
