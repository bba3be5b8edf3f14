//! HLS pull engine.

pub mod downloader;

pub use downloader::{Fragment, HlsDownloader, HlsError};
