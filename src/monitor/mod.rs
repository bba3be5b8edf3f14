//! Channel watching: detection, dispatch, recording and supervision.

pub mod params;
pub mod preparer;
pub mod recorder;
pub mod supervisor;
pub mod watcher;

pub use params::{OptionalParams, Params};
pub use watcher::ChannelWatcher;
