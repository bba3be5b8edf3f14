//! Client for the withny platform.
//!
//! Covers the authenticated REST API, the master-playlist parser, the
//! channel-page scraper and the Socket.IO session websocket.

pub mod client;
pub mod models;
pub mod playlist;
pub mod scraper;
pub mod session;
pub mod socketio;

pub use client::{ApiClient, ApiError};
pub use models::{
    Cast, Comment, Credentials, FlexibleNumber, Metadata, SavedCredentials, StreamDescriptor,
    UserRecord,
};
pub use playlist::{Playlist, PlaylistConstraint};
