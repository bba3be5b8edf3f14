//! Chat subscription client.
//!
//! Maintains a GraphQL-over-WebSocket subscription for the duration of a
//! recording and appends each comment to a JSON array file.

pub mod client;
pub mod graphql;
pub mod writer;

use thiserror::Error;

pub use client::{download_chat, ChatWebSocket};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("API error: {0}")]
    Api(#[from] crate::platform::ApiError),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation canceled")]
    Canceled,
}
