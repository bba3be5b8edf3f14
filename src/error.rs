//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credentials error: {0}")]
    Credentials(#[from] crate::credentials::CredentialError),

    #[error("API error: {0}")]
    Api(#[from] crate::platform::ApiError),

    #[error("HLS error: {0}")]
    Hls(#[from] crate::hls::HlsError),

    #[error("Chat error: {0}")]
    Chat(#[from] crate::chat::ChatError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Output template error: {0}")]
    Template(String),

    #[error("operation canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error only reports cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Hls(e) => e.is_canceled(),
            Self::Api(e) => e.is_canceled(),
            _ => false,
        }
    }
}
