//! Credential management: the operator-supplied credentials file, the
//! encrypted on-disk token cache, and the refresh loop that keeps a valid
//! access token available to all workers.

pub mod reader;
pub mod service;
pub mod store;

use thiserror::Error;

pub use reader::CredentialsReader;
pub use service::CredentialsService;
pub use store::{CachedCredentials, CredentialsStore};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credentials file does not exist: {0}")]
    NotFound(String),

    #[error("cannot decrypt credentials cache: {0}")]
    Decrypt(String),

    #[error("invalid credentials record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid credentials file: {0}")]
    InvalidFile(#[from] serde_yaml::Error),

    #[error("no credentials provided")]
    Missing,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
