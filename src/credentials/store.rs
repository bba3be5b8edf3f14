//! Encrypted at-rest cache of the refresh/access token pair.
//!
//! File layout is `nonce || ciphertext || auth tag`; the plaintext is the
//! UTF-8 JSON encoding of the token pair plus the hash of the
//! operator-supplied credentials. The key is derived from a user secret
//! with PBKDF2-HMAC-SHA256. Partial writes are acceptable: an invalid tag
//! forces re-initialization on the next read.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::CredentialError;
use crate::platform::models::Credentials;

/// Built-in obfuscation key, used when `WITHNY_ENCRYPTION_KEY` is not set.
/// Not a real secret, but keeps tokens out of plain text on disk.
const DEFAULT_SECRET: &[u8] = b"withny-dl-secret-key-0123456789a";

const SALT_SIZE: usize = 16;
const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

/// The record stored in the cache file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedCredentials {
    #[serde(flatten)]
    pub credentials: Credentials,

    /// Hash of the operator-supplied credentials; used to invalidate the
    /// cache when the original record changes.
    #[serde(default)]
    pub hash: String,
}

fn derive_key(secret: &[u8]) -> [u8; KEY_SIZE] {
    let salt = [0u8; SALT_SIZE];
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret, &salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext` with a key derived from `secret`. The random nonce
/// is prepended to the ciphertext.
pub fn encrypt(secret: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CredentialError::Decrypt(format!("cannot encrypt data: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`]. Fails on truncation or an invalid
/// authentication tag.
pub fn decrypt(secret: &[u8], data: &[u8]) -> Result<Vec<u8>, CredentialError> {
    if data.len() < NONCE_SIZE {
        return Err(CredentialError::Decrypt("cannot read nonce".to_string()));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let key = derive_key(secret);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CredentialError::Decrypt(format!("cannot decrypt data: {e}")))
}

/// Encrypted file-backed credentials cache.
pub struct CredentialsStore {
    path: PathBuf,
    secret: Vec<u8>,
}

impl CredentialsStore {
    pub fn new(path: impl Into<PathBuf>, secret: Option<String>) -> Self {
        let secret = secret
            .map(String::into_bytes)
            .unwrap_or_else(|| DEFAULT_SECRET.to_vec());
        Self {
            path: path.into(),
            secret,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached record. Corruption (truncated file, invalid tag,
    /// JSON parse failure) is reported as "not found" with a warning so the
    /// caller falls through to a fresh login.
    pub async fn read(&self) -> Result<Option<CachedCredentials>, CredentialError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plaintext = match decrypt(&self.secret, &data) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable credentials cache, ignoring");
                return Ok(None);
            }
        };
        match serde_json::from_slice(&plaintext) {
            Ok(cached) => Ok(Some(cached)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "invalid credentials cache, ignoring");
                Ok(None)
            }
        }
    }

    /// Merge a refreshed token pair into the on-disk record, keeping the
    /// fields the caller did not set (the stored hash in particular).
    pub async fn write(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let mut current = self
            .read()
            .await?
            .ok_or_else(|| CredentialError::NotFound(self.path.display().to_string()))?;

        current.credentials.token = credentials.token.clone();
        current.credentials.refresh_token = credentials.refresh_token.clone();

        self.persist(&current).await
    }

    /// Write a fresh record including the credentials hash.
    pub async fn init(
        &self,
        credentials: &Credentials,
        hash: &str,
    ) -> Result<(), CredentialError> {
        self.persist(&CachedCredentials {
            credentials: credentials.clone(),
            hash: hash.to_string(),
        })
        .await
    }

    /// Remove the on-disk record.
    pub async fn invalidate(&self) -> Result<(), CredentialError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, cached: &CachedCredentials) -> Result<(), CredentialError> {
        let plaintext = serde_json::to_vec(cached)?;
        let encrypted = encrypt(&self.secret, &plaintext)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            use tokio::io::AsyncWriteExt;

            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .await?;
            file.write_all(&encrypted).await?;
            file.flush().await?;
        }
        #[cfg(not(unix))]
        {
            tokio::fs::write(&self.path, &encrypted).await?;
        }
        Ok(())
    }
}
