//! Reader for the operator-supplied credentials file.

use std::path::PathBuf;

use super::CredentialError;
use crate::platform::models::SavedCredentials;

/// Reads the YAML credentials file configured as `credentialsFile`.
///
/// The record carries either a username/password pair or a
/// token/refreshToken pair.
#[derive(Debug, Clone)]
pub struct CredentialsReader {
    path: PathBuf,
}

impl CredentialsReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn read(&self) -> Result<SavedCredentials, CredentialError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_yaml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_token_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        tokio::fs::write(&path, "token: tok\nrefreshToken: ref\n")
            .await
            .unwrap();

        let creds = CredentialsReader::new(&path).read().await.unwrap();
        assert_eq!(creds.token, "tok");
        assert_eq!(creds.refresh_token, "ref");
        assert!(creds.username.is_empty());
    }

    #[tokio::test]
    async fn test_read_user_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.yaml");
        tokio::fs::write(&path, "username: user@example.com\npassword: hunter2\n")
            .await
            .unwrap();

        let creds = CredentialsReader::new(&path).read().await.unwrap();
        assert_eq!(creds.username, "user@example.com");
        assert_eq!(creds.password, "hunter2");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let reader = CredentialsReader::new("/nonexistent/credentials.yaml");
        assert!(matches!(
            reader.read().await,
            Err(CredentialError::NotFound(_))
        ));
    }
}
