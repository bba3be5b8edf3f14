//! Token lifecycle: login, cache validation and scheduled refresh.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{CredentialError, CredentialsReader};
use crate::notification;
use crate::platform::models::Credentials;
use crate::platform::ApiClient;
use crate::{Error, Result};

/// Default delay between login retries.
pub const DEFAULT_LOGIN_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default number of consecutive refresh failures before the cache is
/// purged and the operator-supplied credentials are used again.
pub const DEFAULT_CLEAR_CACHE_AFTER: u32 = 10;

/// Refresh the token this long before its expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Keeps a valid access token in the cache for all concurrent workers.
pub struct CredentialsService {
    client: Arc<ApiClient>,
    reader: CredentialsReader,
    clear_cache_after: u32,
    login_retry_delay: Duration,
    metrics: Option<Arc<crate::metrics::MetricsCollector>>,
}

impl CredentialsService {
    pub fn new(client: Arc<ApiClient>, reader: CredentialsReader) -> Self {
        Self {
            client,
            reader,
            clear_cache_after: DEFAULT_CLEAR_CACHE_AFTER,
            login_retry_delay: DEFAULT_LOGIN_RETRY_DELAY,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<crate::metrics::MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_clear_cache_after(mut self, after: u32) -> Self {
        if after > 0 {
            self.clear_cache_after = after;
        }
        self
    }

    pub fn with_login_retry_delay(mut self, delay: Duration) -> Self {
        if delay > Duration::ZERO {
            self.login_retry_delay = delay;
        }
        self
    }

    /// Login and store the refreshed credential pair in the cache.
    ///
    /// Prefers the cached refresh token; falls back to the operator-supplied
    /// credentials after repeated failures or when the operator record
    /// changed since the cache was written.
    pub async fn login(&self, token: &CancellationToken) -> Result<()> {
        let cache = self.client.cache();
        let cached = self.validate_cache().await?;

        let credentials = match cached.filter(|c| !c.credentials.token.is_empty()) {
            Some(record) => {
                let mut tries: u32 = 0;
                loop {
                    match self
                        .client
                        .login_with_refresh_token(&record.credentials.refresh_token)
                        .await
                    {
                        Ok(credentials) => break credentials,
                        Err(e) if e.is_maintenance() => {
                            warn!(
                                tries,
                                error = %e,
                                "failed with server maintenance error, retrying later without \
                                 increasing tries"
                            );
                            self.sleep_or_cancel(token).await?;
                        }
                        Err(e) if tries < self.clear_cache_after => {
                            warn!(
                                tries,
                                delay = ?self.login_retry_delay,
                                error = %e,
                                "failed to refresh token from cache, retrying later"
                            );
                            if let Some(metrics) = &self.metrics {
                                metrics.record_login_failure();
                            }
                            tries += 1;
                            self.sleep_or_cancel(token).await?;
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                "failed to refresh token from cache, will use provided credentials"
                            );
                            if let Some(metrics) = &self.metrics {
                                metrics.record_login_failure();
                            }
                            notification::notify_login_failed(&e).await;
                            if let Err(e) = cache.invalidate().await {
                                warn!(error = %e, "failed to invalidate cache");
                            }
                            break self.login_with_reader().await?;
                        }
                    }
                }
            }
            None => self.login_with_reader().await?,
        };

        info!("login successful and token refreshed");
        if let Some(metrics) = &self.metrics {
            metrics.record_login_refresh();
        }
        if let Err(e) = cache.write(&credentials).await {
            warn!(error = %e, "failed to cache credentials");
        }
        Ok(())
    }

    /// Read the cache and purge it when the operator-supplied credentials
    /// changed since it was written.
    pub async fn validate_cache(&self) -> Result<Option<super::CachedCredentials>> {
        let cache = self.client.cache();
        let cached = match cache.read().await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "failed to read cached credentials");
                None
            }
        };

        let original = self.reader.read().await?;
        if let Some(record) = cached {
            if record.hash != original.hash() {
                info!("credentials changed, clearing cache");
                if let Err(e) = cache.invalidate().await {
                    warn!(error = %e, "failed to invalidate cache");
                }
                return Ok(None);
            }
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// Login from the operator-supplied credentials and initialize the
    /// cache with their hash.
    async fn login_with_reader(&self) -> Result<Credentials> {
        let saved = self.reader.read().await?;
        let cache = self.client.cache();

        if !saved.username.is_empty() {
            let credentials = self
                .client
                .login_with_user_password(&saved.username, &saved.password)
                .await?;
            if let Err(e) = cache.init(&credentials, &saved.hash()).await {
                warn!(error = %e, "failed to cache credentials");
            }
            return Ok(credentials);
        }

        if !saved.token.is_empty() {
            // Seed the cache so the refresh call carries the bearer token.
            let seeded = Credentials {
                token: saved.token.clone(),
                refresh_token: saved.refresh_token.clone(),
                token_type: "Bearer".to_string(),
            };
            if let Err(e) = cache.init(&seeded, &saved.hash()).await {
                warn!(error = %e, "failed to cache credentials");
            }
            return Ok(self
                .client
                .login_with_refresh_token(&saved.refresh_token)
                .await?);
        }

        Err(Error::Credentials(CredentialError::Missing))
    }

    /// Long-running refresh loop. Schedules the next refresh five minutes
    /// before the token expires, or in five minutes when the token carries
    /// no expiry. Exits on cancellation or on an unrecoverable login error.
    pub async fn login_loop(&self, token: &CancellationToken) -> Result<()> {
        self.login(token).await?;

        loop {
            let delay = self.next_refresh_delay().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => {
                    info!("context canceled, stopping login loop");
                    return Err(Error::Canceled);
                }
            }
            self.login(token).await?;
        }
    }

    async fn next_refresh_delay(&self) -> Duration {
        let access_token = self.client.bearer_token().await;
        match parse_expiration(&access_token) {
            Some(exp) => {
                let refresh_at = exp - chrono::Duration::from_std(REFRESH_MARGIN).expect("fits");
                (refresh_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(1))
                    .max(Duration::from_secs(1))
            }
            None => {
                warn!("no expiration date found in access token, refreshing in 5 minutes");
                REFRESH_MARGIN
            }
        }
    }

    async fn sleep_or_cancel(&self, token: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.login_retry_delay) => Ok(()),
            _ = token.cancelled() => Err(Error::Canceled),
        }
    }
}

/// Read the `exp` claim of a JWT without verifying the signature.
pub fn parse_expiration(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Claims = serde_json::from_slice(&decoded).ok()?;
    claims.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}
