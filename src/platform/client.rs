//! Authenticated HTTP client for the upstream REST API.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::credentials::CredentialsStore;
use crate::platform::models::{Credentials, ErrorResponse, StreamDescriptor, UserRecord};
use crate::platform::playlist::{self, Playlist};
use crate::utils::useragent;

pub const BASE_URL: &str = "https://www.withny.fun/api";
pub const ORIGIN: &str = "https://www.withny.fun";
pub const REFERER: &str = "https://www.withny.fun/";

const HLS_ACCEPT: &str =
    "application/x-mpegURL, application/vnd.apple.mpegurl, application/json, text/plain";

/// Marker the upstream inserts into 200-OK bodies during planned outages.
/// Such responses are remapped to HTTP 503.
const MAINTENANCE_KEYWORD: &str = "メンテナンス";

/// Per-call deadline for short-lived API requests. Credential refresh relies
/// on the global client timeout instead.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Errors from the upstream API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error {method} {url}, code={status}, body={body}")]
    Http {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("stream not found")]
    StreamNotFound,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode {context} response: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no graphql url found in body")]
    NoGraphQlEndpoint,

    #[error("no stream uuid found in body")]
    NoStreamUuid,

    #[error("no credentials provided")]
    NoCredentials,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("operation canceled")]
    Canceled,
}

impl ApiError {
    /// HTTP status of the failure, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthorized(_) => Some(401),
            _ => None,
        }
    }

    /// Whether this failure should be retried without consuming an attempt:
    /// planned maintenance and gateway errors.
    pub fn is_maintenance(&self) -> bool {
        matches!(self.status(), Some(502) | Some(503) | Some(504))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    fn maintenance(method: &str, url: &str, body: String) -> Self {
        Self::Http {
            status: 503,
            method: method.to_string(),
            url: url.to_string(),
            body,
        }
    }
}

/// Apply the shared response policy: non-2xx statuses become typed errors
/// and 2xx bodies carrying the maintenance marker are remapped to 503.
fn check_response(method: &str, url: &str, status: u16, body: String) -> Result<String, ApiError> {
    if !(200..300).contains(&status) {
        if status == 401 {
            return Err(ApiError::Unauthorized(body));
        }
        return Err(ApiError::Http {
            status,
            method: method.to_string(),
            url: url.to_string(),
            body,
        });
    }
    if body.contains(MAINTENANCE_KEYWORD) {
        warn!(url, "maintenance marker found in 2xx response");
        return Err(ApiError::maintenance(method, url, body));
    }
    Ok(body)
}

fn decode_json<T: DeserializeOwned>(context: &'static str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|source| {
        error!(raw_message = body, context, "failed to decode JSON");
        ApiError::Decode { context, source }
    })
}

/// Authenticated client for the upstream REST endpoints.
///
/// Every request carries a `Bearer` header read from the credentials cache
/// and a `User-Agent` chosen deterministically from the machine's hostname.
pub struct ApiClient {
    http: reqwest::Client,
    cache: Arc<CredentialsStore>,
    user_agent: &'static str,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, cache: Arc<CredentialsStore>) -> Self {
        let user_agent = useragent::get();
        info!(user_agent, "using predefined user agent");
        Self {
            http,
            cache,
            user_agent,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn cache(&self) -> &Arc<CredentialsStore> {
        &self.cache
    }

    pub fn user_agent(&self) -> &'static str {
        self.user_agent
    }

    /// Current bearer token, empty when the cache has not been primed yet.
    pub async fn bearer_token(&self) -> String {
        match self.cache.read().await {
            Ok(Some(cached)) => cached.credentials.token,
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "failed to read cached credentials");
                String::new()
            }
        }
    }

    /// Build a request carrying the bearer token and the rotating user agent.
    pub async fn auth_request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let token = self.bearer_token().await;
        self.http
            .request(method, url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, self.user_agent)
    }

    /// Exchange a refresh token for a fresh credential pair.
    pub async fn login_with_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Credentials, ApiError> {
        info!("refreshing token");
        let url = format!("{BASE_URL}/auth/token");
        let resp = self
            .auth_request(Method::POST, &url)
            .await
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status == 401 {
            warn!(status, "refresh rejected (refresh token already used?)");
        }
        let body = check_response("POST", &url, status, body)?;
        decode_json("login (refresh token)", &body)
    }

    /// Login with a username (or email) and password.
    pub async fn login_with_user_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Credentials, ApiError> {
        warn!(
            "login with user password is deprecated and will not work since withny has a captcha, \
             please login with a refresh token instead"
        );
        info!(username, "logging in");
        let url = format!("{BASE_URL}/auth/login");
        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::USER_AGENT, self.user_agent)
            .json(&serde_json::json!({ "email": username, "password": password }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = check_response("POST", &url, status, resp.text().await?)?;
        decode_json("login (user password)", &body)
    }

    /// Fetch the user record for a channel id.
    pub async fn get_user(&self, channel_id: &str) -> Result<UserRecord, ApiError> {
        let url = format!("{BASE_URL}/user");
        let resp = self
            .auth_request(Method::GET, &url)
            .await
            .query(&[("username", channel_id)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = check_response("GET", &url, status, resp.text().await?)?;
        decode_json("get user", &body)
    }

    /// List current streams, optionally filtered by channel id and pass code.
    pub async fn get_streams(
        &self,
        channel_id: Option<&str>,
        pass_code: Option<&str>,
    ) -> Result<Vec<StreamDescriptor>, ApiError> {
        let url = format!("{BASE_URL}/streams/with-rooms");
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = channel_id.filter(|id| !id.is_empty()) {
            query.push(("username", id));
        }
        if let Some(code) = pass_code.filter(|code| !code.is_empty()) {
            query.push(("passCode", code));
        }

        let resp = self
            .auth_request(Method::GET, &url)
            .await
            .query(&query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = check_response("GET", &url, status, resp.text().await?)?;
        decode_json("get streams", &body)
    }

    /// Resolve the signed playback URL of a stream.
    ///
    /// The upstream answers 500 with a JSON `{"message": "Stream not found"}`
    /// body when the stream is gone; that case is surfaced as
    /// [`ApiError::StreamNotFound`].
    pub async fn get_stream_playback_url(&self, stream_uuid: &str) -> Result<String, ApiError> {
        let url = format!("{BASE_URL}/streams/{stream_uuid}/playback-url");
        let resp = self
            .auth_request(Method::GET, &url)
            .await
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;

        if status == 500 {
            if let Ok(err_msg) = serde_json::from_str::<ErrorResponse>(&body) {
                if err_msg.message == "Stream not found" {
                    return Err(ApiError::StreamNotFound);
                }
                return Err(ApiError::Http {
                    status,
                    method: "GET".to_string(),
                    url,
                    body: err_msg.message,
                });
            }
        }
        let body = check_response("GET", &url, status, body)?;
        decode_json("get playback url", &body)
    }

    /// Fetch and parse the master manifest behind a playback URL,
    /// retrying 5xx responses up to `retries` times.
    pub async fn get_playlists(
        &self,
        playback_url: &str,
        retries: u32,
    ) -> Result<Vec<Playlist>, ApiError> {
        let mut last_err: Option<ApiError> = None;
        for count in 0..=retries {
            let resp = self
                .http
                .get(playback_url)
                .header(reqwest::header::ACCEPT, HLS_ACCEPT)
                .header(reqwest::header::REFERER, REFERER)
                .header(reqwest::header::ORIGIN, ORIGIN)
                .header(reqwest::header::USER_AGENT, self.user_agent)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;

            let status = resp.status().as_u16();
            let body = resp.text().await?;
            if (500..600).contains(&status) {
                warn!(
                    url = playback_url,
                    status, count, retries, "http error, retrying"
                );
                last_err = Some(ApiError::Http {
                    status,
                    method: "GET".to_string(),
                    url: playback_url.to_string(),
                    body,
                });
                continue;
            }
            let body = check_response("GET", playback_url, status, body)?;
            return Ok(playlist::parse_master_playlist(&body));
        }

        let err = last_err.expect("retry loop only exits on a 5xx");
        error!(url = playback_url, retries, error = %err, "giving up after too many http errors");
        Err(err)
    }

    /// Fetch a page body with the authenticated headers. Used by the
    /// channel-page scraper.
    pub async fn fetch_page(&self, url: &str) -> Result<String, ApiError> {
        let resp = self
            .auth_request(Method::GET, url)
            .await
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = resp.status().as_u16();
        check_response("GET", url, status, resp.text().await?)
    }

    /// Download a small binary object (thumbnails).
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, ApiError> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, self.user_agent)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ApiError::Http {
                status,
                method: "GET".to_string(),
                url: url.to_string(),
                body: String::new(),
            });
        }
        Ok(resp.bytes().await?)
    }
}
