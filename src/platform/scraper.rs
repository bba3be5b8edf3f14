//! Channel-page scraping.
//!
//! The GraphQL endpoint and the stream UUID are server-side rendered into
//! the channel page. The endpoint could be hard-coded, but scraping it
//! shields us from silent upstream moves.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use super::client::{ApiClient, ApiError};

fn graphql_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""https:\\u002F\\u002F[^"]*\\u002Fgraphql""#).expect("valid regex")
    })
}

fn stream_uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"uuid="([^"]*)""#).expect("valid regex"))
}

/// Scrapes the withny website. Holds a reference to the API client so
/// callers that need both receive the scraper.
pub struct Scraper<'a> {
    client: &'a ApiClient,
}

impl<'a> Scraper<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        self.client
    }

    fn channel_url(channel_id: &str, pass_code: Option<&str>) -> String {
        match pass_code.filter(|c| !c.is_empty()) {
            Some(code) => format!("https://www.withny.fun/channels/{channel_id}?passCode={code}"),
            None => format!("https://www.withny.fun/channels/{channel_id}"),
        }
    }

    /// Find the GraphQL endpoint and the stream UUID on the channel page.
    pub async fn fetch_graphql_and_stream_uuid(
        &self,
        channel_id: &str,
        pass_code: Option<&str>,
    ) -> Result<(String, String), ApiError> {
        let body = self
            .client
            .fetch_page(&Self::channel_url(channel_id, pass_code))
            .await?;
        find_graphql_endpoint_and_stream_uuid(&body)
    }

    /// Find the stream UUID on the channel page.
    pub async fn fetch_stream_uuid(
        &self,
        channel_id: &str,
        pass_code: Option<&str>,
    ) -> Result<String, ApiError> {
        let body = self
            .client
            .fetch_page(&Self::channel_url(channel_id, pass_code))
            .await?;
        find_stream_uuid(&body)
    }
}

fn find_graphql_endpoint_and_stream_uuid(body: &str) -> Result<(String, String), ApiError> {
    let raw = graphql_url_regex()
        .find(body)
        .ok_or(ApiError::NoGraphQlEndpoint)?
        .as_str();

    // The match is a JSON string literal with / escapes; unquote it.
    let endpoint = match serde_json::from_str::<String>(raw) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(endpoint = raw, error = %e, "failed to unquote graphql endpoint");
            raw.to_string()
        }
    };

    let suuid = find_stream_uuid(body)?;
    Ok((endpoint, suuid))
}

fn find_stream_uuid(body: &str) -> Result<String, ApiError> {
    stream_uuid_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ApiError::NoStreamUuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><script>
        self.__next_f.push("endpoint:\"https:\\u002F\\u002Fabcdef.appsync-api.ap-northeast-1.amazonaws.com\\u002Fgraphql\"")
        </script>
        <video uuid="0d0bd3b0-43c2-4ab2-9fbf-498ab38f258a"></video>
        </html>"#;

    #[test]
    fn test_find_graphql_endpoint_and_stream_uuid() {
        // The raw page escapes slashes twice (JS string in HTML); mirror
        // what the fetched body actually contains.
        let body = PAGE.replace("\\\\u002F", "\\u002F");
        let (endpoint, suuid) = find_graphql_endpoint_and_stream_uuid(&body).unwrap();
        assert_eq!(
            endpoint,
            "https://abcdef.appsync-api.ap-northeast-1.amazonaws.com/graphql"
        );
        assert_eq!(suuid, "0d0bd3b0-43c2-4ab2-9fbf-498ab38f258a");
    }

    #[test]
    fn test_missing_endpoint() {
        let err = find_graphql_endpoint_and_stream_uuid("<html></html>").unwrap_err();
        assert!(matches!(err, ApiError::NoGraphQlEndpoint));
    }

    #[test]
    fn test_missing_uuid() {
        let body = "\"https:\\u002F\\u002Fx.example\\u002Fgraphql\"";
        let err = find_graphql_endpoint_and_stream_uuid(body).unwrap_err();
        assert!(matches!(err, ApiError::NoStreamUuid));
    }

    #[test]
    fn test_channel_url_with_pass_code() {
        assert_eq!(
            Scraper::channel_url("chan", Some("1234")),
            "https://www.withny.fun/channels/chan?passCode=1234"
        );
        assert_eq!(
            Scraper::channel_url("chan", None),
            "https://www.withny.fun/channels/chan"
        );
    }
}
