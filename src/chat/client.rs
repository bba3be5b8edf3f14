//! GraphQL-over-WebSocket subscription client.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use super::graphql::{self, SubscribeMessagePayload};
use super::{writer, ChatError};
use crate::platform::models::Comment;
use crate::platform::scraper::Scraper;
use crate::platform::session::{build_ws_request, connect};
use crate::platform::ApiClient;

/// Buffered comments between the socket reader and the file writer.
const COMMENT_BUF_MAX: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, serde::Deserialize)]
struct WsCommentResponse {
    data: WsCommentData,
}

#[derive(Debug, serde::Deserialize)]
struct WsCommentData {
    #[serde(rename = "onPostComment")]
    on_post_comment: Comment,
}

/// Client for the AppSync GraphQL websocket.
pub struct ChatWebSocket<'a> {
    client: &'a ApiClient,
    /// The scraped `https://…/graphql` endpoint, rewritten to `wss://`.
    url: url::Url,
    /// Companion realtime endpoint the socket actually dials.
    realtime_url: url::Url,
}

impl<'a> ChatWebSocket<'a> {
    pub fn new(client: &'a ApiClient, endpoint: &str) -> Result<Self, ChatError> {
        let mut url = url::Url::parse(endpoint)
            .map_err(|e| ChatError::WebSocket(format!("invalid graphql endpoint: {e}")))?;
        let mut realtime_url =
            url::Url::parse(&endpoint.replacen("appsync-api", "appsync-realtime-api", 1))
                .map_err(|e| ChatError::WebSocket(format!("invalid realtime endpoint: {e}")))?;
        url.set_scheme("wss")
            .map_err(|_| ChatError::WebSocket("cannot rewrite scheme".to_string()))?;
        realtime_url
            .set_scheme("wss")
            .map_err(|_| ChatError::WebSocket("cannot rewrite scheme".to_string()))?;
        Ok(Self {
            client,
            url,
            realtime_url,
        })
    }

    fn api_host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Dial the realtime endpoint with the base64 `header`/`payload` query
    /// parameters AppSync expects.
    pub async fn dial(&self) -> Result<WsStream, ChatError> {
        let token = self.client.bearer_token().await;
        let header = serde_json::json!({
            "Authorization": format!("Bearer {token}"),
            "Host": self.api_host(),
        });
        let header_b64 = STANDARD.encode(serde_json::to_vec(&header)?);

        let mut url = self.realtime_url.clone();
        url.query_pairs_mut()
            .append_pair("header", &header_b64)
            // "e30=" is "{}" in base64.
            .append_pair("payload", "e30=");

        let request = build_ws_request(url.as_str(), Some("graphql-ws"))?;
        Ok(connect(request).await?)
    }

    /// Listen for comments until the socket closes or `tx` is dropped.
    ///
    /// Returns `Ok(())` on a normal close; any other close or I/O error is
    /// propagated.
    pub async fn watch_comments(
        &self,
        mut stream: WsStream,
        stream_uuid: &str,
        tx: mpsc::Sender<Comment>,
    ) -> Result<(), ChatError> {
        stream
            .send(Message::Text(serde_json::to_string(
                &graphql::connection_init(),
            )?))
            .await
            .map_err(|e| ChatError::WebSocket(format!("failed to init connection: {e}")))?;

        while let Some(msg) = stream.next().await {
            let msg = msg.map_err(|e| ChatError::WebSocket(e.to_string()))?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!("websocket closed cleanly");
                    return Ok(());
                }
                other => {
                    error!(r#type = ?other, "received unhandled msg type");
                    continue;
                }
            };

            trace!(msg = %text, "ws receive");
            let response: graphql::WsResponse = match serde_json::from_str(&text) {
                Ok(response) => response,
                Err(e) => {
                    error!(msg = %text, error = %e, "failed to decode");
                    continue;
                }
            };

            match response.message_type.as_str() {
                "connection_ack" => {
                    info!("ws fully connected");
                    self.subscribe(&mut stream, stream_uuid).await?;
                }
                "start_ack" => info!("subscription started"),
                "data" => {
                    let comment: WsCommentResponse =
                        match serde_json::from_value(response.payload) {
                            Ok(comment) => comment,
                            Err(e) => {
                                warn!(error = %e, "failed to decode comment");
                                continue;
                            }
                        };
                    if tx.send(comment.data.on_post_comment).await.is_err() {
                        return Ok(());
                    }
                }
                // Keep-alive.
                "ka" => {}
                other => {
                    warn!(r#type = other, msg = %text, "received unhandled msg type");
                }
            }
        }
        info!("websocket closed cleanly");
        Ok(())
    }

    /// Send the `start` message carrying the subscription query and the
    /// authorization extension.
    async fn subscribe(&self, stream: &mut WsStream, stream_uuid: &str) -> Result<(), ChatError> {
        let cached = self.client.cache().read().await.ok().flatten();
        let (token, token_type) = match &cached {
            Some(record) => (
                record.credentials.token.clone(),
                if record.credentials.token_type.is_empty() {
                    "Bearer".to_string()
                } else {
                    record.credentials.token_type.clone()
                },
            ),
            None => {
                warn!("failed to get cached credentials");
                (String::new(), "Bearer".to_string())
            }
        };

        let query = graphql::Query {
            query: graphql::comments_subscription(stream_uuid),
            variables: serde_json::Map::new(),
        };
        let message = graphql::build_subscribe_message(SubscribeMessagePayload {
            data: serde_json::to_string(&query)?,
            extensions: serde_json::json!({
                "authorization": {
                    "Authorization": format!("{token_type} {token}"),
                    "host": self.api_host(),
                }
            }),
        });

        stream
            .send(Message::Text(serde_json::to_string(&message)?))
            .await
            .map_err(|e| ChatError::WebSocket(format!("failed to subscribe: {e}")))
    }
}

/// Download the chat of a channel's current stream to a JSON array file.
///
/// Runs until the subscription closes or `token` is canceled.
pub async fn download_chat(
    client: &ApiClient,
    token: &CancellationToken,
    channel_id: &str,
    pass_code: Option<&str>,
    output: &Path,
) -> Result<(), ChatError> {
    let (endpoint, stream_uuid) = Scraper::new(client)
        .fetch_graphql_and_stream_uuid(channel_id, pass_code)
        .await?;

    let ws = ChatWebSocket::new(client, &endpoint)?;
    let stream = ws.dial().await?;

    let (tx, rx) = mpsc::channel(COMMENT_BUF_MAX);
    let writer = tokio::spawn({
        let output = output.to_path_buf();
        async move { writer::write_comments(&output, rx).await }
    });

    let result = tokio::select! {
        res = ws.watch_comments(stream, &stream_uuid, tx) => res,
        _ = token.cancelled() => Err(ChatError::Canceled),
    };

    // Closing the comment channel makes the writer finish the JSON array.
    let _ = writer.await;
    result
}
