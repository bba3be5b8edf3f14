//! Socket.IO v4 session websocket.
//!
//! Used by the scrape detection strategy: after the stream UUID is scraped
//! from the channel page, a short-lived session is opened to receive the
//! stream metadata object.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::client::{ApiClient, ApiError, ORIGIN};
use super::models::StreamDescriptor;
use super::socketio::{self, MessageType};
use crate::utils::censor::censor;

const SOCKET_IO_URL: &str = "wss://api.withny.fun/socket.io/";

/// WebSocket read limit shared by all upstream connections.
pub(crate) const WS_READ_LIMIT: usize = 10 * 1024 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a websocket client request with the `Origin` header the upstream
/// requires and an optional subprotocol.
pub(crate) fn build_ws_request(
    url: &str,
    subprotocol: Option<&str>,
) -> Result<Request<()>, ApiError> {
    let uri: tokio_tungstenite::tungstenite::http::Uri = url
        .parse()
        .map_err(|e| ApiError::WebSocket(format!("invalid websocket url {url}: {e}")))?;
    let host = uri.host().unwrap_or_default();
    let host_header = match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = Request::builder()
        .uri(url)
        .header("Host", host_header)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Origin", ORIGIN);
    if let Some(protocol) = subprotocol {
        builder = builder.header("Sec-WebSocket-Protocol", protocol);
    }
    builder
        .body(())
        .map_err(|e| ApiError::WebSocket(format!("failed to build request: {e}")))
}

/// Connect with the shared read limit applied.
pub(crate) async fn connect(request: Request<()>) -> Result<WsStream, ApiError> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(WS_READ_LIMIT);
    let (stream, _) = connect_async_with_config(request, Some(config), false)
        .await
        .map_err(|e| ApiError::WebSocket(format!("failed to dial websocket: {e}")))?;
    Ok(stream)
}

/// Short-lived Socket.IO session for one stream.
pub struct SessionWebSocket<'a> {
    client: &'a ApiClient,
    stream_uuid: String,
    pass_code: String,
}

impl<'a> SessionWebSocket<'a> {
    pub fn new(client: &'a ApiClient, stream_uuid: &str, pass_code: Option<&str>) -> Self {
        let pass_code = match pass_code.filter(|c| !c.is_empty()) {
            Some(code) => code.to_string(),
            // The upstream expects the literal string when no code is set.
            None => "undefined".to_string(),
        };
        debug!(
            stream_uuid,
            pass_code = %censor(&pass_code, 4, '*'),
            "opening session websocket"
        );
        Self {
            client,
            stream_uuid: stream_uuid.to_string(),
            pass_code,
        }
    }

    async fn dial(&self) -> Result<WsStream, ApiError> {
        let token = self.client.bearer_token().await;
        let mut url = url::Url::parse(SOCKET_IO_URL)
            .map_err(|e| ApiError::WebSocket(format!("invalid session url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("uuid", &self.stream_uuid)
            .append_pair("token", &token)
            .append_pair("passCode", &self.pass_code)
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");

        connect(build_ws_request(url.as_str(), None)?).await
    }

    /// Listen on the session until it closes, delivering every `"stream"`
    /// event payload to `tx`.
    async fn watch(
        &self,
        mut stream: WsStream,
        tx: mpsc::Sender<StreamDescriptor>,
    ) -> Result<(), ApiError> {
        // Join the channels namespace.
        stream
            .send(Message::Text("40/channels,".to_string()))
            .await
            .map_err(|e| ApiError::WebSocket(format!("failed to init connection: {e}")))?;

        while let Some(msg) = stream.next().await {
            let msg = msg.map_err(|e| ApiError::WebSocket(e.to_string()))?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!("session websocket closed cleanly");
                    return Ok(());
                }
                _ => continue,
            };

            let decoded = match socketio::unmarshal_v4(text.as_bytes()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    trace!(error = %e, msg = %text, "failed to unmarshal message");
                    continue;
                }
            };
            if decoded.message_type != MessageType::Event {
                continue;
            }

            // The only payload of interest is ["stream", <metadata>].
            let payload: Vec<serde_json::Value> = match serde_json::from_slice(&decoded.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    trace!(error = %e, "failed to unmarshal payload");
                    continue;
                }
            };
            if payload.len() != 2 {
                trace!("ignoring unwanted payload (wrong size)");
                continue;
            }
            if payload[0].as_str() != Some("stream") {
                trace!(r#type = ?payload[0], "ignoring unwanted payload (wrong type)");
                continue;
            }
            match serde_json::from_value::<StreamDescriptor>(payload[1].clone()) {
                Ok(descriptor) => {
                    if tx.send(descriptor).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "failed to unmarshal stream payload"),
            }
        }
        Ok(())
    }
}

/// Fetch the stream metadata object synchronously, bounded to five seconds.
pub async fn fetch_stream_metadata(
    client: &ApiClient,
    token: &CancellationToken,
    stream_uuid: &str,
    pass_code: Option<&str>,
) -> Result<StreamDescriptor, ApiError> {
    let ws = SessionWebSocket::new(client, stream_uuid, pass_code);
    let stream = ws.dial().await?;

    let (tx, mut rx) = mpsc::channel(1);
    tokio::select! {
        res = ws.watch(stream, tx) => {
            res?;
            Err(ApiError::StreamNotFound)
        }
        meta = rx.recv() => meta.ok_or(ApiError::StreamNotFound),
        _ = tokio::time::sleep(Duration::from_secs(5)) => Err(ApiError::StreamNotFound),
        _ = token.cancelled() => Err(ApiError::Canceled),
    }
}
