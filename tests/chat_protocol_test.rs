//! Chat subscription protocol test against an in-process WebSocket server.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use withny_dl::chat::ChatWebSocket;
use withny_dl::credentials::CredentialsStore;
use withny_dl::platform::models::Comment;
use withny_dl::platform::ApiClient;

fn test_client(dir: &tempfile::TempDir) -> Arc<ApiClient> {
    let store = Arc::new(CredentialsStore::new(dir.path().join("cache.bin"), None));
    Arc::new(ApiClient::new(reqwest::Client::new(), store))
}

fn data_frame(stream_uuid: &str, content: &str) -> String {
    serde_json::json!({
        "type": "data",
        "id": "sub-1",
        "payload": {
            "data": {
                "onPostComment": {
                    "streamUUID": stream_uuid,
                    "commentUUID": "c-1",
                    "username": "someone",
                    "contentType": "comment",
                    "content": content,
                    "tipAmount": "0",
                }
            }
        }
    })
    .to_string()
}

/// Serve one connection: ack the init, ack the subscription, push one
/// comment, a keep-alive, an unknown frame, then close.
async fn serve_one(listener: TcpListener, stream_uuid: String) -> (String, String) {
    let (socket, _) = listener.accept().await.expect("accept");
    let mut ws = tokio_tungstenite::accept_async(socket).await.expect("upgrade");

    let init = ws
        .next()
        .await
        .expect("init frame")
        .expect("init frame readable")
        .into_text()
        .expect("init frame is text");
    ws.send(Message::Text(r#"{"type":"connection_ack"}"#.to_string()))
        .await
        .expect("send ack");

    let start = ws
        .next()
        .await
        .expect("start frame")
        .expect("start frame readable")
        .into_text()
        .expect("start frame is text");

    for frame in [
        r#"{"type":"start_ack","id":"sub-1"}"#.to_string(),
        data_frame(&stream_uuid, "hello world"),
        r#"{"type":"ka"}"#.to_string(),
        r#"{"type":"whatever"}"#.to_string(),
        data_frame(&stream_uuid, "second"),
    ] {
        ws.send(Message::Text(frame)).await.expect("send frame");
    }

    ws.close(None).await.expect("close");
    (init, start)
}

#[tokio::test]
async fn test_subscription_handshake_and_comment_demux() {
    let dir = tempfile::tempdir().unwrap();
    let client = test_client(&dir);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stream_uuid = "0d0bd3b0-43c2-4ab2-9fbf-498ab38f258a".to_string();
    let server = tokio::spawn(serve_one(listener, stream_uuid.clone()));

    let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("connect to test server");

    let ws = ChatWebSocket::new(
        &client,
        "https://abcdef.appsync-api.ap-northeast-1.amazonaws.com/graphql",
    )
    .unwrap();

    let (tx, mut rx) = mpsc::channel::<Comment>(16);
    let collect = async {
        let mut comments = Vec::new();
        while let Some(comment) = rx.recv().await {
            comments.push(comment);
        }
        comments
    };
    let (result, comments) = tokio::join!(ws.watch_comments(stream, &stream_uuid, tx), collect);

    // Normal close is EOF, not an error.
    result.expect("clean close");

    assert_eq!(comments.len(), 2, "ka/unknown frames must not produce comments");
    assert_eq!(comments[0].content, "hello world");
    assert_eq!(comments[0].stream_uuid, stream_uuid);
    assert_eq!(comments[0].tip_amount.as_i64(), 0);
    assert_eq!(comments[1].content, "second");

    let (init, start) = server.await.unwrap();

    let init: serde_json::Value = serde_json::from_str(&init).unwrap();
    assert_eq!(init["type"], "connection_init");

    let start: serde_json::Value = serde_json::from_str(&start).unwrap();
    assert_eq!(start["type"], "start");
    assert!(!start["id"].as_str().unwrap().is_empty());
    let query = start["payload"]["data"].as_str().unwrap();
    assert!(query.contains(&stream_uuid), "subscription must carry the stream uuid");
    let auth = &start["payload"]["extensions"]["authorization"];
    assert_eq!(
        auth["host"],
        "abcdef.appsync-api.ap-northeast-1.amazonaws.com"
    );
}
