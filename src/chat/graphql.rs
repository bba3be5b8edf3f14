//! GraphQL-over-WebSocket protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Subscription query for chat comments on one stream.
pub fn comments_subscription(stream_uuid: &str) -> String {
    format!(
        r#"subscription MySubscription {{
	onPostComment(streamUUID: "{stream_uuid}") {{
		streamUUID
		commentUUID
		userUUID
		username
		name
		contentType
		content
		tipAmount
		itemID
		itemName
		itemURI
		animationURI
		itemPower
		itemLifetime
		createdAt
		updatedAt
		deletedAt
	}}
}}"#
    )
}

/// `connection_init` message. (client -> server)
pub fn connection_init() -> serde_json::Value {
    json!({ "type": "connection_init" })
}

/// A GraphQL query wrapper; serialized to JSON and carried in the `data`
/// field of the subscribe payload.
#[derive(Debug, Serialize)]
pub struct Query {
    pub query: String,
    pub variables: serde_json::Map<String, serde_json::Value>,
}

/// Payload of the `start` message.
#[derive(Debug, Serialize)]
pub struct SubscribeMessagePayload {
    pub data: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub extensions: serde_json::Value,
}

/// Build a `start` message with a random subscription id.
pub fn build_subscribe_message(payload: SubscribeMessagePayload) -> serde_json::Value {
    json!({
        "type": "start",
        "id": uuid::Uuid::new_v4().to_string(),
        "payload": payload,
    })
}

/// A frame received from the server.
#[derive(Debug, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_query_carries_uuid() {
        let q = comments_subscription("abc-123");
        assert!(q.contains(r#"onPostComment(streamUUID: "abc-123")"#));
        assert!(q.contains("commentUUID"));
    }

    #[test]
    fn test_subscribe_message_shape() {
        let msg = build_subscribe_message(SubscribeMessagePayload {
            data: "{}".to_string(),
            extensions: serde_json::json!({"authorization": {"host": "h"}}),
        });
        assert_eq!(msg["type"], "start");
        assert!(!msg["id"].as_str().unwrap().is_empty());
        assert_eq!(msg["payload"]["data"], "{}");
        assert_eq!(msg["payload"]["extensions"]["authorization"]["host"], "h");
    }

    #[test]
    fn test_ws_response_decodes_with_partial_fields() {
        let resp: WsResponse = serde_json::from_str(r#"{"type":"ka"}"#).unwrap();
        assert_eq!(resp.message_type, "ka");
        assert!(resp.id.is_empty());
        assert!(resp.payload.is_null());
    }
}
