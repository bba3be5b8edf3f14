//! Typed records for the upstream REST and WebSocket APIs.
//!
//! Unknown fields are ignored on decode. Numeric fields that the upstream
//! serves as either an integer or a string (prices, item powers) are
//! modeled as [`FlexibleNumber`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A number that may arrive as a JSON integer or a JSON string.
///
/// Normalizes to an integer via [`FlexibleNumber::as_i64`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexibleNumber {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FlexibleNumber {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

impl Default for FlexibleNumber {
    fn default() -> Self {
        Self::Integer(0)
    }
}

/// The token pair returned by a login or refresh call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Credentials {
    pub token: String,
    pub refresh_token: String,
    pub token_type: String,
}

/// The operator-supplied credential record.
///
/// Either `username`/`password` or `token`/`refresh_token` is filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SavedCredentials {
    pub username: String,
    pub password: String,
    pub token: String,
    pub refresh_token: String,
}

impl SavedCredentials {
    /// Stable hash used to invalidate the token cache when the operator
    /// edits this record.
    pub fn hash(&self) -> String {
        crate::utils::hash::hash(self)
    }
}

/// User record resolved from a channel id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    pub id: FlexibleNumber,
    pub uuid: String,
    pub username: String,
    pub name: String,
    pub profile_text: String,
    pub profile_image_url: String,
    pub header_image_url: String,
    pub cast: Cast,
    pub create_room_notification_enabled: bool,
}

/// One live stream, immutable for the life of a broadcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub uuid: String,
    pub title: String,
    pub about: String,
    pub thumbnail_url: String,
    pub billing_mode: String,
    pub price: FlexibleNumber,
    pub streaming_method: String,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<serde_json::Value>,
    pub device_id: FlexibleNumber,
    pub cast: Cast,
    pub has_ticket: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cast {
    pub id: FlexibleNumber,
    pub uuid: String,
    pub coupon: String,
    pub profile_image_url: String,
    pub header_image_url: String,
    pub is_favorite: bool,
    pub cast_social_media_accounts: Vec<CastSocialMediaAccount>,
    pub agency_secret: AgencySecret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CastSocialMediaAccount {
    pub platform: String,
    #[serde(rename = "username")]
    pub channel_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencySecret {
    pub id: FlexibleNumber,
    pub uuid: String,
    #[serde(rename = "username")]
    pub channel_name: String,
    pub name: String,
}

/// Metadata dumped next to a recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(rename = "User")]
    pub user: UserRecord,
    #[serde(rename = "Stream")]
    pub stream: StreamDescriptor,
}

/// One chat comment delivered over the GraphQL subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "streamUUID")]
    pub stream_uuid: String,
    #[serde(rename = "commentUUID")]
    pub comment_uuid: String,
    #[serde(rename = "userUUID")]
    pub user_uuid: String,
    pub username: String,
    pub name: String,
    pub content_type: String,
    pub content: String,
    pub tip_amount: FlexibleNumber,
    #[serde(rename = "itemID")]
    pub item_id: String,
    pub item_name: String,
    #[serde(rename = "itemURI")]
    pub item_uri: String,
    #[serde(rename = "animationURI")]
    pub animation_uri: String,
    pub item_power: FlexibleNumber,
    pub item_lifetime: FlexibleNumber,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub deleted_at: Option<String>,
}

/// Error body the API serves with some non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorResponse {
    pub message: String,
    pub status: FlexibleNumber,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flexible_number_decodes_both_forms() {
        let a: FlexibleNumber = serde_json::from_str("1200").unwrap();
        let b: FlexibleNumber = serde_json::from_str("\"1200\"").unwrap();
        assert_eq!(a.as_i64(), 1200);
        assert_eq!(b.as_i64(), 1200);
    }

    #[test]
    fn test_flexible_number_bad_text_normalizes_to_zero() {
        let n: FlexibleNumber = serde_json::from_str("\"free\"").unwrap();
        assert_eq!(n.as_i64(), 0);
    }

    #[test]
    fn test_stream_descriptor_tolerates_unknown_and_missing_fields() {
        let raw = r#"{
            "uuid": "abc-123",
            "title": "test stream",
            "price": "500",
            "newUpstreamField": {"nested": true},
            "cast": {"agencySecret": {"username": "chan"}}
        }"#;
        let s: StreamDescriptor = serde_json::from_str(raw).unwrap();
        assert_eq!(s.uuid, "abc-123");
        assert_eq!(s.price.as_i64(), 500);
        assert_eq!(s.cast.agency_secret.channel_name, "chan");
        assert!(s.started_at.is_none());
    }

    #[test]
    fn test_saved_credentials_hash_tracks_content() {
        let a = SavedCredentials {
            token: "t1".into(),
            refresh_token: "r1".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.refresh_token = "r2".into();
        assert_ne!(a.hash(), b.hash());
    }
}
