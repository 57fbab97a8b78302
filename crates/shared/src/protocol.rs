use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{MessageId, ProductId, RoomId, UserId, VariantId};

pub const TEXT_MESSAGE_TYPE: &str = "Text";

/// Canonical chat message, post-normalization. Every feed (push echo, pull
/// page, optimistic local append) converges on this shape before it reaches
/// the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    /// ISO-8601, kept as it arrived; parse via [`ChatMessage::sent_at_utc`].
    pub sent_at: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar_url: Option<String>,
    /// Derived relative to the viewing client; never transmitted.
    #[serde(skip)]
    pub is_mine: bool,
}

fn default_message_type() -> String {
    TEXT_MESSAGE_TYPE.to_string()
}

impl ChatMessage {
    /// Authoritative ordering key. Unparsable timestamps order as epoch 0.
    pub fn sent_at_utc(&self) -> DateTime<Utc> {
        parse_timestamp(&self.sent_at)
    }
}

/// Parse an ISO-8601 timestamp, tolerating a missing zone designator (some
/// emitters serialize naive local timestamps). Falls back to epoch 0 rather
/// than failing; a misplaced message beats a dropped one.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return parsed.and_utc();
    }
    DateTime::UNIX_EPOCH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    /// The other participant, for direct (buyer/seller) rooms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    #[serde(default)]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

/// One product on a livestream board. `id` is the livestream-product link
/// identifier; entries seen only through push may not carry it yet, in which
/// case `(product_id, variant_id)` is the identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProduct {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    #[serde(default)]
    pub is_pin: bool,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// A push event as handed up by the transport: the event name plus the raw
/// payload, untouched until the normalizer canonicalizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub event: String,
    pub payload: Value,
}
