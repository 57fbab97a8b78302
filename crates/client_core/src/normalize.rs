//! Canonicalize heterogeneous push/pull payloads.
//!
//! Emitters disagree on key casing and field names (the push gateway, the
//! REST store, and older endpoints each serialize differently), so every
//! canonical field resolves through an ordered candidate-key table; the
//! first present value wins. Pure functions, no I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use shared::{
    domain::{MessageId, ProductId, RoomId, UserId, VariantId},
    protocol::{ChatMessage, LiveProduct, TypingNotice, TEXT_MESSAGE_TYPE},
};

const MESSAGE_ID_KEYS: &[&str] = &[
    "id",
    "Id",
    "messageId",
    "MessageId",
    "chatMessageId",
    "ChatMessageId",
];
const ROOM_ID_KEYS: &[&str] = &[
    "roomId",
    "RoomId",
    "chatRoomId",
    "ChatRoomId",
    "conversationId",
    "ConversationId",
];
const SENDER_ID_KEYS: &[&str] = &[
    "senderId",
    "SenderId",
    "userId",
    "UserId",
    "fromUserId",
    "FromUserId",
];
const CONTENT_KEYS: &[&str] = &[
    "content", "Content", "message", "Message", "text", "Text", "body", "Body",
];
const SENT_AT_KEYS: &[&str] = &[
    "sentAt",
    "SentAt",
    "timestamp",
    "Timestamp",
    "createdAt",
    "CreatedAt",
    "sendDate",
    "SendDate",
];
const IS_READ_KEYS: &[&str] = &["isRead", "IsRead", "read", "Read"];
const IS_EDITED_KEYS: &[&str] = &["isEdited", "IsEdited", "edited", "Edited"];
const MESSAGE_TYPE_KEYS: &[&str] = &["messageType", "MessageType", "type", "Type"];
const ATTACHMENT_URL_KEYS: &[&str] = &[
    "attachmentUrl",
    "AttachmentUrl",
    "attachment",
    "Attachment",
    "fileUrl",
    "FileUrl",
];
const EDITED_AT_KEYS: &[&str] = &["editedAt", "EditedAt"];
const SENDER_NAME_KEYS: &[&str] = &[
    "senderName",
    "SenderName",
    "userName",
    "UserName",
    "fullName",
    "FullName",
];
const SENDER_AVATAR_KEYS: &[&str] = &[
    "senderAvatarUrl",
    "SenderAvatarUrl",
    "avatarUrl",
    "AvatarUrl",
    "avatar",
    "Avatar",
];

const LINK_ID_KEYS: &[&str] = &["id", "Id", "livestreamProductId", "LivestreamProductId"];
const PRODUCT_ID_KEYS: &[&str] = &["productId", "ProductId"];
const VARIANT_ID_KEYS: &[&str] = &[
    "variantId",
    "VariantId",
    "productVariantId",
    "ProductVariantId",
];
const IS_PIN_KEYS: &[&str] = &["isPin", "IsPin", "pinned", "Pinned", "isPinned", "IsPinned"];
const STOCK_KEYS: &[&str] = &["stock", "Stock", "quantity", "Quantity"];
const PRICE_KEYS: &[&str] = &["price", "Price"];

const TYPING_USER_KEYS: &[&str] = &["userId", "UserId", "senderId", "SenderId"];
const TYPING_FLAG_KEYS: &[&str] = &["isTyping", "IsTyping", "typing", "Typing"];

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match raw.get(*key) {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn first_bool(raw: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_bool))
}

fn first_i64(raw: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_i64))
}

fn first_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_f64))
}

/// Build a canonical [`ChatMessage`] from an arbitrary-shaped payload.
///
/// Missing identifier fields synthesize a provisional id from `now`; missing
/// optionals degrade to empty/`None`. Deterministic given the same input and
/// clock.
pub fn normalize_message(
    raw: &Value,
    own_user_id: Option<&UserId>,
    now: DateTime<Utc>,
) -> ChatMessage {
    let sender_id = UserId(first_string(raw, SENDER_ID_KEYS).unwrap_or_default());
    let is_mine =
        !sender_id.0.is_empty() && own_user_id.is_some_and(|own| own == &sender_id);
    ChatMessage {
        id: first_string(raw, MESSAGE_ID_KEYS)
            .map(MessageId)
            .unwrap_or_else(|| MessageId::provisional(now)),
        room_id: RoomId(first_string(raw, ROOM_ID_KEYS).unwrap_or_default()),
        sender_id,
        content: first_string(raw, CONTENT_KEYS).unwrap_or_default(),
        sent_at: first_string(raw, SENT_AT_KEYS)
            .unwrap_or_else(|| now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        is_read: first_bool(raw, IS_READ_KEYS).unwrap_or(false),
        is_edited: first_bool(raw, IS_EDITED_KEYS).unwrap_or(false),
        message_type: first_string(raw, MESSAGE_TYPE_KEYS)
            .unwrap_or_else(|| TEXT_MESSAGE_TYPE.to_string()),
        attachment_url: first_string(raw, ATTACHMENT_URL_KEYS),
        edited_at: first_string(raw, EDITED_AT_KEYS),
        sender_name: first_string(raw, SENDER_NAME_KEYS),
        sender_avatar_url: first_string(raw, SENDER_AVATAR_KEYS),
        is_mine,
    }
}

/// Livestream variant of [`normalize_message`].
pub fn normalize_product(raw: &Value) -> LiveProduct {
    LiveProduct {
        id: first_string(raw, LINK_ID_KEYS),
        product_id: ProductId(first_string(raw, PRODUCT_ID_KEYS).unwrap_or_default()),
        variant_id: first_string(raw, VARIANT_ID_KEYS).map(VariantId),
        is_pin: first_bool(raw, IS_PIN_KEYS).unwrap_or(false),
        stock: first_i64(raw, STOCK_KEYS).unwrap_or(0),
        price: first_f64(raw, PRICE_KEYS).unwrap_or(0.0),
    }
}

/// Typing payloads without a room or user are meaningless; those return
/// `None` instead of a synthesized notice.
pub fn normalize_typing(raw: &Value) -> Option<TypingNotice> {
    let room_id = first_string(raw, ROOM_ID_KEYS)?;
    let user_id = first_string(raw, TYPING_USER_KEYS)?;
    Some(TypingNotice {
        room_id: RoomId(room_id),
        user_id: UserId(user_id),
        is_typing: first_bool(raw, TYPING_FLAG_KEYS).unwrap_or(true),
    })
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
