//! Durable store access: the pull channel and source of truth.
//!
//! Message and product payloads come back as raw [`Value`]s so pull traffic
//! funnels through the same normalizer as push events.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{LivestreamId, RoomId, UserId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{Paged, RoomSummary},
};

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn rooms_for_user(&self, user_id: &UserId) -> Result<Vec<RoomSummary>>;
    async fn create_room(&self, user_id: &UserId, target_id: &UserId) -> Result<RoomSummary>;
    async fn list_messages(
        &self,
        room_id: &RoomId,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Value>>;
    /// Persist a message. Returning success means the store holds it and
    /// will broadcast it to the room's members through push.
    async fn send_message(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
        message_type: &str,
    ) -> Result<Value>;
    async fn list_products(&self, livestream_id: &LivestreamId) -> Result<Vec<Value>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    sender_id: &'a str,
    content: &'a str,
    message_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomBody<'a> {
    user_id: &'a str,
    target_user_id: &'a str,
}

pub struct RestStore {
    http: Client,
    base_url: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl DurableStore for RestStore {
    async fn rooms_for_user(&self, user_id: &UserId) -> Result<Vec<RoomSummary>> {
        let response = self
            .http
            .get(format!("{}/api/chat/rooms", self.base_url))
            .query(&[("userId", user_id.as_str())])
            .send()
            .await?;
        decode(response).await
    }

    async fn create_room(&self, user_id: &UserId, target_id: &UserId) -> Result<RoomSummary> {
        let response = self
            .http
            .post(format!("{}/api/chat/rooms", self.base_url))
            .json(&CreateRoomBody {
                user_id: user_id.as_str(),
                target_user_id: target_id.as_str(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn list_messages(
        &self,
        room_id: &RoomId,
        page: u32,
        page_size: u32,
    ) -> Result<Paged<Value>> {
        let response = self
            .http
            .get(format!(
                "{}/api/chat/rooms/{}/messages",
                self.base_url,
                room_id.as_str()
            ))
            .query(&[("page", page.to_string()), ("pageSize", page_size.to_string())])
            .send()
            .await?;
        decode(response).await
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        sender_id: &UserId,
        content: &str,
        message_type: &str,
    ) -> Result<Value> {
        let response = self
            .http
            .post(format!(
                "{}/api/chat/rooms/{}/messages",
                self.base_url,
                room_id.as_str()
            ))
            .json(&SendMessageBody {
                sender_id: sender_id.as_str(),
                content,
                message_type,
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn list_products(&self, livestream_id: &LivestreamId) -> Result<Vec<Value>> {
        let response = self
            .http
            .get(format!(
                "{}/api/livestreams/{}/products",
                self.base_url,
                livestream_id.as_str()
            ))
            .send()
            .await?;
        decode(response).await
    }
}

/// Decode a success body, or turn a failure into an [`ApiException`],
/// preferring the server's structured error body when it sent one.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let exception = serde_json::from_str::<ApiError>(&body)
        .map(ApiException::from)
        .unwrap_or_else(|_| {
            let message = if body.is_empty() {
                status.to_string()
            } else {
                body
            };
            ApiException::new(code_for_status(status), message)
        });
    Err(exception.into())
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        status if status.is_client_error() => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}
