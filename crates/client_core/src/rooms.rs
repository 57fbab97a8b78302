//! Room membership tracking.
//!
//! The gateway drops group membership with the socket, so every reconnect
//! must re-issue joins for the rooms that were joined at disconnect time;
//! skipping that silently stops delivery with no visible error.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use shared::domain::RoomId;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::transport::TransportSession;

pub const JOIN_ROOM_METHOD: &str = "JoinRoom";
pub const LEAVE_ROOM_METHOD: &str = "LeaveRoom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoomState {
    Joining,
    Joined,
}

pub struct RoomMembership {
    transport: Arc<dyn TransportSession>,
    rooms: Mutex<HashMap<RoomId, RoomState>>,
}

impl RoomMembership {
    pub fn new(transport: Arc<dyn TransportSession>) -> Self {
        Self {
            transport,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotent join: a room already joined (or mid-join) is left alone.
    /// On failure the room reverts to not-joined and the caller may retry.
    pub async fn join(&self, room_id: &RoomId) -> Result<()> {
        {
            let mut rooms = self.rooms.lock().await;
            if rooms.contains_key(room_id) {
                return Ok(());
            }
            rooms.insert(room_id.clone(), RoomState::Joining);
        }

        match self
            .transport
            .invoke(JOIN_ROOM_METHOD, json!(room_id.as_str()))
            .await
        {
            Ok(()) => {
                self.rooms
                    .lock()
                    .await
                    .insert(room_id.clone(), RoomState::Joined);
                info!(room_id = %room_id, "rooms: joined");
                Ok(())
            }
            Err(err) => {
                self.rooms.lock().await.remove(room_id);
                Err(err)
            }
        }
    }

    /// Best-effort leave: local state is cleared even when the gateway is
    /// unreachable; a dead connection must not block leaving.
    pub async fn leave(&self, room_id: &RoomId) {
        let was_tracked = self.rooms.lock().await.remove(room_id).is_some();
        if !was_tracked {
            return;
        }
        if self.transport.is_connected() {
            if let Err(err) = self
                .transport
                .invoke(LEAVE_ROOM_METHOD, json!(room_id.as_str()))
                .await
            {
                warn!(room_id = %room_id, "rooms: leave notification failed: {err}");
            }
        }
    }

    /// Re-issue joins after a reconnect. Rooms that fail to rejoin are
    /// demoted to not-joined; the polling fallback covers them until a
    /// later join succeeds. Returns how many rooms rejoined.
    pub async fn rejoin_all(&self) -> usize {
        let joined: Vec<RoomId> = {
            let rooms = self.rooms.lock().await;
            rooms
                .iter()
                .filter(|(_, state)| **state == RoomState::Joined)
                .map(|(room_id, _)| room_id.clone())
                .collect()
        };

        let mut rejoined = 0;
        for room_id in joined {
            match self
                .transport
                .invoke(JOIN_ROOM_METHOD, json!(room_id.as_str()))
                .await
            {
                Ok(()) => rejoined += 1,
                Err(err) => {
                    warn!(room_id = %room_id, "rooms: rejoin failed: {err}");
                    self.rooms.lock().await.remove(&room_id);
                }
            }
        }
        rejoined
    }

    pub async fn is_joined(&self, room_id: &RoomId) -> bool {
        matches!(
            self.rooms.lock().await.get(room_id),
            Some(RoomState::Joined)
        )
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
