//! Client-side realtime sync core for the marketplace chat and livestream
//! surfaces.
//!
//! Two independently-arriving feeds (push events over the socket, pull
//! pages from the REST store) are merged into one consistent per-room view.
//! Push is purely a latency optimization: the store is the source of truth,
//! and the polling fallback heals anything push delivery misses.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use shared::{
    domain::{LivestreamId, MessageId, RoomId, UserId},
    protocol::{ChatMessage, LiveProduct, PushEnvelope, RoomSummary, TEXT_MESSAGE_TYPE},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod live;
pub mod normalize;
pub mod reconcile;
pub mod rooms;
pub mod store;
pub mod transport;

pub use live::ProductBoard;
pub use reconcile::MessageLog;
pub use rooms::RoomMembership;
pub use store::{DurableStore, RestStore};
pub use transport::{SocketSession, TransportError, TransportSession, TransportSignal};

/// Remote procedure fired after a durable send so other members see the
/// message without waiting for their pollers.
pub const NOTIFY_MESSAGE_METHOD: &str = "NotifyMessage";
pub const TYPING_METHOD: &str = "Typing";

const MESSAGE_EVENTS: &[&str] = &["receivemessage", "messagereceived", "newmessage"];
const TYPING_EVENTS: &[&str] = &["usertyping", "typing", "typingindicator"];
const PRODUCT_EVENTS: &[&str] = &[
    "productupdated",
    "productpinned",
    "stockchanged",
    "livestreamproductupdated",
];

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Polling fallback cadence for the active room.
    pub poll_interval: Duration,
    /// Page size pulled by the poller and the opening backfill.
    pub page_size: u32,
    /// How long [`ChatClient::start`] waits for the transport to come up.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            page_size: 50,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    MessagesUpdated {
        room_id: RoomId,
        messages: Vec<ChatMessage>,
    },
    TypingChanged {
        room_id: RoomId,
        user_id: UserId,
        is_typing: bool,
    },
    ProductsUpdated {
        livestream_id: LivestreamId,
        products: Vec<LiveProduct>,
    },
    ConnectionChanged {
        connected: bool,
    },
    /// The durable channel rejected a send. The provisional entry stays in
    /// the collection; the UI decides whether to mark or remove it.
    SendFailed {
        message_id: MessageId,
    },
    Error(String),
}

pub struct ChatClient {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn TransportSession>,
    rooms: RoomMembership,
    config: ClientConfig,
    own_user_id: UserId,
    inner: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

struct ClientState {
    log: Option<MessageLog>,
    board: Option<ProductBoard>,
    typing_users: HashSet<UserId>,
    poll_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

impl ChatClient {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn TransportSession>,
        own_user_id: UserId,
    ) -> Arc<Self> {
        Self::with_config(store, transport, own_user_id, ClientConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn TransportSession>,
        own_user_id: UserId,
        config: ClientConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            rooms: RoomMembership::new(Arc::clone(&transport)),
            store,
            transport,
            config,
            own_user_id,
            inner: Mutex::new(ClientState {
                log: None,
                board: None,
                typing_users: HashSet::new(),
                poll_task: None,
                pump_task: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Push transport status, for the UI connectivity indicator.
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Start the transport and the signal pump. Waits until the connection
    /// is up (or fails terminally) so callers can join rooms immediately
    /// after.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut signals = self.transport.subscribe();
        self.transport.ensure_started().await?;

        if !self.transport.is_connected() {
            let connected = tokio::time::timeout(self.config.connect_timeout, async {
                loop {
                    match signals.recv().await {
                        Ok(TransportSignal::Connected) | Ok(TransportSignal::Reconnected) => {
                            return Ok(())
                        }
                        Ok(TransportSignal::ConnectionLost) | Ok(TransportSignal::Closed) => {
                            return Err(anyhow!("transport failed to connect"))
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(anyhow!("transport signal channel closed"))
                        }
                    }
                }
            })
            .await;
            match connected {
                Ok(result) => result?,
                Err(_) => return Err(anyhow!("timed out waiting for transport connection")),
            }
        }

        let client = Arc::clone(self);
        let pump = tokio::spawn(async move {
            client.run_pump(signals).await;
        });
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.pump_task.replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    /// Open a room: join it over push, backfill from the store, and start
    /// the polling fallback. Any previously open room is left first.
    pub async fn open_room(self: &Arc<Self>, room_id: RoomId) -> Result<()> {
        let previous = {
            let mut inner = self.inner.lock().await;
            if let Some(task) = inner.poll_task.take() {
                task.abort();
            }
            inner.typing_users.clear();
            inner
                .log
                .replace(MessageLog::new(room_id.clone()))
                .map(|log| log.room_id().clone())
        };
        if let Some(previous) = previous {
            if previous != room_id {
                self.rooms.leave(&previous).await;
            }
        }

        if let Err(err) = self.rooms.join(&room_id).await {
            warn!(room_id = %room_id, "chat: push join failed; relying on polling: {err}");
        }

        self.refresh_room(&room_id).await?;
        self.spawn_poller(room_id).await;
        Ok(())
    }

    /// Close the active room: stop the poller, leave the push group, drop
    /// the collection.
    pub async fn close_room(&self) {
        let (task, room) = {
            let mut inner = self.inner.lock().await;
            inner.typing_users.clear();
            (
                inner.poll_task.take(),
                inner.log.take().map(|log| log.room_id().clone()),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(room) = room {
            self.rooms.leave(&room).await;
        }
    }

    /// Find or lazily create the direct room with `target_id`, then open it.
    /// Lookup runs twice before creating: a concurrent request may have
    /// created the room between our first miss and now, and duplicate rooms
    /// for the same pair must be avoided.
    pub async fn open_conversation(self: &Arc<Self>, target_id: &UserId) -> Result<RoomId> {
        for attempt in 0..2 {
            if let Some(room_id) = self.find_room_with(target_id).await? {
                if attempt > 0 {
                    debug!(room_id = %room_id, "chat: room appeared on re-query");
                }
                self.open_room(room_id.clone()).await?;
                return Ok(room_id);
            }
        }

        let room_id = match self.store.create_room(&self.own_user_id, target_id).await {
            Ok(room) => room.id,
            // Lost the creation race; the concurrently created room wins.
            Err(err) => match self.find_room_with(target_id).await? {
                Some(room_id) => room_id,
                None => return Err(err),
            },
        };
        self.open_room(room_id.clone()).await?;
        Ok(room_id)
    }

    /// Send a message with at-least-once durability: optimistic local
    /// append, durable REST submit, then a fire-and-forget push notify.
    /// The durable echo collapses onto the optimistic entry through the
    /// reconciliation engine's provisional→durable upgrade.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let room_id = self
            .active_room()
            .await
            .ok_or_else(|| anyhow!("no active room"))?;

        let now = Utc::now();
        let provisional = ChatMessage {
            id: MessageId::provisional(now),
            room_id: room_id.clone(),
            sender_id: self.own_user_id.clone(),
            content: content.to_string(),
            sent_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            is_read: false,
            is_edited: false,
            message_type: TEXT_MESSAGE_TYPE.to_string(),
            attachment_url: None,
            edited_at: None,
            sender_name: None,
            sender_avatar_url: None,
            is_mine: true,
        };
        let provisional_id = provisional.id.clone();
        self.merge_and_publish(&room_id, vec![provisional]).await;

        let stored = match self
            .store
            .send_message(&room_id, &self.own_user_id, content, TEXT_MESSAGE_TYPE)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                warn!(room_id = %room_id, "chat: durable send failed: {err}");
                let _ = self.events.send(ClientEvent::SendFailed {
                    message_id: provisional_id,
                });
                return Err(err);
            }
        };

        let durable = normalize::normalize_message(&stored, Some(&self.own_user_id), Utc::now());
        self.notify_push(&durable).await;
        self.merge_and_publish(&room_id, vec![durable]).await;
        Ok(())
    }

    /// Best-effort, push-only. A dead connection is not an error; typing
    /// state has no durability requirement.
    pub async fn set_typing(&self, is_typing: bool) -> Result<()> {
        let Some(room_id) = self.active_room().await else {
            return Ok(());
        };
        if !self.transport.is_connected() {
            return Ok(());
        }
        let args = json!({
            "roomId": room_id.as_str(),
            "userId": self.own_user_id.as_str(),
            "isTyping": is_typing,
        });
        if let Err(err) = self.transport.invoke(TYPING_METHOD, args).await {
            debug!(room_id = %room_id, "chat: typing notify failed: {err}");
        }
        Ok(())
    }

    /// Snapshot of the active room's collection: sorted, deduplicated.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        let inner = self.inner.lock().await;
        inner
            .log
            .as_ref()
            .map(|log| log.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn active_room(&self) -> Option<RoomId> {
        let inner = self.inner.lock().await;
        inner.log.as_ref().map(|log| log.room_id().clone())
    }

    pub async fn typing_users(&self) -> Vec<UserId> {
        let inner = self.inner.lock().await;
        inner.typing_users.iter().cloned().collect()
    }

    pub async fn rooms_for_user(&self) -> Result<Vec<RoomSummary>> {
        self.store.rooms_for_user(&self.own_user_id).await
    }

    /// Open a livestream: join its push group and pull the product board.
    pub async fn open_livestream(self: &Arc<Self>, livestream_id: LivestreamId) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.board = Some(ProductBoard::new(livestream_id.clone()));
        }
        let room_id = RoomId(livestream_id.0.clone());
        if let Err(err) = self.rooms.join(&room_id).await {
            warn!(livestream_id = %livestream_id, "live: push join failed; pull refresh only: {err}");
        }
        self.refresh_products().await
    }

    pub async fn close_livestream(&self) {
        let board = { self.inner.lock().await.board.take() };
        if let Some(board) = board {
            self.rooms
                .leave(&RoomId(board.livestream_id().0.clone()))
                .await;
        }
    }

    /// Pull the authoritative product list and reconcile it into the board.
    pub async fn refresh_products(&self) -> Result<()> {
        let livestream_id = {
            let inner = self.inner.lock().await;
            match inner.board.as_ref() {
                Some(board) => board.livestream_id().clone(),
                None => return Ok(()),
            }
        };
        let items = self.store.list_products(&livestream_id).await?;
        let candidates: Vec<LiveProduct> =
            items.iter().map(normalize::normalize_product).collect();

        let update = {
            let mut inner = self.inner.lock().await;
            let Some(board) = inner
                .board
                .as_mut()
                .filter(|board| board.livestream_id() == &livestream_id)
            else {
                return Ok(());
            };
            if !board.refresh(candidates) {
                return Ok(());
            }
            ClientEvent::ProductsUpdated {
                livestream_id: board.livestream_id().clone(),
                products: board.products().to_vec(),
            }
        };
        let _ = self.events.send(update);
        Ok(())
    }

    pub async fn products(&self) -> Vec<LiveProduct> {
        let inner = self.inner.lock().await;
        inner
            .board
            .as_ref()
            .map(|board| board.products().to_vec())
            .unwrap_or_default()
    }

    /// Tear down: stop the poller and pump, leave joined rooms, close the
    /// transport.
    pub async fn shutdown(&self) {
        let (pump, poll, room, board) = {
            let mut inner = self.inner.lock().await;
            (
                inner.pump_task.take(),
                inner.poll_task.take(),
                inner.log.take().map(|log| log.room_id().clone()),
                inner.board.take(),
            )
        };
        if let Some(task) = poll {
            task.abort();
        }
        if let Some(room) = room {
            self.rooms.leave(&room).await;
        }
        if let Some(board) = board {
            self.rooms
                .leave(&RoomId(board.livestream_id().0.clone()))
                .await;
        }
        if let Some(task) = pump {
            task.abort();
        }
        self.transport.disconnect().await;
    }

    async fn run_pump(self: Arc<Self>, mut signals: broadcast::Receiver<TransportSignal>) {
        loop {
            match signals.recv().await {
                Ok(TransportSignal::Push(envelope)) => self.handle_push(envelope).await,
                Ok(TransportSignal::Connected) => {
                    let _ = self
                        .events
                        .send(ClientEvent::ConnectionChanged { connected: true });
                }
                Ok(TransportSignal::Reconnected) => {
                    info!("chat: reconnected; rejoining rooms and refreshing");
                    let rejoined = self.rooms.rejoin_all().await;
                    debug!(rejoined, "chat: rejoin complete");
                    if let Err(err) = self.refresh_active_room().await {
                        warn!("chat: post-reconnect refresh failed: {err}");
                        let _ = self
                            .events
                            .send(ClientEvent::Error(format!(
                                "refresh after reconnect failed: {err}"
                            )));
                    }
                    if let Err(err) = self.refresh_products().await {
                        warn!("chat: post-reconnect product refresh failed: {err}");
                    }
                    let _ = self
                        .events
                        .send(ClientEvent::ConnectionChanged { connected: true });
                }
                Ok(TransportSignal::Reconnecting { attempt }) => {
                    debug!(attempt, "chat: transport reconnecting");
                    let _ = self
                        .events
                        .send(ClientEvent::ConnectionChanged { connected: false });
                }
                Ok(TransportSignal::Closed) => {
                    let _ = self
                        .events
                        .send(ClientEvent::ConnectionChanged { connected: false });
                }
                Ok(TransportSignal::ConnectionLost) => {
                    warn!("chat: realtime connection lost after repeated reconnect failures");
                    let _ = self
                        .events
                        .send(ClientEvent::ConnectionChanged { connected: false });
                    let _ = self.events.send(ClientEvent::Error(
                        "realtime connection lost; messages continue via polling".to_string(),
                    ));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat: dropped transport signals; poller will heal");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_push(&self, envelope: PushEnvelope) {
        let event = envelope.event.to_ascii_lowercase();
        if MESSAGE_EVENTS.contains(&event.as_str()) {
            self.apply_message_candidate(&envelope.payload).await;
        } else if TYPING_EVENTS.contains(&event.as_str()) {
            self.apply_typing(&envelope.payload).await;
        } else if PRODUCT_EVENTS.contains(&event.as_str()) {
            self.apply_product_candidate(&envelope.payload).await;
        } else {
            debug!(event = %envelope.event, "chat: ignoring unhandled push event");
        }
    }

    async fn apply_message_candidate(&self, payload: &Value) {
        let message = normalize::normalize_message(payload, Some(&self.own_user_id), Utc::now());
        let room_id = message.room_id.clone();
        self.merge_and_publish(&room_id, vec![message]).await;
    }

    async fn apply_typing(&self, payload: &Value) {
        let Some(notice) = normalize::normalize_typing(payload) else {
            debug!("chat: typing payload missing room or user");
            return;
        };
        if notice.user_id == self.own_user_id {
            return;
        }
        let changed = {
            let mut inner = self.inner.lock().await;
            let active = inner.log.as_ref().map(|log| log.room_id().clone());
            if active.as_ref() != Some(&notice.room_id) {
                false
            } else if notice.is_typing {
                inner.typing_users.insert(notice.user_id.clone())
            } else {
                inner.typing_users.remove(&notice.user_id)
            }
        };
        if changed {
            let _ = self.events.send(ClientEvent::TypingChanged {
                room_id: notice.room_id,
                user_id: notice.user_id,
                is_typing: notice.is_typing,
            });
        }
    }

    async fn apply_product_candidate(&self, payload: &Value) {
        let candidate = normalize::normalize_product(payload);
        let update = {
            let mut inner = self.inner.lock().await;
            let Some(board) = inner.board.as_mut() else {
                return;
            };
            if !board.apply(candidate) {
                return;
            }
            ClientEvent::ProductsUpdated {
                livestream_id: board.livestream_id().clone(),
                products: board.products().to_vec(),
            }
        };
        let _ = self.events.send(update);
    }

    /// Merge candidates into the active room's log, publishing an update
    /// when the collection changed. Candidates for any other room (or with
    /// no room open) are dropped by the log itself.
    async fn merge_and_publish(&self, room_id: &RoomId, candidates: Vec<ChatMessage>) {
        let update = {
            let mut inner = self.inner.lock().await;
            let Some(log) = inner.log.as_mut().filter(|log| log.room_id() == room_id) else {
                debug!(room_id = %room_id, "chat: candidate for inactive room dropped");
                return;
            };
            if !log.merge_all(candidates) {
                return;
            }
            ClientEvent::MessagesUpdated {
                room_id: log.room_id().clone(),
                messages: log.messages().to_vec(),
            }
        };
        let _ = self.events.send(update);
    }

    /// Pull one page from the store and reconcile it. The active room is
    /// re-checked after the pull returns; a room switched away from mid-pull
    /// must not receive the stale result.
    async fn refresh_room(&self, room_id: &RoomId) -> Result<()> {
        let page = self
            .store
            .list_messages(room_id, 1, self.config.page_size)
            .await?;
        let now = Utc::now();
        let candidates: Vec<ChatMessage> = page
            .items
            .iter()
            .map(|raw| normalize::normalize_message(raw, Some(&self.own_user_id), now))
            .collect();
        self.merge_and_publish(room_id, candidates).await;
        Ok(())
    }

    async fn refresh_active_room(&self) -> Result<()> {
        match self.active_room().await {
            Some(room_id) => self.refresh_room(&room_id).await,
            None => Ok(()),
        }
    }

    async fn spawn_poller(self: &Arc<Self>, room_id: RoomId) {
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(client.config.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the opening backfill
            // already covered it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let still_active = {
                    let inner = client.inner.lock().await;
                    inner
                        .log
                        .as_ref()
                        .is_some_and(|log| log.room_id() == &room_id)
                };
                if !still_active {
                    break;
                }
                if let Err(err) = client.refresh_room(&room_id).await {
                    warn!(room_id = %room_id, "chat: poll refresh failed: {err}");
                }
            }
        });
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.poll_task.replace(task) {
            previous.abort();
        }
    }

    async fn find_room_with(&self, target_id: &UserId) -> Result<Option<RoomId>> {
        let rooms = self.store.rooms_for_user(&self.own_user_id).await?;
        Ok(rooms
            .into_iter()
            .find(|room| room.peer_id.as_ref() == Some(target_id))
            .map(|room| room.id))
    }

    async fn notify_push(&self, message: &ChatMessage) {
        if !self.transport.is_connected() {
            return;
        }
        match serde_json::to_value(message) {
            Ok(payload) => {
                if let Err(err) = self.transport.invoke(NOTIFY_MESSAGE_METHOD, payload).await {
                    warn!("chat: push notify failed after durable send: {err}");
                }
            }
            Err(err) => warn!("chat: failed to encode push notification: {err}"),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
