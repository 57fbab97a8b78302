use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::*;
use crate::transport::TransportSignal;

struct RecordingTransport {
    connected: AtomicBool,
    fail_invokes: AtomicBool,
    invocations: Mutex<Vec<(String, Value)>>,
    signals: broadcast::Sender<TransportSignal>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        let (signals, _) = broadcast::channel(64);
        Arc::new(Self {
            connected: AtomicBool::new(true),
            fail_invokes: AtomicBool::new(false),
            invocations: Mutex::new(Vec::new()),
            signals,
        })
    }

    async fn count_named(&self, method: &str) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == method)
            .count()
    }
}

#[async_trait]
impl TransportSession for RecordingTransport {
    async fn ensure_started(&self) -> Result<()> {
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<()> {
        if self.fail_invokes.load(Ordering::SeqCst) {
            return Err(anyhow!("gateway unavailable"));
        }
        self.invocations
            .lock()
            .await
            .push((method.to_string(), args));
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportSignal> {
        self.signals.subscribe()
    }
}

fn room(id: &str) -> shared::domain::RoomId {
    shared::domain::RoomId::new(id)
}

#[tokio::test]
async fn join_is_idempotent() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.join(&room("r1")).await.expect("first join");
    rooms.join(&room("r1")).await.expect("second join");

    assert_eq!(transport.count_named(JOIN_ROOM_METHOD).await, 1);
    assert!(rooms.is_joined(&room("r1")).await);
}

#[tokio::test]
async fn rejoin_all_reissues_join_once_per_joined_room() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.join(&room("r1")).await.expect("join r1");
    rooms.join(&room("r2")).await.expect("join r2");

    let rejoined = rooms.rejoin_all().await;

    assert_eq!(rejoined, 2);
    // One initial join plus one rejoin per room, never more.
    assert_eq!(transport.count_named(JOIN_ROOM_METHOD).await, 4);
    assert!(rooms.is_joined(&room("r1")).await);
    assert!(rooms.is_joined(&room("r2")).await);
}

#[tokio::test]
async fn failed_join_leaves_room_unjoined_and_retryable() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    transport.fail_invokes.store(true, Ordering::SeqCst);
    rooms.join(&room("r1")).await.expect_err("join must fail");
    assert!(!rooms.is_joined(&room("r1")).await);

    transport.fail_invokes.store(false, Ordering::SeqCst);
    rooms.join(&room("r1")).await.expect("retry succeeds");
    assert!(rooms.is_joined(&room("r1")).await);
}

#[tokio::test]
async fn leave_clears_state_even_when_gateway_rejects() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.join(&room("r1")).await.expect("join");
    transport.fail_invokes.store(true, Ordering::SeqCst);

    rooms.leave(&room("r1")).await;

    assert!(!rooms.is_joined(&room("r1")).await);
}

#[tokio::test]
async fn leave_skips_gateway_when_disconnected() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.join(&room("r1")).await.expect("join");
    transport.connected.store(false, Ordering::SeqCst);

    rooms.leave(&room("r1")).await;

    assert!(!rooms.is_joined(&room("r1")).await);
    assert_eq!(transport.count_named(LEAVE_ROOM_METHOD).await, 0);
}

#[tokio::test]
async fn leave_of_untracked_room_is_a_noop() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.leave(&room("never-joined")).await;

    assert_eq!(transport.count_named(LEAVE_ROOM_METHOD).await, 0);
}

#[tokio::test]
async fn failed_rejoin_demotes_room() {
    let transport = RecordingTransport::new();
    let rooms = RoomMembership::new(transport.clone());

    rooms.join(&room("r1")).await.expect("join");
    transport.fail_invokes.store(true, Ordering::SeqCst);

    let rejoined = rooms.rejoin_all().await;

    assert_eq!(rejoined, 0);
    assert!(!rooms.is_joined(&room("r1")).await);
}
