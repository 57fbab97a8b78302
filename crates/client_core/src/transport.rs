//! Push transport session: one persistent duplex connection to the realtime
//! gateway, with automatic reconnect and broadcast fan-out of everything the
//! gateway delivers. The gateway provides no replay and no ordering across
//! reconnects; the polling fallback compensates.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::{domain::UserId, protocol::PushEnvelope};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Backoff ladder walked on every disconnection, one attempt per rung.
/// Exhausting it surfaces a terminal [`TransportSignal::ConnectionLost`]
/// instead of retrying forever.
const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];
const SIGNAL_CHANNEL_CAPACITY: usize = 1024;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

const EVENT_NAME_KEYS: [&str; 4] = ["target", "event", "type", "name"];
const PAYLOAD_KEYS: [&str; 4] = ["arguments", "payload", "data", "body"];

#[derive(Debug, Clone)]
pub enum TransportSignal {
    Connected,
    Reconnecting { attempt: u32 },
    Reconnected,
    Closed,
    ConnectionLost,
    Push(PushEnvelope),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport send queue is closed")]
    QueueClosed,
    #[error("unsupported server url scheme: {0}")]
    UnsupportedScheme(String),
}

#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Start the session if it is not already running. Idempotent; returns
    /// before the connection is established.
    async fn ensure_started(&self) -> Result<()>;
    /// Fire a remote procedure over the push channel.
    async fn invoke(&self, method: &str, args: Value) -> Result<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn subscribe(&self) -> broadcast::Receiver<TransportSignal>;
}

/// WebSocket-backed [`TransportSession`]. A single driver task owns the
/// socket; invocations are queued to it over an mpsc channel.
pub struct SocketSession {
    ws_url: String,
    signals: broadcast::Sender<TransportSignal>,
    outbound: mpsc::Sender<String>,
    outbound_rx: Mutex<Option<mpsc::Receiver<String>>>,
    connected: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SocketSession {
    pub fn new(
        server_url: &str,
        user_id: &UserId,
        access_token: Option<&str>,
    ) -> Result<Arc<Self>> {
        let ws_url = ws_url_from_server(server_url, user_id, access_token)?;
        let (signals, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            ws_url,
            signals,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            connected: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        }))
    }
}

#[async_trait]
impl TransportSession for SocketSession {
    async fn ensure_started(&self) -> Result<()> {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return Ok(());
        }
        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("transport session already stopped"))?;
        info!(url = %self.ws_url, "transport: starting session");
        *driver = Some(tokio::spawn(run_driver(
            self.ws_url.clone(),
            self.signals.clone(),
            Arc::clone(&self.connected),
            outbound_rx,
        )));
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let frame = serde_json::to_string(&json!({
            "target": method,
            "arguments": [args],
        }))?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::QueueClosed)?;
        Ok(())
    }

    async fn disconnect(&self) {
        let driver = self.driver.lock().await.take();
        let was_running = driver.is_some();
        if let Some(driver) = driver {
            driver.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        if was_running {
            let _ = self.signals.send(TransportSignal::Closed);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportSignal> {
        self.signals.subscribe()
    }
}

async fn run_driver(
    ws_url: String,
    signals: broadcast::Sender<TransportSignal>,
    connected: Arc<AtomicBool>,
    mut outbound: mpsc::Receiver<String>,
) {
    let mut first_connect = true;
    loop {
        let mut ws = None;
        for (attempt, delay) in RECONNECT_DELAYS.iter().enumerate() {
            if !first_connect || attempt > 0 {
                let _ = signals.send(TransportSignal::Reconnecting {
                    attempt: attempt as u32 + 1,
                });
            }
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            match connect_async(ws_url.as_str()).await {
                Ok((stream, _)) => {
                    ws = Some(stream);
                    break;
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, "transport: connect failed: {err}");
                }
            }
        }
        let Some(ws) = ws else {
            connected.store(false, Ordering::SeqCst);
            warn!("transport: reconnect attempts exhausted; connection lost");
            let _ = signals.send(TransportSignal::ConnectionLost);
            return;
        };

        connected.store(true, Ordering::SeqCst);
        let _ = signals.send(if first_connect {
            TransportSignal::Connected
        } else {
            TransportSignal::Reconnected
        });
        first_connect = false;

        let (mut sink, mut reader) = ws.split();
        loop {
            tokio::select! {
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => match decode_envelope(&text) {
                        Some(envelope) => {
                            let _ = signals.send(TransportSignal::Push(envelope));
                        }
                        None => debug!("transport: ignoring undecodable frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("transport: receive failed: {err}");
                        break;
                    }
                },
                command = outbound.recv() => match command {
                    Some(frame) => {
                        if let Err(err) = sink.send(Message::Text(frame)).await {
                            warn!("transport: send failed: {err}");
                            break;
                        }
                    }
                    // All senders dropped: the owning session is gone.
                    None => {
                        connected.store(false, Ordering::SeqCst);
                        let _ = signals.send(TransportSignal::Closed);
                        return;
                    }
                },
            }
        }
        connected.store(false, Ordering::SeqCst);
    }
}

/// Decode a raw frame into an envelope. Event-name and payload keys vary by
/// emitter; hub-style frames carry the payload as a single-element
/// `arguments` array, which is unwrapped here.
pub(crate) fn decode_envelope(text: &str) -> Option<PushEnvelope> {
    let value: Value = serde_json::from_str(text).ok()?;
    let event = EVENT_NAME_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)?;
    let payload = PAYLOAD_KEYS
        .iter()
        .find_map(|key| value.get(*key))
        .cloned()
        .unwrap_or(Value::Null);
    let payload = match payload {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    Some(PushEnvelope { event, payload })
}

fn ws_url_from_server(
    server_url: &str,
    user_id: &UserId,
    access_token: Option<&str>,
) -> Result<String> {
    let mut url = Url::parse(server_url).context("invalid server url")?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::UnsupportedScheme(other.to_string()).into()),
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::UnsupportedScheme(scheme.to_string()))?;
    url.set_path("/hub/chat");
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("userId", user_id.as_str());
        if let Some(token) = access_token {
            query.append_pair("access_token", token);
        }
    }
    Ok(url.to_string())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
