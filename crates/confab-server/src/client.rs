use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use confab_protocol::ServerMessage;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::Session;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Unique connection identifier, used for log correlation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clone-able outbound handle for one connection.
///
/// Sends never block: a full queue drops the message with a warning,
/// a closed queue (connection already gone) drops it silently. Members
/// of a conversation hold clones of this, so fan-out to a slow or dead
/// peer cannot stall a handler.
#[derive(Clone, Debug)]
pub struct ClientSender {
    id: ClientId,
    tx: mpsc::Sender<String>,
}

impl ClientSender {
    /// Create a sender plus the receiving half consumed by the writer
    /// task of the connection pump.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: ClientId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn send(&self, message: &ServerMessage) {
        let Ok(json) = serde_json::to_string(message) else {
            return;
        };
        match self.tx.try_send(json) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %self.id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Run the WebSocket pump for one connection: a writer task forwards
/// queued outbound messages and heartbeat pings, while this task reads
/// inbound frames into the session. Returns once the peer goes away,
/// after session teardown.
pub async fn run_connection(
    socket: WebSocket,
    session: Arc<Session>,
    mut rx: mpsc::Receiver<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => session.handle_frame(&text),
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => {} // axum answers pings itself
            _ => {}
        }
    }

    session.close();
    writer.abort();
    tracing::info!(client_id = %session.id(), "WebSocket client disconnected");
}
