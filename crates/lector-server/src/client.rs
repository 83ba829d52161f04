use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use lector_core::ids::SessionId;
use lector_core::protocol::OutboundMessage;

use crate::session::{Flow, Session};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames queued for a client's writer task.
#[derive(Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Flush what is queued, then close the socket.
    Close,
}

/// A connected websocket client.
pub struct Client {
    pub id: SessionId,
    tx: mpsc::Sender<Outbound>,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: SessionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of all connected websocket clients, keyed by session.
pub struct ClientRegistry {
    clients: DashMap<SessionId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and return its id and outbound queue.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Outbound>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn unregister(&self, id: &SessionId) {
        self.clients.remove(id);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a frame for a client. Returns false if the client is gone or
    /// its queue is full; the frame is dropped either way.
    pub fn send_to(&self, id: &SessionId, frame: Outbound) -> bool {
        let Some(client) = self.get(id) else {
            return false;
        };
        match client.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %id, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Remove clients that haven't answered pings within the timeout.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<SessionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            info!(session_id = %id, "cleaned up dead client");
        }
        dead.len()
    }
}

/// Sends protocol messages to one client through the registry. Once the
/// client has disconnected, messages are dropped.
#[derive(Clone)]
pub struct Outbox {
    registry: Arc<ClientRegistry>,
    id: SessionId,
}

impl Outbox {
    pub fn new(registry: Arc<ClientRegistry>, id: SessionId) -> Self {
        Self { registry, id }
    }

    pub fn send(&self, message: &OutboundMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to serialize outbound message");
                return false;
            }
        };
        let sent = self.registry.send_to(&self.id, Outbound::Text(text));
        if !sent {
            debug!(session_id = %self.id, "outbound message dropped, client gone");
        }
        sent
    }

    pub fn close(&self) {
        self.registry.send_to(&self.id, Outbound::Close);
    }
}

/// Drive one websocket: a writer task drains the outbound queue and pings,
/// while inbound text frames are fed to the session one at a time.
pub async fn handle_ws_connection(
    socket: WebSocket,
    mut session: Session,
    mut rx: mpsc::Receiver<Outbound>,
    registry: Arc<ClientRegistry>,
) {
    let session_id = session.id().clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_id = session_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    trace!(session_id = %writer_id, "sent ping");
                }
            }
        }
    });

    let reader_registry = Arc::clone(&registry);
    let reader = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if session.handle_text(text.as_str()).await == Flow::Close {
                        return Flow::Close;
                    }
                }
                WsMessage::Binary(_) => {
                    if session.handle_binary() == Flow::Close {
                        return Flow::Close;
                    }
                }
                WsMessage::Pong(_) => {
                    if let Some(client) = reader_registry.get(&session_id) {
                        client.record_pong();
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        Flow::Continue
    };

    tokio::select! {
        flow = reader => {
            if flow == Flow::Close {
                // The session queued its final frames and a close; let the
                // writer flush them.
                if tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, &mut writer).await.is_err() {
                    writer.abort();
                }
            } else {
                writer.abort();
            }
        }
        _ = &mut writer => {}
    }

    registry.unregister(&session_id);
    info!(session_id = %session_id, "client disconnected");
}

/// Periodically remove clients that stopped answering pings.
pub fn start_cleanup_task(registry: Arc<ClientRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                info!(removed, "dead client cleanup");
            }
        }
    })
}
