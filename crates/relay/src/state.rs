// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{DirectionEvent, GyroEvent, RelayEvent};

pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Unclassified,
    /// The game. At most one client holds the primary slot.
    Primary,
    /// A phone sending direction or gyro data.
    Secondary,
}

impl ClientRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclassified => "unclassified",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared view of one connected client.
///
/// The socket and its frame buffer are owned by the session task; other
/// tasks reach the peer only through the outbound queue.
pub struct ClientHandle {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    /// Child of the server shutdown token.
    pub cancel: CancellationToken,
    role: Mutex<ClientRole>,
    outbound: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn role(&self) -> ClientRole {
        *self.role.lock()
    }

    pub fn set_role(&self, role: ClientRole) {
        *self.role.lock() = role;
    }

    /// Promote an unclassified client to secondary. Other roles are kept.
    pub fn classify_secondary(&self) -> bool {
        let mut role = self.role.lock();
        if *role == ClientRole::Unclassified {
            *role = ClientRole::Secondary;
            true
        } else {
            false
        }
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }

    /// Queue a text payload for the session to frame and write.
    ///
    /// Returns false if the session is gone or its queue is full.
    pub fn send(&self, text: String) -> bool {
        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = self.id, "outbound queue full, dropping payload");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("role", &self.role())
            .finish()
    }
}

/// Process-wide relay state.
pub struct ServerState {
    clients: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
    primary: RwLock<Option<Arc<ClientHandle>>>,
    last_direction: Mutex<Option<DirectionEvent>>,
    last_gyro: Mutex<Option<GyroEvent>>,
    event_tx: broadcast::Sender<RelayEvent>,
    next_id: AtomicU64,
    outbound_capacity: usize,
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(outbound_capacity: usize, shutdown: CancellationToken) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            clients: RwLock::new(HashMap::new()),
            primary: RwLock::new(None),
            last_direction: Mutex::new(None),
            last_gyro: Mutex::new(None),
            event_tx,
            next_id: AtomicU64::new(1),
            outbound_capacity: outbound_capacity.max(1),
            shutdown,
        }
    }

    /// Register a freshly accepted connection. The returned receiver is the
    /// session's outbound queue.
    pub async fn register(&self, addr: SocketAddr) -> (Arc<ClientHandle>, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(self.outbound_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(ClientHandle {
            id,
            addr,
            connected_at: Instant::now(),
            cancel: self.shutdown.child_token(),
            role: Mutex::new(ClientRole::Unclassified),
            outbound,
        });
        self.clients.write().await.insert(id, Arc::clone(&client));
        self.emit(RelayEvent::ClientConnected { client_id: id, addr });
        (client, rx)
    }

    /// Drop a client, vacating the primary slot if it held it.
    pub async fn remove(&self, id: ClientId) -> Option<Arc<ClientHandle>> {
        let removed = self.clients.write().await.remove(&id);
        let mut primary = self.primary.write().await;
        if primary.as_ref().is_some_and(|p| p.id == id) {
            *primary = None;
            debug!(client_id = id, "primary slot cleared");
        }
        drop(primary);
        if removed.is_some() {
            self.emit(RelayEvent::ClientDisconnected { client_id: id });
        }
        removed
    }

    pub async fn client(&self, id: ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.read().await.get(&id).cloned()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Install `client` as primary, returning the client it displaced.
    /// The displaced client stays connected but loses the primary role.
    pub async fn set_primary(&self, client: &Arc<ClientHandle>) -> Option<Arc<ClientHandle>> {
        client.set_role(ClientRole::Primary);
        let previous = self.primary.write().await.replace(Arc::clone(client));
        let previous = previous.filter(|p| p.id != client.id);
        if let Some(ref p) = previous {
            p.set_role(ClientRole::Unclassified);
        }
        previous
    }

    /// Current primary, if one is registered and its session is still open.
    pub async fn primary(&self) -> Option<Arc<ClientHandle>> {
        self.primary.read().await.as_ref().filter(|p| p.is_open()).cloned()
    }

    /// Queue `text` for every open client holding `role`. Returns the number
    /// of clients it was queued for.
    pub async fn send_to_role(&self, role: ClientRole, text: &str) -> usize {
        let clients = self.clients.read().await;
        clients
            .values()
            .filter(|c| c.role() == role && c.is_open())
            .filter(|c| c.send(text.to_owned()))
            .count()
    }

    /// Cancel every client session and forget all clients. Returns how many
    /// were still registered.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.clients.write().await.drain().collect();
        *self.primary.write().await = None;
        for (_, client) in &drained {
            client.cancel.cancel();
        }
        drained.len()
    }

    pub fn set_last_direction(&self, event: DirectionEvent) {
        *self.last_direction.lock() = Some(event);
    }

    pub fn last_direction(&self) -> Option<DirectionEvent> {
        self.last_direction.lock().clone()
    }

    pub fn set_last_gyro(&self, event: GyroEvent) {
        *self.last_gyro.lock() = Some(event);
    }

    pub fn last_gyro(&self) -> Option<GyroEvent> {
        self.last_gyro.lock().clone()
    }

    pub fn emit(&self, event: RelayEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
