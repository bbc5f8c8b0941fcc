use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

use crate::net::protocol::ServerMessage;

/// Per-connection volatile queue depth. Movement updates beyond this are dropped.
pub const VOLATILE_QUEUE: usize = 32;

/// Identifier of one live realtime connection. Ephemeral: a reconnect gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Items on the reliable lane
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Message(ServerMessage),
    /// Flush what is queued, then close the connection
    Close { reason: String },
}

/// Result of a best-effort send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatileSend {
    Sent,
    /// Queue full, message discarded
    Dropped,
    /// Writer task is gone
    Closed,
}

/// Server-side handle for pushing events to one connection.
///
/// The reliable lane is unbounded and ordered; the volatile lane is a small
/// bounded queue that sheds load instead of blocking the world.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    reliable: mpsc::UnboundedSender<Outgoing>,
    volatile: mpsc::Sender<ServerMessage>,
}

/// Receiving halves drained by the transport writer
#[derive(Debug)]
pub struct ConnectionReceivers {
    pub reliable: mpsc::UnboundedReceiver<Outgoing>,
    pub volatile: mpsc::Receiver<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle and the receivers its writer task drains
    pub fn channel() -> (Self, ConnectionReceivers) {
        Self::with_capacity(VOLATILE_QUEUE)
    }

    pub fn with_capacity(volatile_capacity: usize) -> (Self, ConnectionReceivers) {
        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
        let (volatile_tx, volatile_rx) = mpsc::channel(volatile_capacity.max(1));
        let handle = Self {
            reliable: reliable_tx,
            volatile: volatile_tx,
        };
        let receivers = ConnectionReceivers {
            reliable: reliable_rx,
            volatile: volatile_rx,
        };
        (handle, receivers)
    }

    /// Queue a message for guaranteed, ordered delivery.
    /// Returns false once the connection's writer has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.reliable.send(Outgoing::Message(message)).is_ok()
    }

    /// Best-effort send that never waits
    pub fn send_volatile(&self, message: ServerMessage) -> VolatileSend {
        match self.volatile.try_send(message) {
            Ok(()) => VolatileSend::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => VolatileSend::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => VolatileSend::Closed,
        }
    }

    /// Ask the writer to close the connection after flushing the reliable lane
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.reliable.send(Outgoing::Close {
            reason: reason.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.reliable.is_closed()
    }
}

/// Live connections, queried by id. A missing id is a normal outcome.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Register a handle under a fresh random id
    pub fn insert(&mut self, handle: ConnectionHandle) -> ConnectionId {
        // Generate random connection ID (avoid collisions)
        let id = loop {
            let candidate = ConnectionId(rand::random::<u64>());
            if !self.connections.contains_key(&candidate) {
                break candidate;
            }
        };
        self.connections.insert(id, handle);
        id
    }

    /// Get a connection by ID
    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionHandle> {
        self.connections.get(&id)
    }

    /// Remove a connection
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Get connection count
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Get all connection IDs
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &ConnectionHandle)> {
        self.connections.iter().map(|(id, handle)| (*id, handle))
    }

    /// Remove and return every connection
    pub fn drain(&mut self) -> Vec<(ConnectionId, ConnectionHandle)> {
        self.connections.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_insert_unique_ids() {
        let mut registry = ConnectionRegistry::new();
        let (a, _ra) = ConnectionHandle::channel();
        let (b, _rb) = ConnectionHandle::channel();

        let id1 = registry.insert(a);
        let id2 = registry.insert(b);

        assert_ne!(id1, id2);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(id1));
    }

    #[test]
    fn test_registry_missing_id_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.get(ConnectionId(12345)).is_none());
    }

    #[test]
    fn test_registry_remove_and_drain() {
        let mut registry = ConnectionRegistry::new();
        let (a, _ra) = ConnectionHandle::channel();
        let (b, _rb) = ConnectionHandle::channel();
        let id = registry.insert(a);
        registry.insert(b);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert_eq!(registry.drain().len(), 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_reliable_lane_is_ordered() {
        let (handle, mut rx) = ConnectionHandle::channel();
        assert!(handle.send(ServerMessage::PlayerLeft(ConnectionId(1))));
        assert!(handle.send(ServerMessage::PlayerLeft(ConnectionId(2))));
        handle.close("bye");

        assert_eq!(
            rx.reliable.try_recv().unwrap(),
            Outgoing::Message(ServerMessage::PlayerLeft(ConnectionId(1)))
        );
        assert_eq!(
            rx.reliable.try_recv().unwrap(),
            Outgoing::Message(ServerMessage::PlayerLeft(ConnectionId(2)))
        );
        assert_eq!(
            rx.reliable.try_recv().unwrap(),
            Outgoing::Close {
                reason: "bye".into()
            }
        );
    }

    #[test]
    fn test_volatile_lane_drops_when_full() {
        let (handle, mut rx) = ConnectionHandle::with_capacity(2);
        let msg = ServerMessage::PlayerLeft(ConnectionId(1));

        assert_eq!(handle.send_volatile(msg.clone()), VolatileSend::Sent);
        assert_eq!(handle.send_volatile(msg.clone()), VolatileSend::Sent);
        assert_eq!(handle.send_volatile(msg.clone()), VolatileSend::Dropped);

        rx.volatile.try_recv().unwrap();
        assert_eq!(handle.send_volatile(msg), VolatileSend::Sent);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handle, rx) = ConnectionHandle::channel();
        drop(rx);
        assert!(!handle.send(ServerMessage::PlayerLeft(ConnectionId(1))));
        assert!(handle.is_closed());
        assert_eq!(
            handle.send_volatile(ServerMessage::PlayerLeft(ConnectionId(1))),
            VolatileSend::Closed
        );
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(255).to_string(), "00000000000000ff");
    }
}
