//! Event router and player state for the shared world.
//!
//! [`World`] owns the Player State Table and the live connection registry
//! and is driven by exactly one task: every connect, message and
//! disconnect is an event in its mailbox, and each handler runs to
//! completion before the next event is taken. Transports talk to it
//! through a cloneable [`WorldHandle`].

pub mod players;
pub mod relay;
pub mod sanitize;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::auth::session::Session;
use crate::metrics::Metrics;
use crate::net::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, VolatileSend};
use crate::net::protocol::{ClientMessage, ServerMessage};
use crate::terrain::HeightGrid;
use players::{PlayerState, PlayerTable, Position};
use relay::RelayOutcome;

/// World mailbox depth
pub const MAILBOX_CAPACITY: usize = 4096;

/// Events processed by the world task
#[derive(Debug)]
pub enum WorldEvent {
    /// A connection passed the gate
    Connect {
        session: Session,
        handle: ConnectionHandle,
        reply: oneshot::Sender<ConnectionId>,
    },
    Message {
        from: ConnectionId,
        message: ClientMessage,
    },
    Disconnect {
        id: ConnectionId,
    },
    /// Kick every connection and empty the player table
    Reset {
        reason: String,
        reply: oneshot::Sender<usize>,
    },
    /// Copy of the player table
    Snapshot {
        reply: oneshot::Sender<HashMap<ConnectionId, PlayerState>>,
    },
}

/// Authoritative state shared by every connection
pub struct World {
    terrain: Arc<HeightGrid>,
    players: PlayerTable,
    connections: ConnectionRegistry,
    metrics: Arc<Metrics>,
}

impl World {
    pub fn new(terrain: Arc<HeightGrid>, metrics: Arc<Metrics>) -> Self {
        Self {
            terrain,
            players: PlayerTable::new(),
            connections: ConnectionRegistry::new(),
            metrics,
        }
    }

    pub fn terrain(&self) -> &HeightGrid {
        &self.terrain
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    /// Admit a gated connection: add its player, announce it to everyone
    /// else, then send it `welcome` and the full snapshot.
    pub fn connect(&mut self, session: &Session, handle: ConnectionHandle) -> ConnectionId {
        let id = self.connections.insert(handle);
        let spawn = self.terrain.spawn_point();
        let player = PlayerState::from_session(id, session, Position::from_array(spawn));

        self.players.insert(player.clone());
        info!(
            "Player {} joined as {} (token {}, admin={})",
            session.name,
            id,
            session.token.log_prefix(),
            session.is_admin
        );

        self.broadcast_except(id, ServerMessage::PlayerJoined(player));
        self.send_to(id, ServerMessage::Welcome { id, spawn });
        self.send_to(id, ServerMessage::CurrentPlayers(self.players.snapshot()));

        self.update_gauges();
        id
    }

    /// Route one client message. Messages from connections that own no
    /// player are ignored.
    pub fn handle_message(&mut self, from: ConnectionId, message: ClientMessage) {
        Metrics::incr(&self.metrics.messages_received);

        match message {
            ClientMessage::Move { x, y, z, rot } => self.handle_move(from, x, y, z, rot),
            ClientMessage::Chat(text) => self.handle_chat(from, &text),
            ClientMessage::VoiceSignal { target, signal } => {
                self.handle_voice_signal(from, target, signal)
            }
        }
    }

    fn handle_move(&mut self, from: ConnectionId, x: f32, y: f32, z: f32, rot: f32) {
        let Some(current) = self.players.get(from) else {
            debug!("Ignoring move from {} with no player", from);
            return;
        };

        let (position, rotation) = sanitize::sanitize_move(current, x, y, z, rot);
        let Some(updated) = self.players.apply_move(from, position, rotation) else {
            return;
        };
        let update = ServerMessage::PlayerMoved(updated.clone());

        for (id, handle) in self.connections.iter() {
            if id == from {
                continue;
            }
            match handle.send_volatile(update.clone()) {
                VolatileSend::Sent => Metrics::incr(&self.metrics.messages_sent),
                VolatileSend::Dropped => Metrics::incr(&self.metrics.volatile_dropped),
                VolatileSend::Closed => {}
            }
        }
    }

    fn handle_chat(&mut self, from: ConnectionId, text: &str) {
        let Some(sender) = self.players.get(from) else {
            debug!("Ignoring chat from {} with no player", from);
            return;
        };

        let msg = sanitize::sanitize_chat(text);
        let name = sender.name.clone();
        debug!("Chat from {} ({} chars)", name, msg.chars().count());

        Metrics::incr(&self.metrics.chat_messages);
        self.broadcast(ServerMessage::ChatMessage { name, msg });
    }

    fn handle_voice_signal(&mut self, from: ConnectionId, target: ConnectionId, signal: Vec<u8>) {
        if self.players.get(from).is_none() {
            debug!("Ignoring voice signal from {} with no player", from);
            return;
        }

        match relay::relay(&self.connections, from, target, signal) {
            RelayOutcome::Delivered => {
                Metrics::incr(&self.metrics.voice_relayed);
                Metrics::incr(&self.metrics.messages_sent);
            }
            RelayOutcome::TargetGone => {
                debug!("Voice signal from {} to missing {}", from, target);
                Metrics::incr(&self.metrics.voice_dropped);
            }
        }
    }

    /// Remove a connection and its player, announcing the departure.
    /// Returns false if the connection was already gone (e.g. after a reset).
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let had_connection = self.connections.remove(id).is_some();
        let player = self.players.remove(id);

        if let Some(player) = &player {
            info!("Player {} ({}) left", player.name, id);
            self.broadcast(ServerMessage::PlayerLeft(id));
        }

        self.update_gauges();
        had_connection || player.is_some()
    }

    /// Send `kicked` to every connection, close them all and clear the
    /// player table. Returns the number of connections closed.
    pub fn reset(&mut self, reason: &str) -> usize {
        let connections = self.connections.drain();
        for (_, handle) in &connections {
            handle.send(ServerMessage::Kicked {
                reason: reason.to_string(),
            });
            handle.close(reason);
        }
        self.players.clear();

        info!("World reset: closed {} connections", connections.len());
        self.update_gauges();
        connections.len()
    }

    fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        if let Some(handle) = self.connections.get(id) {
            if handle.send(message) {
                Metrics::incr(&self.metrics.messages_sent);
            }
        }
    }

    /// Reliable send to every connection
    fn broadcast(&self, message: ServerMessage) {
        for (_, handle) in self.connections.iter() {
            if handle.send(message.clone()) {
                Metrics::incr(&self.metrics.messages_sent);
            }
        }
    }

    /// Reliable send to every connection except `skip`
    fn broadcast_except(&self, skip: ConnectionId, message: ServerMessage) {
        for (id, handle) in self.connections.iter() {
            if id != skip && handle.send(message.clone()) {
                Metrics::incr(&self.metrics.messages_sent);
            }
        }
    }

    fn update_gauges(&self) {
        Metrics::set(&self.metrics.connections_active, self.connections.count());
        Metrics::set(&self.metrics.players_online, self.players.len());
    }

    /// Apply one mailbox event
    pub fn apply(&mut self, event: WorldEvent) {
        let started = Instant::now();
        match event {
            WorldEvent::Connect {
                session,
                handle,
                reply,
            } => {
                let id = self.connect(&session, handle);
                if reply.send(id).is_err() {
                    // Transport gave up during admission
                    self.disconnect(id);
                }
            }
            WorldEvent::Message { from, message } => self.handle_message(from, message),
            WorldEvent::Disconnect { id } => {
                self.disconnect(id);
            }
            WorldEvent::Reset { reason, reply } => {
                let closed = self.reset(&reason);
                let _ = reply.send(closed);
            }
            WorldEvent::Snapshot { reply } => {
                let _ = reply.send(self.players.snapshot());
            }
        }
        self.metrics.record_event_time(started.elapsed());
    }

    /// Process events until every [`WorldHandle`] is dropped
    pub async fn run(mut self, mut mailbox: mpsc::Receiver<WorldEvent>) {
        info!("World task started ({}x{} grid)", self.terrain.size(), self.terrain.size());
        while let Some(event) = mailbox.recv().await {
            self.apply(event);
        }
        info!("World task stopped");
    }

    /// Spawn the world task and return its handle
    pub fn spawn(self) -> WorldHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        tokio::spawn(self.run(rx));
        WorldHandle { tx }
    }
}

/// Error returned when the world task is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("World task has stopped")]
pub struct WorldClosed;

/// Cloneable sender side of the world mailbox
#[derive(Debug, Clone)]
pub struct WorldHandle {
    tx: mpsc::Sender<WorldEvent>,
}

impl WorldHandle {
    /// Register an admitted connection and get its id
    pub async fn connect(
        &self,
        session: Session,
        handle: ConnectionHandle,
    ) -> Result<ConnectionId, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorldEvent::Connect {
                session,
                handle,
                reply,
            })
            .await
            .map_err(|_| WorldClosed)?;
        rx.await.map_err(|_| WorldClosed)
    }

    pub async fn message(&self, from: ConnectionId, message: ClientMessage) -> Result<(), WorldClosed> {
        self.tx
            .send(WorldEvent::Message { from, message })
            .await
            .map_err(|_| WorldClosed)
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), WorldClosed> {
        self.tx
            .send(WorldEvent::Disconnect { id })
            .await
            .map_err(|_| WorldClosed)
    }

    /// Kick everyone; resolves with the number of connections closed
    pub async fn reset(&self, reason: impl Into<String>) -> Result<usize, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorldEvent::Reset {
                reason: reason.into(),
                reply,
            })
            .await
            .map_err(|_| WorldClosed)?;
        rx.await.map_err(|_| WorldClosed)
    }

    pub async fn snapshot(&self) -> Result<HashMap<ConnectionId, PlayerState>, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorldEvent::Snapshot { reply })
            .await
            .map_err(|_| WorldClosed)?;
        rx.await.map_err(|_| WorldClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::{ConnectionReceivers, Outgoing};
    use crate::terrain::TerrainConfig;

    fn world() -> World {
        let terrain = Arc::new(HeightGrid::generate(&TerrainConfig::default()));
        World::new(terrain, Arc::new(Metrics::new()))
    }

    fn session(name: &str) -> Session {
        Session::new(name.to_string(), "#123456".to_string(), false)
    }

    fn join(world: &mut World, name: &str) -> (ConnectionId, ConnectionReceivers) {
        let (handle, rx) = ConnectionHandle::channel();
        let id = world.connect(&session(name), handle);
        (id, rx)
    }

    fn reliable(rx: &mut ConnectionReceivers) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.reliable.try_recv() {
            if let Outgoing::Message(msg) = item {
                out.push(msg);
            }
        }
        out
    }

    fn volatile(rx: &mut ConnectionReceivers) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.volatile.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_connect_sends_welcome_then_snapshot() {
        let mut world = world();
        let (id, mut rx) = join(&mut world, "Ann");

        let msgs = reliable(&mut rx);
        assert_eq!(msgs.len(), 2);
        match &msgs[0] {
            ServerMessage::Welcome { id: wid, spawn } => {
                assert_eq!(*wid, id);
                assert_eq!(*spawn, world.terrain().spawn_point());
            }
            other => panic!("expected welcome, got {:?}", other),
        }
        match &msgs[1] {
            ServerMessage::CurrentPlayers(players) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[&id].name, "Ann");
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_join_broadcast_excludes_newcomer() {
        let mut world = world();
        let (_a, mut rx_a) = join(&mut world, "Admin");
        reliable(&mut rx_a);

        let (b, mut rx_b) = join(&mut world, "Ann");

        let seen_by_a = reliable(&mut rx_a);
        assert_eq!(seen_by_a.len(), 1);
        match &seen_by_a[0] {
            ServerMessage::PlayerJoined(p) => {
                assert_eq!(p.id, b);
                assert_eq!(p.name, "Ann");
            }
            other => panic!("expected player-joined, got {:?}", other),
        }

        let seen_by_b = reliable(&mut rx_b);
        assert!(seen_by_b
            .iter()
            .all(|m| !matches!(m, ServerMessage::PlayerJoined(_))));
    }

    #[test]
    fn test_snapshot_reflects_last_positions() {
        let mut world = world();
        let mut ids = Vec::new();
        for i in 0..4 {
            let (id, _rx) = join(&mut world, &format!("p{}", i));
            world.handle_message(
                id,
                ClientMessage::Move {
                    x: i as f32,
                    y: 2.0 * i as f32,
                    z: 3.0,
                    rot: 0.1,
                },
            );
            ids.push(id);
        }

        let (late, mut rx) = join(&mut world, "late");
        let snapshot = reliable(&mut rx)
            .into_iter()
            .find_map(|m| match m {
                ServerMessage::CurrentPlayers(p) => Some(p),
                _ => None,
            })
            .unwrap();

        assert_eq!(snapshot.len(), ids.len() + 1);
        assert!(snapshot.contains_key(&late));
        for (i, id) in ids.iter().enumerate() {
            let p = &snapshot[id];
            assert_eq!(p.position, Position::new(i as f32, 2.0 * i as f32, 3.0));
            assert_eq!(p.rotation, 0.1);
        }
    }

    #[test]
    fn test_move_broadcast_to_others_only() {
        let mut world = world();
        let (a, mut rx_a) = join(&mut world, "a");
        let (b, mut rx_b) = join(&mut world, "b");

        world.handle_message(
            b,
            ClientMessage::Move {
                x: 10.0,
                y: 5.0,
                z: 3.0,
                rot: 1.2,
            },
        );

        let seen_by_a = volatile(&mut rx_a);
        assert_eq!(seen_by_a.len(), 1);
        match &seen_by_a[0] {
            ServerMessage::PlayerMoved(p) => {
                assert_eq!(p.id, b);
                assert_eq!(p.position, Position::new(10.0, 5.0, 3.0));
                assert_eq!(p.rotation, 1.2);
            }
            other => panic!("expected player-moved, got {:?}", other),
        }
        assert!(volatile(&mut rx_b).is_empty());

        // Only the sender's entry changed
        assert_ne!(world.players().get(a).unwrap().position, Position::new(10.0, 5.0, 3.0));
    }

    #[test]
    fn test_move_cannot_target_other_player() {
        let mut world = world();
        let (a, _ra) = join(&mut world, "a");
        let (b, _rb) = join(&mut world, "b");
        let before = world.players().get(b).unwrap().clone();

        for i in 0..10 {
            world.handle_message(
                a,
                ClientMessage::Move {
                    x: i as f32,
                    y: 0.0,
                    z: 0.0,
                    rot: 0.0,
                },
            );
        }
        assert_eq!(world.players().get(b).unwrap(), &before);
    }

    #[test]
    fn test_move_from_unknown_connection_ignored() {
        let mut world = world();
        let (_a, mut rx_a) = join(&mut world, "a");
        reliable(&mut rx_a);

        world.handle_message(
            ConnectionId(1),
            ClientMessage::Move {
                x: 1.0,
                y: 1.0,
                z: 1.0,
                rot: 0.0,
            },
        );
        assert!(volatile(&mut rx_a).is_empty());
        assert_eq!(world.players().len(), 1);
    }

    #[test]
    fn test_slow_consumer_drops_movement_only() {
        let mut world = world();
        let (a, _ra) = join(&mut world, "a");
        let (_b, mut rx_b) = join(&mut world, "b");
        reliable(&mut rx_b);

        for i in 0..200 {
            world.handle_message(
                a,
                ClientMessage::Move {
                    x: i as f32,
                    y: 0.0,
                    z: 0.0,
                    rot: 0.0,
                },
            );
        }
        world.handle_message(a, ClientMessage::Chat("still here".into()));

        assert!(volatile(&mut rx_b).len() <= crate::net::connection::VOLATILE_QUEUE);
        assert!(world.metrics.volatile_dropped.load(std::sync::atomic::Ordering::Relaxed) > 0);
        assert!(reliable(&mut rx_b)
            .iter()
            .any(|m| matches!(m, ServerMessage::ChatMessage { .. })));
    }

    #[test]
    fn test_chat_escaped_and_echoed_to_sender() {
        let mut world = world();
        let (a, mut rx_a) = join(&mut world, "Ann");
        let (_b, mut rx_b) = join(&mut world, "Bob");
        reliable(&mut rx_a);
        reliable(&mut rx_b);

        world.handle_message(a, ClientMessage::Chat("<script>".into()));

        let expected = ServerMessage::ChatMessage {
            name: "Ann".into(),
            msg: "&lt;script&gt;".into(),
        };
        assert_eq!(reliable(&mut rx_a), vec![expected.clone()]);
        assert_eq!(reliable(&mut rx_b), vec![expected]);
    }

    #[test]
    fn test_voice_signal_relayed_to_target_only() {
        let mut world = world();
        let (a, mut rx_a) = join(&mut world, "a");
        let (b, mut rx_b) = join(&mut world, "b");
        let (_c, mut rx_c) = join(&mut world, "c");
        reliable(&mut rx_a);
        reliable(&mut rx_b);
        reliable(&mut rx_c);

        world.handle_message(
            a,
            ClientMessage::VoiceSignal {
                target: b,
                signal: b"offer".to_vec(),
            },
        );

        assert_eq!(
            reliable(&mut rx_b),
            vec![ServerMessage::VoiceSignal {
                from: a,
                signal: b"offer".to_vec()
            }]
        );
        assert!(reliable(&mut rx_a).is_empty());
        assert!(reliable(&mut rx_c).is_empty());
    }

    #[test]
    fn test_voice_signal_to_departed_target_dropped() {
        let mut world = world();
        let (a, mut rx_a) = join(&mut world, "a");
        let (b, _rx_b) = join(&mut world, "b");
        world.disconnect(b);
        reliable(&mut rx_a);

        world.handle_message(
            a,
            ClientMessage::VoiceSignal {
                target: b,
                signal: vec![1],
            },
        );
        assert!(reliable(&mut rx_a).is_empty());
        assert_eq!(
            world.metrics.voice_dropped.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_disconnect_removes_and_announces() {
        let mut world = world();
        let (a, mut rx_a) = join(&mut world, "a");
        let (b, _rx_b) = join(&mut world, "b");
        reliable(&mut rx_a);

        assert!(world.disconnect(b));
        assert!(world.players().get(b).is_none());
        assert_eq!(reliable(&mut rx_a), vec![ServerMessage::PlayerLeft(b)]);

        // Second disconnect is a no-op
        assert!(!world.disconnect(b));
        assert!(reliable(&mut rx_a).is_empty());
        assert!(world.players().get(a).is_some());
    }

    #[test]
    fn test_reset_kicks_everyone() {
        let mut world = world();
        let (_a, mut rx_a) = join(&mut world, "a");
        let (_b, mut rx_b) = join(&mut world, "b");
        reliable(&mut rx_a);
        reliable(&mut rx_b);

        assert_eq!(world.reset("World reset"), 2);
        assert!(world.players().is_empty());
        assert_eq!(world.connection_count(), 0);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                rx.reliable.try_recv().unwrap(),
                Outgoing::Message(ServerMessage::Kicked {
                    reason: "World reset".into()
                })
            );
            assert_eq!(
                rx.reliable.try_recv().unwrap(),
                Outgoing::Close {
                    reason: "World reset".into()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let handle = world().spawn();

        let (conn, mut rx) = ConnectionHandle::channel();
        let id = handle.connect(session("Ann"), conn).await.unwrap();

        handle
            .message(
                id,
                ClientMessage::Move {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                    rot: 0.0,
                },
            )
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot[&id].position, Position::new(1.0, 2.0, 3.0));

        handle.disconnect(id).await.unwrap();
        assert!(handle.snapshot().await.unwrap().is_empty());

        assert!(matches!(
            rx.reliable.recv().await,
            Some(Outgoing::Message(ServerMessage::Welcome { .. }))
        ));
    }

    #[tokio::test]
    async fn test_handle_reset() {
        let handle = world().spawn();
        let (conn, _rx) = ConnectionHandle::channel();
        handle.connect(session("a"), conn).await.unwrap();

        assert_eq!(handle.reset("bye").await.unwrap(), 1);
        assert!(handle.snapshot().await.unwrap().is_empty());
    }
}
