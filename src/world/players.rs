use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::session::Session;
use crate::net::connection::ConnectionId;

/// World-space position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Live, connection-scoped replica of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: ConnectionId,
    pub name: String,
    pub color: String,
    pub position: Position,
    /// Yaw in radians
    pub rotation: f32,
}

impl PlayerState {
    /// New player for an admitted connection, placed at `spawn`
    pub fn from_session(id: ConnectionId, session: &Session, spawn: Position) -> Self {
        Self {
            id,
            name: session.name.clone(),
            color: session.color.clone(),
            position: spawn,
            rotation: 0.0,
        }
    }
}

/// Player State Table, keyed by the owning connection
#[derive(Debug, Default)]
pub struct PlayerTable {
    players: HashMap<ConnectionId, PlayerState>,
}

impl PlayerTable {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
        }
    }

    /// Insert a player. Returns false (and leaves the table unchanged) if
    /// the connection already owns an entry.
    pub fn insert(&mut self, player: PlayerState) -> bool {
        if self.players.contains_key(&player.id) {
            return false;
        }
        self.players.insert(player.id, player);
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Overwrite the transform of the player owned by `owner`.
    ///
    /// The only mutation path for a player: callers pass the id of the
    /// connection the update arrived on, never an id taken from the payload.
    pub fn apply_move(
        &mut self,
        owner: ConnectionId,
        position: Position,
        rotation: f32,
    ) -> Option<&PlayerState> {
        let player = self.players.get_mut(&owner)?;
        player.position = position;
        player.rotation = rotation;
        Some(player)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<PlayerState> {
        self.players.remove(&id)
    }

    /// Copy of every entry, for `current-players`
    pub fn snapshot(&self) -> HashMap<ConnectionId, PlayerState> {
        self.players.clone()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}
