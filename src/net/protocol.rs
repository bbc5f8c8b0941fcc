use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::net::connection::ConnectionId;
use crate::net::framing::MAX_FRAME_SIZE;
use crate::world::players::PlayerState;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Authoritative position/rotation for the sender's own player
    Move { x: f32, y: f32, z: f32, rot: f32 },
    /// Chat line, sanitized before broadcast
    Chat(String),
    /// Opaque voice negotiation payload for one other connection
    VoiceSignal {
        target: ConnectionId,
        signal: Vec<u8>,
    },
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// First message on an admitted connection
    Welcome { id: ConnectionId, spawn: [f32; 3] },
    /// Every live player, including the receiver
    CurrentPlayers(HashMap<ConnectionId, PlayerState>),
    PlayerJoined(PlayerState),
    /// Sent on the volatile lane
    PlayerMoved(PlayerState),
    PlayerLeft(ConnectionId),
    ChatMessage { name: String, msg: String },
    VoiceSignal {
        from: ConnectionId,
        signal: Vec<u8>,
    },
    /// Server is closing the connection
    Kicked { reason: String },
}

impl ClientMessage {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Move { .. } => "move",
            ClientMessage::Chat(_) => "chat",
            ClientMessage::VoiceSignal { .. } => "voice-signal",
        }
    }
}

impl ServerMessage {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::CurrentPlayers(_) => "current-players",
            ServerMessage::PlayerJoined(_) => "player-joined",
            ServerMessage::PlayerMoved(_) => "player-moved",
            ServerMessage::PlayerLeft(_) => "player-left",
            ServerMessage::ChatMessage { .. } => "chat-message",
            ServerMessage::VoiceSignal { .. } => "voice-signal",
            ServerMessage::Kicked { .. } => "kicked",
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with TypeScript client)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
/// Uses legacy config for fixed-size integers (compatible with TypeScript client).
/// Length prefixes are bounded by the frame limit, so a hostile prefix fails
/// instead of allocating.
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    let config = bincode::config::legacy().with_limit::<{ MAX_FRAME_SIZE }>();
    bincode::serde::decode_from_slice(data, config)
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
