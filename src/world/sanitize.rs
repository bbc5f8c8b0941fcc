//! Soft validation of client input. Nothing here rejects a message; bad
//! values are truncated, escaped or replaced and the message is processed.

use super::players::{PlayerState, Position};

/// Maximum chat length in characters, applied before escaping
pub const MAX_CHAT_CHARS: usize = 200;

/// Truncate to [`MAX_CHAT_CHARS`] then escape `<` and `>`.
///
/// Truncating first means an escape sequence can never be cut in half.
pub fn sanitize_chat(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_CHAT_CHARS * 4));
    for c in raw.chars().take(MAX_CHAT_CHARS) {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Resolve a movement update against the player's current transform.
/// Non-finite components keep their previous value.
pub fn sanitize_move(current: &PlayerState, x: f32, y: f32, z: f32, rot: f32) -> (Position, f32) {
    let keep = |new: f32, old: f32| if new.is_finite() { new } else { old };
    let position = Position::new(
        keep(x, current.position.x),
        keep(y, current.position.y),
        keep(z, current.position.z),
    );
    (position, keep(rot, current.rotation))
}
