use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Opaque session token handed out by login/join.
/// Uses CSPRNG for cryptographic security
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken([u8; 32]);

impl SessionToken {
    /// Generate a new cryptographically secure session token
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short prefix that is safe to put in log lines
    pub fn log_prefix(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// Never print the full token through {:?}
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}..)", self.log_prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed session token")]
pub struct TokenParseError;

impl FromStr for SessionToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(TokenParseError);
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| TokenParseError)?;
        }
        Ok(Self(bytes))
    }
}

/// Identity bound to a token. Immutable once created.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub name: String,
    pub color: String,
    pub is_admin: bool,
}

impl Session {
    pub fn new(name: String, color: String, is_admin: bool) -> Self {
        Self {
            token: SessionToken::generate(),
            name,
            color,
            is_admin,
        }
    }
}

/// Server-held sessions and the set of currently valid invite codes
pub struct SessionRegistry {
    sessions: HashMap<SessionToken, Session>,
    invites: HashSet<String>,
    /// Maximum number of sessions
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            invites: HashSet::new(),
            max_sessions,
        }
    }

    /// Mint a token and store a session for it.
    /// Returns `None` when the registry is at capacity.
    pub fn create_session(&mut self, name: String, color: String, is_admin: bool) -> Option<Session> {
        if self.sessions.len() >= self.max_sessions {
            return None;
        }

        // 256-bit tokens make a collision practically impossible, but stay correct anyway
        let session = loop {
            let candidate = Session::new(name.clone(), color.clone(), is_admin);
            if !self.sessions.contains_key(&candidate.token) {
                break candidate;
            }
        };

        self.sessions.insert(session.token.clone(), session.clone());
        Some(session)
    }

    /// Look up the session for a token
    pub fn get(&self, token: &SessionToken) -> Option<&Session> {
        self.sessions.get(token)
    }

    /// Look up a token given in its string form
    pub fn get_by_str(&self, token: &str) -> Option<&Session> {
        token.parse::<SessionToken>().ok().and_then(|t| self.get(&t))
    }

    /// Remove a session
    pub fn remove_session(&mut self, token: &SessionToken) -> Option<Session> {
        self.sessions.remove(token)
    }

    /// Drop every session
    pub fn clear_sessions(&mut self) -> usize {
        let count = self.sessions.len();
        self.sessions.clear();
        count
    }

    /// Get number of sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn add_invite(&mut self, code: String) -> bool {
        self.invites.insert(code)
    }

    pub fn has_invite(&self, code: &str) -> bool {
        self.invites.contains(code)
    }

    /// Remove an invite code, returning whether it was valid
    pub fn consume_invite(&mut self, code: &str) -> bool {
        self.invites.remove(code)
    }

    /// Invalidate every invite code
    pub fn clear_invites(&mut self) -> usize {
        let count = self.invites.len();
        self.invites.clear();
        count
    }

    pub fn invite_count(&self) -> usize {
        self.invites.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(10000)
    }
}
