//! Connection Gate: admission check on the handshake, before accept.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::auth::session::{Session, SessionRegistry};

/// Query parameter carrying the session token
pub const TOKEN_PARAM: &str = "token";

/// Why a connection was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Authentication error: no token presented")]
    MissingToken,
    #[error("Authentication error: unknown token")]
    UnknownToken,
}

/// Extract the token from a CONNECT path such as `/?token=abc` or
/// `/play?x=1&token=abc`
pub fn token_from_path(path: &str) -> Option<&str> {
    let (_, query) = path.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Read-only view of the session registry used at handshake time
#[derive(Clone)]
pub struct ConnectionGate {
    registry: Arc<RwLock<SessionRegistry>>,
}

impl ConnectionGate {
    pub fn new(registry: Arc<RwLock<SessionRegistry>>) -> Self {
        Self { registry }
    }

    /// Resolve a presented token to the session it was issued for
    pub fn admit_token(&self, token: Option<&str>) -> Result<Session, GateError> {
        let token = token.ok_or(GateError::MissingToken)?;
        self.registry
            .read()
            .get_by_str(token)
            .cloned()
            .ok_or(GateError::UnknownToken)
    }

    /// Admission check for a handshake path
    pub fn admit(&self, path: &str) -> Result<Session, GateError> {
        self.admit_token(token_from_path(path))
    }
}
