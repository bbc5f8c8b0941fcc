//! Credential issuance: admin login, invite-based join, invite minting and
//! nuke authorization.
//!
//! The registry is shared with the connection gate, which only ever reads it.

pub mod color;
pub mod session;

use parking_lot::RwLock;
use ring::digest::{digest, SHA256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::metrics::Metrics;
use session::{Session, SessionRegistry};

/// Maximum display name length in characters
pub const MAX_NAME_CHARS: usize = 15;

const DEFAULT_ADMIN_NAME: &str = "Admin";
const DEFAULT_PLAYER_NAME: &str = "Player";

/// Authentication and authorization failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid Password")]
    InvalidPassword,
    #[error("Invalid or expired invite code.")]
    InvalidInvite,
    /// Caller is authenticated but not allowed to do this
    #[error("Unauthorized")]
    Forbidden,
    #[error("Server is not accepting new sessions")]
    RegistryFull,
}

impl AuthError {
    /// Authorization failures are reported separately from bad credentials
    pub fn is_authorization(&self) -> bool {
        matches!(self, AuthError::Forbidden)
    }
}

/// Behaviour switches for the registry
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    /// Remove an invite code on successful join
    pub invite_single_use: bool,
    /// Drop every session on nuke, not just invites and live players
    pub purge_sessions_on_nuke: bool,
    /// Delay before answering a failed login
    pub login_failure_delay: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            invite_single_use: false,
            purge_sessions_on_nuke: false,
            login_failure_delay: Duration::from_millis(500),
        }
    }
}

/// Registry counts cleared by a nuke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NukeSummary {
    pub invites_cleared: usize,
    pub sessions_cleared: usize,
}

/// Issues and checks sessions
pub struct AuthService {
    registry: Arc<RwLock<SessionRegistry>>,
    /// SHA-256 of the admin password; compared digest to digest
    admin_digest: Vec<u8>,
    policy: AuthPolicy,
    metrics: Arc<Metrics>,
}

impl AuthService {
    pub fn new(
        registry: Arc<RwLock<SessionRegistry>>,
        admin_password: &str,
        policy: AuthPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            admin_digest: digest(&SHA256, admin_password.as_bytes()).as_ref().to_vec(),
            policy,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    fn password_matches(&self, password: &str) -> bool {
        let candidate = digest(&SHA256, password.as_bytes());
        candidate.as_ref() == self.admin_digest.as_slice()
    }

    /// Admin login. A wrong password is answered only after the policy delay.
    pub async fn login(&self, password: &str, name: &str) -> Result<Session, AuthError> {
        if !self.password_matches(password) {
            Metrics::incr(&self.metrics.logins_failed);
            warn!("Failed admin login attempt");
            tokio::time::sleep(self.policy.login_failure_delay).await;
            return Err(AuthError::InvalidPassword);
        }

        let name = sanitize_name(name, DEFAULT_ADMIN_NAME);
        let session = {
            let mut registry = self.registry.write();
            let session = registry
                .create_session(name, color::ADMIN_COLOR.to_string(), true)
                .ok_or(AuthError::RegistryFull)?;
            self.sync_gauges(&registry);
            session
        };

        info!(
            "Admin {} logged in (token {})",
            session.name,
            session.token.log_prefix()
        );
        Ok(session)
    }

    /// Join with an invite code
    pub fn join(&self, invite: &str, name: &str) -> Result<Session, AuthError> {
        let mut registry = self.registry.write();
        if !registry.has_invite(invite) {
            return Err(AuthError::InvalidInvite);
        }

        let name = sanitize_name(name, DEFAULT_PLAYER_NAME);
        let session = registry
            .create_session(name, color::random_color(), false)
            .ok_or(AuthError::RegistryFull)?;

        if self.policy.invite_single_use {
            registry.consume_invite(invite);
        }
        self.sync_gauges(&registry);

        info!(
            "{} joined with invite {} (token {})",
            session.name,
            invite,
            session.token.log_prefix()
        );
        Ok(session)
    }

    /// Resolve a token to an admin session
    pub fn authorize_admin(&self, token: &str) -> Result<Session, AuthError> {
        let registry = self.registry.read();
        match registry.get_by_str(token) {
            Some(session) if session.is_admin => Ok(session.clone()),
            _ => Err(AuthError::Forbidden),
        }
    }

    /// Mint a new invite code. Admin only.
    pub fn generate_invite(&self, token: &str) -> Result<String, AuthError> {
        let admin = self.authorize_admin(token)?;

        let mut registry = self.registry.write();
        let code = loop {
            let candidate = new_invite_code();
            if registry.add_invite(candidate.clone()) {
                break candidate;
            }
        };
        self.sync_gauges(&registry);

        info!("Invite {} generated by {}", code, admin.name);
        Ok(code)
    }

    /// Clear registry state for a world reset. Admin only.
    ///
    /// Closing live connections is the world's job; this only handles
    /// invites and, per policy, sessions.
    pub fn nuke(&self, token: &str) -> Result<NukeSummary, AuthError> {
        let admin = self.authorize_admin(token)?;

        let mut registry = self.registry.write();
        let invites_cleared = registry.clear_invites();
        let sessions_cleared = if self.policy.purge_sessions_on_nuke {
            registry.clear_sessions()
        } else {
            0
        };
        self.sync_gauges(&registry);

        warn!(
            "Nuke by {}: cleared {} invites, {} sessions",
            admin.name, invites_cleared, sessions_cleared
        );
        Ok(NukeSummary {
            invites_cleared,
            sessions_cleared,
        })
    }

    fn sync_gauges(&self, registry: &SessionRegistry) {
        Metrics::set(&self.metrics.sessions, registry.session_count());
        Metrics::set(&self.metrics.invites, registry.invite_count());
    }
}

/// 8 hex characters taken from a v4 UUID
fn new_invite_code() -> String {
    let mut code = uuid::Uuid::new_v4().simple().to_string();
    code.truncate(8);
    code
}

/// Trim, drop control and markup characters, cap the length.
/// Falls back to `default` when nothing is left.
pub fn sanitize_name(raw: &str, default: &str) -> String {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .filter(|c| *c != '<' && *c != '>' && *c != '&')
        .take(MAX_NAME_CHARS)
        .collect();

    let name = name.trim();
    if name.is_empty() {
        default.to_string()
    } else {
        name.to_string()
    }
}
