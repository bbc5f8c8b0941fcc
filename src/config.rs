use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::auth::AuthPolicy;
use crate::terrain::TerrainConfig;

/// Startup configuration errors. Any of these stops the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("ADMIN_PASSWORD must be set to a non-empty value")]
    MissingAdminPassword,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind both listeners to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// HTTP API port
    pub http_port: u16,
    /// Admin secret. Never logged.
    pub admin_password: String,
    /// Maximum concurrent realtime connections
    pub max_connections: usize,
    pub invite_single_use: bool,
    pub nuke_purges_sessions: bool,
    pub login_failure_delay: Duration,
    pub terrain: TerrainConfig,
    /// Path to TLS certificate file (dev certs in certs/ otherwise)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file
    pub tls_key_path: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("http_port", &self.http_port)
            .field("admin_password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("invite_single_use", &self.invite_single_use)
            .field("nuke_purges_sessions", &self.nuke_purges_sessions)
            .field("login_failure_delay", &self.login_failure_delay)
            .field("terrain", &self.terrain)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .finish()
    }
}

impl ServerConfig {
    /// Defaults for everything except the admin secret, which has none
    pub fn with_admin_password(admin_password: impl Into<String>) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            http_port: 3000,
            admin_password: admin_password.into(),
            max_connections: 256,
            invite_single_use: false,
            nuke_purges_sessions: false,
            login_failure_delay: Duration::from_millis(500),
            terrain: TerrainConfig::default(),
            tls_cert_path: None,
            tls_key_path: None,
        }
    }

    /// Load config from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config from any key lookup.
    ///
    /// A missing or empty `ADMIN_PASSWORD` is fatal; any other bad value
    /// falls back to its default with a warning.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = lookup("ADMIN_PASSWORD").unwrap_or_default();
        if password.is_empty() {
            return Err(ConfigError::MissingAdminPassword);
        }

        let mut config = Self::with_admin_password(password);

        parse_into(&lookup, "BIND_ADDRESS", &mut config.bind_address);
        parse_into(&lookup, "PORT", &mut config.port);
        parse_into(&lookup, "HTTP_PORT", &mut config.http_port);
        parse_into(&lookup, "MAX_CONNECTIONS", &mut config.max_connections);
        parse_into(&lookup, "INVITE_SINGLE_USE", &mut config.invite_single_use);
        parse_into(&lookup, "NUKE_PURGES_SESSIONS", &mut config.nuke_purges_sessions);
        parse_into(&lookup, "WORLD_SEED", &mut config.terrain.seed);
        parse_into(&lookup, "WORLD_SIZE", &mut config.terrain.world_size);

        let mut delay_ms = config.login_failure_delay.as_millis() as u64;
        parse_into(&lookup, "LOGIN_FAILURE_DELAY_MS", &mut delay_ms);
        config.login_failure_delay = Duration::from_millis(delay_ms);

        config.tls_cert_path = lookup("TLS_CERT_PATH").filter(|p| !p.is_empty());
        config.tls_key_path = lookup("TLS_KEY_PATH").filter(|p| !p.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_password.is_empty() {
            return Err(ConfigError::MissingAdminPassword);
        }
        if self.port == 0 || self.http_port == 0 {
            return Err(ConfigError::Invalid("ports cannot be 0".to_string()));
        }
        if self.port == self.http_port {
            return Err(ConfigError::Invalid(
                "PORT and HTTP_PORT must differ".to_string(),
            ));
        }
        if self.terrain.world_size == 0 {
            return Err(ConfigError::Invalid("WORLD_SIZE must be at least 1".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            invite_single_use: self.invite_single_use,
            purge_sessions_on_nuke: self.nuke_purges_sessions,
            login_failure_delay: self.login_failure_delay,
        }
    }
}

/// Overwrite `target` with the parsed value of `key`, if present and valid
fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Invalid {} '{}', using default", key, raw),
    }
}
