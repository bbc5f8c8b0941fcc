use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use std::fmt;
use std::path::Path;
use tracing::info;
use wtransport::Identity;

// Written by `scripts/gen-dev-cert.rs`
const FALLBACK_CERT: &str = "certs/cert.pem";
const FALLBACK_KEY: &str = "certs/key.pem";

/// Certificate identity for the WebTransport listener
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate DER, for `serverCertificateHashes`
    pub cert_hash: String,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("identity", &"<redacted>")
            .field("cert_hash", &self.cert_hash)
            .finish()
    }
}

impl TlsConfig {
    /// Load the configured PEM pair, or the local dev pair when none is configured
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        let (cert, key) = match (cert_path, key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ if Path::new(FALLBACK_CERT).is_file() && Path::new(FALLBACK_KEY).is_file() => {
                (FALLBACK_CERT, FALLBACK_KEY)
            }
            _ => {
                return Err(anyhow!(
                    "No TLS identity: set TLS_CERT_PATH and TLS_KEY_PATH, or run \
                     `cargo run --manifest-path scripts/Cargo.toml` to create {}",
                    FALLBACK_CERT
                ))
            }
        };

        info!("Loading TLS identity from {}", cert);
        let identity = Identity::load_pemfiles(cert, key)
            .await
            .with_context(|| format!("Unable to read PEM pair {} / {}", cert, key))?;

        let cert_hash = identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|leaf| cert_hash(leaf.der()))
            .ok_or_else(|| anyhow!("{} contains no certificate", cert))?;

        info!("serverCertificateHashes: {}", cert_hash);
        Ok(Self {
            identity,
            cert_hash,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

/// Base64 SHA-256 of a DER certificate
pub fn cert_hash(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}
