//! Dev certificate generator - run with `cargo run --manifest-path scripts/Cargo.toml`
//!
//! Writes a short-lived self-signed localhost certificate to `certs/`, where
//! the server looks when TLS_CERT_PATH / TLS_KEY_PATH are unset, and prints
//! the hashes a browser client needs to trust it.
//!
//! Pass `--force` to replace an existing pair.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CERT_FILE: &str = "cert.pem";
const KEY_FILE: &str = "key.pem";

// serverCertificateHashes only accepts certificates valid for at most 14 days
const VALIDITY: Duration = Duration::from_secs(13 * 24 * 60 * 60);

/// `certs/` at the repository root, wherever the script is run from
fn cert_dir() -> PathBuf {
    cert_dir_under(Path::new(env!("CARGO_MANIFEST_DIR")))
}

fn cert_dir_under(manifest_dir: &Path) -> PathBuf {
    manifest_dir
        .parent()
        .unwrap_or(manifest_dir)
        .join("certs")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let force = std::env::args().any(|arg| arg == "--force");
    let dir = cert_dir();
    let cert_file = dir.join(CERT_FILE);
    let key_file = dir.join(KEY_FILE);
    let exists = cert_file.exists() && key_file.exists();

    if exists && !force {
        println!(
            "Keeping existing certificate in {} (use --force to replace)\n",
            dir.display()
        );
    } else {
        generate(&dir, &cert_file, &key_file)?;
    }

    print_hashes(&cert_file, &key_file)
}

fn generate(dir: &Path, cert_file: &Path, key_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Generating localhost certificate...\n");
    fs::create_dir_all(dir)?;

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])?;

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, "Terra Session Dev");
    name.push(DnType::OrganizationName, "Local Development");
    params.distinguished_name = name;

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + VALIDITY).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    fs::write(cert_file, cert.pem())?;
    fs::write(key_file, key_pair.serialize_pem())?;
    println!("Wrote {} and {}\n", cert_file.display(), key_file.display());

    Ok(())
}

fn print_hashes(cert_file: &Path, key_file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cert_pem = pem::parse(fs::read_to_string(cert_file)?)?;
    let cert_hash = sha256_base64(cert_pem.contents());

    let key_pair = KeyPair::from_pem(&fs::read_to_string(key_file)?)?;
    let spki_hash = sha256_base64(&key_pair.public_key_der());

    println!("serverCertificateHashes value (base64 SHA-256 of the certificate):");
    println!("  {}\n", cert_hash);
    println!("Chrome flag:");
    println!("  --ignore-certificate-errors-spki-list={}\n", spki_hash);
    println!("The server logs the certificate hash at startup as well.");

    Ok(())
}

fn sha256_base64(bytes: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, bytes).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_dir_is_repo_root_certs() {
        assert_eq!(
            cert_dir_under(Path::new("/work/terra/scripts")),
            PathBuf::from("/work/terra/certs")
        );
        assert!(cert_dir().is_absolute());
        assert!(cert_dir().ends_with("certs"));
        assert!(!cert_dir().starts_with(env!("CARGO_MANIFEST_DIR")));
    }
}
