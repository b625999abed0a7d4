//! Key material loading and user authentication.

use std::path::Path;
use std::sync::Arc;

use russh::client;
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use secrecy::ExposeSecret;

use crate::error::SshError;
use crate::security_log::{self, AuthOutcome, SshPeer};

use super::config::AuthMethod;
use super::handler::ClientHandler;

const INLINE_KEY: &str = "<inline key>";

/// Load a PEM/OpenSSH private key from a file.
pub fn load_private_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey, SshError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SshError::KeyFile(format!("Cannot read key file {}: {}", path.display(), e))
    })?;
    decode_key(&content, passphrase, path)
}

/// Decode a private key held in memory.
pub fn decode_private_key(pem: &str, passphrase: Option<&str>) -> Result<PrivateKey, SshError> {
    decode_key(pem, passphrase, Path::new(INLINE_KEY))
}

fn decode_key(content: &str, passphrase: Option<&str>, origin: &Path) -> Result<PrivateKey, SshError> {
    // Check if this is actually a public key (common mistake)
    let first_line = content.trim_start().lines().next().unwrap_or("");
    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(SshError::KeyFile(format!(
            "{} contains a PUBLIC key, not a private key",
            origin.display()
        )));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(SshError::KeyFile(format!(
            "{} does not appear to be a valid SSH private key",
            origin.display()
        )));
    }

    let passphrase = passphrase.filter(|p| !p.is_empty());
    russh::keys::decode_secret_key(content.trim_start(), passphrase).map_err(|e| {
        let msg = e.to_string();
        let normalized = msg.to_lowercase();
        // russh reports passphrase problems under several different messages
        let is_passphrase_error = normalized.contains("encrypted")
            || normalized.contains("passphrase")
            || normalized.contains("cryptographic");
        if is_passphrase_error {
            if passphrase.is_some() {
                SshError::KeyFilePassphraseInvalid(origin.to_path_buf())
            } else {
                SshError::KeyFilePassphraseRequired(origin.to_path_buf())
            }
        } else {
            SshError::KeyFile(format!("Failed to load key {}: {}", origin.display(), e))
        }
    })
}

/// Parse a server public key.
///
/// Accepts an `authorized_keys` style line (`ssh-ed25519 AAAA... comment`)
/// or the bare base64 blob.
pub fn parse_public_key(text: &str) -> Result<PublicKey, SshError> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .ok_or_else(|| SshError::KeyFile("public key is empty".to_string()))?;

    let mut fields = line.split_whitespace();
    let blob = match (fields.next(), fields.next()) {
        (Some(_algorithm), Some(blob)) => blob,
        (Some(blob), None) => blob,
        _ => return Err(SshError::KeyFile("public key is empty".to_string())),
    };

    russh::keys::parse_public_key_base64(blob)
        .map_err(|e| SshError::KeyFile(format!("Failed to parse public key: {}", e)))
}

/// Read a server public key from a file.
pub fn load_public_key(path: &Path) -> Result<PublicKey, SshError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SshError::KeyFile(format!("Cannot read public key file {}: {}", path.display(), e))
    })?;
    parse_public_key(&content)
}

/// Authenticate `username`, trying each method in order.
pub(crate) async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    username: &str,
    methods: &[AuthMethod],
    hostname: &str,
    port: u16,
) -> Result<(), SshError> {
    let peer = SshPeer {
        host: hostname,
        port,
        user: username,
    };
    for method in methods {
        let method_name = method.name();
        security_log::log_auth(peer, method_name, AuthOutcome::Attempt);

        let result = match method {
            // Use expose_secret() only at the point of authentication
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(username, password.expose_secret())
                    .await
            }
            AuthMethod::PublicKey(key) => {
                // Only use SHA-512 hash algorithm for RSA keys
                let hash_alg = if key.algorithm().is_rsa() {
                    Some(HashAlg::Sha512)
                } else {
                    None
                };
                handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await
            }
        };

        match result {
            Ok(outcome) if outcome.success() => {
                security_log::log_auth(peer, method_name, AuthOutcome::Accepted);
                return Ok(());
            }
            Ok(_) => {
                security_log::log_auth(peer, method_name, AuthOutcome::Declined);
            }
            Err(e) => {
                let reason = e.to_string();
                security_log::log_auth(peer, method_name, AuthOutcome::Failed(&reason));
                return Err(SshError::AuthenticationFailed(reason));
            }
        }
    }

    Err(SshError::AuthenticationFailed(format!(
        "no authentication method accepted for user {username}"
    )))
}
