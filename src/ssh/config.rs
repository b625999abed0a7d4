use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{HashAlg, PrivateKey, PublicKey};
use secrecy::SecretString;

use crate::error::ConstructionError;
use crate::validation::validate_username;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);

/// One way of authenticating the SSH user.
#[derive(Clone)]
pub enum AuthMethod {
    Password(SecretString),
    PublicKey(Arc<PrivateKey>),
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey(_) => "publickey",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(_) => f.debug_tuple("Password").field(&"[REDACTED]").finish(),
            AuthMethod::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.public_key().fingerprint(HashAlg::Sha256).to_string())
                .finish(),
        }
    }
}

/// How the server's host key is verified.
#[derive(Clone)]
pub enum HostKeyPolicy {
    /// Accept only this key
    Fixed(PublicKey),
    /// Accept any key. Every session logs a security warning.
    InsecureIgnore,
}

impl fmt::Debug for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::Fixed(key) => f
                .debug_tuple("Fixed")
                .field(&key.fingerprint(HashAlg::Sha256).to_string())
                .finish(),
            HostKeyPolicy::InsecureIgnore => f.write_str("InsecureIgnore"),
        }
    }
}

/// Client configuration for the tunnel's SSH session.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub user: String,
    /// Tried in order until one succeeds
    pub auth: Vec<AuthMethod>,
    pub host_key: HostKeyPolicy,
    /// Bounds the TCP connect and, separately, the SSH handshake
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
}

impl SshConfig {
    /// The user is trimmed; it is sent to the server exactly as stored.
    pub fn new(user: impl Into<String>, host_key: HostKeyPolicy) -> Self {
        let user: String = user.into();
        Self {
            user: user.trim().to_string(),
            auth: Vec::new(),
            host_key,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            inactivity_timeout: Some(DEFAULT_INACTIVITY_TIMEOUT),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth
            .push(AuthMethod::Password(SecretString::from(password.into())));
        self
    }

    pub fn with_private_key(mut self, key: PrivateKey) -> Self {
        self.auth.push(AuthMethod::PublicKey(Arc::new(key)));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// A zero interval disables keepalives.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Check the parts of the configuration a handshake cannot do without.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        validate_username(&self.user)
            .map_err(|e| ConstructionError::InvalidSshConfig(e.message))?;
        if self.auth.is_empty() {
            return Err(ConstructionError::InvalidSshConfig(
                "no authentication methods specified".to_string(),
            ));
        }
        Ok(())
    }
}
