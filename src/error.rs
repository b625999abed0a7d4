use std::path::PathBuf;
use thiserror::Error;

/// Boxed error reported by a backend adapter.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised synchronously while building a tunnel, before any network I/O.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("backend required")]
    BackendRequired,

    #[error("ssh config required")]
    SshConfigRequired,

    #[error("invalid ssh config: {0}")]
    InvalidSshConfig(String),

    #[error("address required")]
    AddressRequired,

    #[error("invalid address - {0}")]
    InvalidAddress(String),
}

/// SSH-related errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Key file {0} is encrypted and requires a passphrase")]
    KeyFilePassphraseRequired(PathBuf),

    #[error("Invalid passphrase for key file {0}")]
    KeyFilePassphraseInvalid(PathBuf),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Invalid forward target: {0}")]
    InvalidTarget(String),

    #[error("Timeout connecting to {0}")]
    Timeout(String),

    #[error("Host key verification failed: {0}")]
    HostKeyVerification(String),

    #[error("russh error: {0}")]
    Russh(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

/// Errors reported by tunnel operations.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// Handshake or channel-open failure. The tunnel stays usable.
    #[error(transparent)]
    Dial(#[from] SshError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{backend}: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BoxError,
    },

    #[error("ssh: tcpChan: deadline not supported")]
    DeadlineUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tunnel has been dropped")]
    TunnelDropped,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported config format '{0}' (expected .yaml, .yml, .json or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to parse YAML config: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse TOML config: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("{addr}: {reason}")]
    Invalid { addr: String, reason: String },

    #[error("{addr}: {source}")]
    Key {
        addr: String,
        #[source]
        source: SshError,
    },

    #[error("{addr}: datasource '{datasource}' names unregistered backend '{backend}'")]
    UnknownBackend {
        addr: String,
        datasource: String,
        backend: String,
    },

    #[error("datasource '{0}' is defined more than once")]
    DuplicateDatasource(String),

    #[error("{addr}: new tunnel error: {source}")]
    Tunnel {
        addr: String,
        #[source]
        source: ConstructionError,
    },

    #[error("{addr}: datasource '{datasource}': {source}")]
    Connector {
        addr: String,
        datasource: String,
        #[source]
        source: TunnelError,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}
