//! Database connections multiplexed over a single SSH session.
//!
//! A [`Tunnel`] owns one lazily established SSH session to a remote host and
//! hands database backends a [`backend::Dialer`] that opens forwarded channels
//! through it. Backends are plugged in through [`backend::Backend`]; tunnels and
//! datasources can also be declared in YAML, JSON or TOML ([`config`]).

pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod logging;
pub mod ssh;
pub mod tunnel;
pub mod validation;

pub(crate) mod security_log;

pub use backend::{Backend, BackendRegistry, Connection, Connector, Dialer, Driver};
pub use error::{ConfigError, ConstructionError, SshError, TunnelError};
pub use ssh::{AuthMethod, HostKeyPolicy, SshConfig};
pub use tunnel::{CachedConnector, TrackedConnection, Tunnel, TunnelBuilder, TunnelState};
