//! Contracts between the tunnel and database backend adapters.
//!
//! A [`Backend`] turns a connection string into a [`Connector`]. It is handed a
//! [`Dialer`] and must open every network connection through it, which is what
//! routes database traffic over the SSH session.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, TunnelError};
use crate::tunnel::TrackedConnection;

/// Opens byte-stream connections on behalf of a backend.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `address` as seen from the remote host.
    ///
    /// An address starting with `/` names a unix socket; anything else is
    /// `host:port`. `network` is informational only.
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<TrackedConnection, TunnelError>;
}

/// A database backend adapter.
pub trait Backend: Send + Sync {
    /// Stable name used for registration and error context.
    fn name(&self) -> &str;

    /// Build a connector for `conn_str`. The connection string is opaque to the tunnel.
    fn open_connector(
        &self,
        dialer: Arc<dyn Dialer>,
        conn_str: &str,
    ) -> Result<Box<dyn Connector>, BoxError>;
}

/// Produces logical database connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>, TunnelError>;

    /// The driver that re-derives connections by name, if any.
    fn driver(&self) -> Option<Arc<dyn Driver>> {
        None
    }
}

/// Generic open-by-name entry point.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn open(&self, conn_str: &str) -> Result<Box<dyn Connection>, TunnelError>;

    fn open_connector(&self, conn_str: &str) -> Result<Arc<dyn Connector>, TunnelError>;
}

/// A logical database connection.
#[async_trait]
pub trait Connection: Send {
    /// Check that the connection is still usable.
    async fn ping(&mut self) -> Result<(), TunnelError>;

    async fn close(&mut self) -> Result<(), TunnelError>;

    /// Recover the backend-specific connection type.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Caller-owned map of backend name to adapter, consumed by the config loader.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own name, returning any backend it replaced.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> Option<Arc<dyn Backend>> {
        let name = backend.name().to_string();
        let previous = self.backends.insert(name.clone(), backend);
        if previous.is_some() {
            tracing::debug!(backend = %name, "Replaced registered backend");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
