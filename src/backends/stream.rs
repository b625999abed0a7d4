use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Connection, Connector, Dialer};
use crate::error::{BoxError, TunnelError};
use crate::tunnel::TrackedConnection;
use crate::validation::split_host_port;

/// Backend whose connection string is the address to reach on the remote side:
/// `host:port`, `[v6]:port`, or an absolute unix socket path.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamBackend;

impl StreamBackend {
    pub const NAME: &'static str = "stream";
}

impl Backend for StreamBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open_connector(
        &self,
        dialer: Arc<dyn Dialer>,
        conn_str: &str,
    ) -> Result<Box<dyn Connector>, BoxError> {
        let address = conn_str.trim();
        if address.is_empty() {
            return Err("connection string is empty".into());
        }
        let network = if address.starts_with('/') {
            "unix"
        } else {
            split_host_port(address)?;
            "tcp"
        };
        Ok(Box::new(StreamConnector {
            dialer,
            network,
            address: address.to_string(),
        }))
    }
}

pub struct StreamConnector {
    dialer: Arc<dyn Dialer>,
    network: &'static str,
    address: String,
}

impl StreamConnector {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connector for StreamConnector {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Box<dyn Connection>, TunnelError> {
        let conn = self.dialer.dial(cancel, self.network, &self.address).await?;
        Ok(Box::new(StreamConnection { conn }))
    }
}

/// A raw forwarded byte stream presented as a database connection.
#[derive(Debug)]
pub struct StreamConnection {
    conn: TrackedConnection,
}

impl StreamConnection {
    pub fn get_mut(&mut self) -> &mut TrackedConnection {
        &mut self.conn
    }

    /// Hand the stream to a database client. Closing it is then the client's job.
    pub fn into_inner(self) -> TrackedConnection {
        self.conn
    }
}

#[async_trait]
impl Connection for StreamConnection {
    async fn ping(&mut self) -> Result<(), TunnelError> {
        self.conn.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TunnelError> {
        self.conn.close().await
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
