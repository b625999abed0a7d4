//! SSH session layer.
//!
//! The tunnel only sees the [`SshTransport`] and [`SshLink`] traits; [`SshClient`]
//! is the russh implementation used by default.

pub mod auth;
pub mod client;
pub mod config;
pub mod handler;
pub mod target;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::error::SshError;

pub use auth::{decode_private_key, load_private_key, load_public_key, parse_public_key};
pub use client::SshClient;
pub use config::{AuthMethod, HostKeyPolicy, SshConfig};
pub use target::ForwardTarget;

/// Byte stream carried by one forwarded channel.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// Performs the SSH handshake for a tunnel.
#[async_trait]
pub trait SshTransport: Send + Sync {
    async fn handshake(
        &self,
        address: &str,
        config: &SshConfig,
    ) -> Result<EstablishedSession, SshError>;
}

/// An authenticated session able to open forwarded channels.
#[async_trait]
pub trait SshLink: Send + Sync {
    async fn open_forward(&self, target: &ForwardTarget) -> Result<ForwardStream, SshError>;

    /// Disconnect the session. Channels opened on it stop working.
    async fn close(&self) -> Result<(), SshError>;
}

/// Result of a successful handshake.
pub struct EstablishedSession {
    pub link: Arc<dyn SshLink>,
    pub closed: SessionClosed,
}

impl std::fmt::Debug for EstablishedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishedSession").finish_non_exhaustive()
    }
}

/// Held by whatever lives exactly as long as the session task.
#[derive(Debug)]
pub struct SessionGuard {
    _tx: oneshot::Sender<()>,
}

/// Resolves once the matching [`SessionGuard`] is dropped.
#[derive(Debug)]
pub struct SessionClosed {
    rx: oneshot::Receiver<()>,
}

impl SessionClosed {
    pub fn channel() -> (SessionGuard, SessionClosed) {
        let (tx, rx) = oneshot::channel();
        (SessionGuard { _tx: tx }, SessionClosed { rx })
    }

    /// Wait for the session to end, cleanly or not.
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}
