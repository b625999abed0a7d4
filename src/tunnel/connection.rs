use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TunnelError;
use crate::ssh::{ForwardStream, ForwardTarget};

use super::TunnelInner;

/// One forwarded connection registered with its tunnel.
///
/// Closing the last tracked connection of a tunnel tears the SSH session down.
/// Once a reset sweeps the connection, reads and writes fail with
/// [`io::ErrorKind::NotConnected`].
pub struct TrackedConnection {
    id: Uuid,
    target: ForwardTarget,
    stream: Option<ForwardStream>,
    severed: CancellationToken,
    tunnel: Arc<TunnelInner>,
}

impl TrackedConnection {
    pub(super) fn new(
        id: Uuid,
        target: ForwardTarget,
        stream: ForwardStream,
        severed: CancellationToken,
        tunnel: Arc<TunnelInner>,
    ) -> Self {
        Self {
            id,
            target,
            stream: Some(stream),
            severed,
            tunnel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.target
    }

    /// True once closed, or once the tunnel reset underneath it.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none() || self.severed.is_cancelled()
    }

    /// Close the connection. Calling it again is a no-op.
    ///
    /// Cancel safe: the stream stays with the connection until the session
    /// lock is held, so an abandoned close leaves the release to `Drop`.
    pub async fn close(&mut self) -> Result<(), TunnelError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let state = self.tunnel.session.lock().await;
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        self.tunnel.release_locked(state, self.id, stream).await
    }

    /// Forwarded channels have no deadlines; see [`crate::Tunnel::ignore_set_deadline_request`].
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        self.tunnel.deadline_request()
    }

    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        self.tunnel.deadline_request()
    }

    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        self.tunnel.deadline_request()
    }

    fn live_stream(&mut self) -> io::Result<&mut ForwardStream> {
        if self.severed.is_cancelled() {
            return Err(not_connected());
        }
        self.stream.as_mut().ok_or_else(not_connected)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "tunnel connection closed")
}

impl AsyncRead for TrackedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().live_stream() {
            Ok(stream) => Pin::new(stream).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for TrackedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().live_stream() {
            Ok(stream) => Pin::new(stream).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().live_stream() {
            Ok(stream) => Pin::new(stream).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().live_stream() {
            Ok(stream) => Pin::new(stream).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let tunnel = Arc::clone(&self.tunnel);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = tunnel.release(id, stream).await {
                        tracing::debug!("Tracked connection cleanup failed: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::debug!(
                    "Tracked connection dropped without a Tokio runtime; release skipped"
                );
            }
        }
    }
}

impl std::fmt::Debug for TrackedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedConnection")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish()
    }
}
