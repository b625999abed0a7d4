//! The tunnel: one lazily established SSH session per remote host, carrying
//! any number of forwarded database connections.
//!
//! A tunnel is either [`TunnelState::Reset`] (no session) or
//! [`TunnelState::Connected`]. The first dial after a reset performs the
//! handshake; losing the session, closing the tunnel, or closing the last
//! tracked connection moves it back to `Reset`.
//!
//! Two locks guard the state:
//! - the session lock (async) covers the phase, epoch, live link and the
//!   tracked-connection set, and is held for the whole of every dial, so
//!   dials on one tunnel never overlap;
//! - the cache lock covers the connector cache and the deadline flag.

mod connection;
mod connector;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, Connection, Connector, Dialer, Driver};
use crate::error::{ConstructionError, SshError, TunnelError};
use crate::security_log::{self, SshPeer};
use crate::ssh::{ForwardStream, ForwardTarget, SessionClosed, SshClient, SshConfig, SshLink, SshTransport};
use crate::validation::split_host_port;

pub use connection::TrackedConnection;
pub use connector::CachedConnector;

/// Observable state of a tunnel's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Reset,
    Connected,
}

/// Handle to a tunnel. Clones share one session and one connector cache.
#[derive(Clone)]
pub struct Tunnel {
    inner: Arc<TunnelInner>,
}

pub(crate) struct TunnelInner {
    address: String,
    host: String,
    port: u16,
    backend: Arc<dyn Backend>,
    ssh_config: Arc<SshConfig>,
    transport: Arc<dyn SshTransport>,
    cache: parking_lot::Mutex<ConnectorCache>,
    session: tokio::sync::Mutex<SessionState>,
}

#[derive(Default)]
struct ConnectorCache {
    connectors: HashMap<String, Arc<CachedConnector>>,
    ignore_deadline: bool,
}

/// `Reset` holds exactly when `link` is `None` and `conns` is empty.
struct SessionState {
    phase: TunnelState,
    epoch: u64,
    link: Option<Arc<dyn SshLink>>,
    conns: HashMap<Uuid, CancellationToken>,
}

/// Builder for [`Tunnel`]. Validation happens in [`TunnelBuilder::build`].
#[derive(Default)]
pub struct TunnelBuilder {
    backend: Option<Arc<dyn Backend>>,
    ssh_config: Option<Arc<SshConfig>>,
    address: Option<String>,
    transport: Option<Arc<dyn SshTransport>>,
}

impl TunnelBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn ssh_config(mut self, config: impl Into<Arc<SshConfig>>) -> Self {
        self.ssh_config = Some(config.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Replace the russh transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn SshTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate and construct. Performs no network I/O.
    pub fn build(self) -> Result<Tunnel, ConstructionError> {
        let backend = self.backend.ok_or(ConstructionError::BackendRequired)?;
        let ssh_config = self.ssh_config.ok_or(ConstructionError::SshConfigRequired)?;
        ssh_config.validate()?;

        let address = self.address.unwrap_or_default().trim().to_string();
        if address.is_empty() {
            return Err(ConstructionError::AddressRequired);
        }
        let (host, port) = split_host_port(&address)
            .map_err(|e| ConstructionError::InvalidAddress(e.message))?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(SshClient::new()));

        Ok(Tunnel {
            inner: Arc::new(TunnelInner {
                address,
                host,
                port,
                backend,
                ssh_config,
                transport,
                cache: parking_lot::Mutex::new(ConnectorCache::default()),
                session: tokio::sync::Mutex::new(SessionState {
                    phase: TunnelState::Reset,
                    epoch: 0,
                    link: None,
                    conns: HashMap::new(),
                }),
            }),
        })
    }
}

impl Tunnel {
    pub fn builder() -> TunnelBuilder {
        TunnelBuilder::default()
    }

    /// Create a tunnel to `address` using the russh transport.
    pub fn new(
        backend: Arc<dyn Backend>,
        ssh_config: impl Into<Arc<SshConfig>>,
        address: &str,
    ) -> Result<Self, ConstructionError> {
        Self::builder()
            .backend(backend)
            .ssh_config(ssh_config)
            .address(address)
            .build()
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Return the cached connector for `conn_str`, creating it on first use.
    ///
    /// The backend is invoked at most once per distinct connection string.
    pub fn open_connector(&self, conn_str: &str) -> Result<Arc<CachedConnector>, TunnelError> {
        self.inner.open_connector(conn_str)
    }

    /// [`Tunnel::open_connector`] followed by a connect that cannot be cancelled.
    pub async fn open(&self, conn_str: &str) -> Result<Box<dyn Connection>, TunnelError> {
        let connector = self.open_connector(conn_str)?;
        connector.connect(&CancellationToken::new()).await
    }

    /// Open a forwarded connection to `address` on the remote side.
    pub async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<TrackedConnection, TunnelError> {
        self.inner.dial(cancel, network, address).await
    }

    /// Tear down the session and every tracked connection.
    ///
    /// The tunnel stays usable; the next dial reconnects.
    pub async fn close(&self) -> Result<(), TunnelError> {
        let mut state = self.inner.session.lock().await;
        self.inner
            .reset_locked(&mut state, "tunnel closed")
            .await
            .map_err(TunnelError::from)
    }

    /// When set, deadline requests on tracked connections succeed without effect.
    pub fn ignore_set_deadline_request(&self, ignore: bool) {
        self.inner.cache.lock().ignore_deadline = ignore;
    }

    /// Number of tracked connections currently multiplexed over the session.
    pub async fn conn_count(&self) -> usize {
        self.inner.session.lock().await.conns.len()
    }

    pub async fn state(&self) -> TunnelState {
        self.inner.session.lock().await.phase
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("address", &self.inner.address)
            .field("backend", &self.inner.backend.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dialer for Tunnel {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<TrackedConnection, TunnelError> {
        self.inner.dial(cancel, network, address).await
    }
}

impl TunnelInner {
    fn open_connector(self: &Arc<Self>, conn_str: &str) -> Result<Arc<CachedConnector>, TunnelError> {
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.connectors.get(conn_str) {
            return Ok(Arc::clone(existing));
        }

        let handle = Arc::new(TunnelHandle {
            inner: Arc::downgrade(self),
        });
        let connector = self
            .backend
            .open_connector(handle.clone(), conn_str)
            .map_err(|source| TunnelError::Backend {
                backend: self.backend.name().to_string(),
                source,
            })?;

        debug!(backend = %self.backend.name(), address = %self.address, "Opened connector");
        let cached = Arc::new(CachedConnector::new(connector, handle));
        cache
            .connectors
            .insert(conn_str.to_string(), Arc::clone(&cached));
        Ok(cached)
    }

    fn deadline_request(&self) -> Result<(), TunnelError> {
        if self.cache.lock().ignore_deadline {
            Ok(())
        } else {
            Err(TunnelError::DeadlineUnsupported)
        }
    }

    async fn dial(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<TrackedConnection, TunnelError> {
        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled);
        }
        let target = ForwardTarget::parse(address)?;

        let mut state = self.session.lock().await;
        if cancel.is_cancelled() {
            return Err(TunnelError::Cancelled);
        }
        if state.phase == TunnelState::Reset {
            self.connect_locked(&mut state, cancel).await?;
        }

        let link = state
            .link
            .clone()
            .ok_or_else(|| SshError::Channel("no live ssh session".to_string()))?;
        let stream = link.open_forward(&target).await?;

        let id = Uuid::new_v4();
        let severed = CancellationToken::new();
        state.conns.insert(id, severed.clone());
        debug!(
            address = %self.address,
            network = %network,
            target = %target,
            conns = state.conns.len(),
            "Opened forwarded channel"
        );

        Ok(TrackedConnection::new(
            id,
            target,
            stream,
            severed,
            Arc::clone(self),
        ))
    }

    async fn connect_locked(
        self: &Arc<Self>,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<(), TunnelError> {
        let established = self
            .transport
            .handshake(&self.address, &self.ssh_config)
            .await?;

        if cancel.is_cancelled() {
            if let Err(e) = established.link.close().await {
                debug!(address = %self.address, "Closing abandoned session failed: {}", e);
            }
            return Err(TunnelError::Cancelled);
        }

        state.epoch += 1;
        state.phase = TunnelState::Connected;
        state.link = Some(established.link);

        let epoch = state.epoch;
        tokio::spawn(watch_session(Arc::downgrade(self), epoch, established.closed));

        info!(address = %self.address, epoch, "SSH session established");
        let peer = SshPeer {
            host: &self.host,
            port: self.port,
            user: &self.ssh_config.user,
        };
        security_log::log_ssh_session_opened(peer, epoch);
        Ok(())
    }

    /// Move to `Reset`. Idempotent. The link's close error is returned, but
    /// the state has already changed by then.
    async fn reset_locked(&self, state: &mut SessionState, reason: &str) -> Result<(), SshError> {
        if state.phase == TunnelState::Reset {
            return Ok(());
        }
        state.phase = TunnelState::Reset;

        let swept = state.conns.len();
        for (_, severed) in state.conns.drain() {
            severed.cancel();
        }
        let link = state.link.take();

        info!(address = %self.address, epoch = state.epoch, swept, reason, "SSH session reset");
        security_log::log_ssh_session_closed(&self.address, state.epoch, reason);

        match link {
            Some(link) => link.close().await,
            None => Ok(()),
        }
    }

    /// Close bookkeeping for one tracked connection.
    async fn release(&self, id: Uuid, stream: ForwardStream) -> Result<(), TunnelError> {
        let state = self.session.lock().await;
        self.release_locked(state, id, stream).await
    }

    /// Bookkeeping completes before the first await, so a caller that stops
    /// polling afterwards cannot leave `id` behind in the set.
    async fn release_locked(
        &self,
        mut state: MutexGuard<'_, SessionState>,
        id: Uuid,
        mut stream: ForwardStream,
    ) -> Result<(), TunnelError> {
        use tokio::io::AsyncWriteExt;

        if !state.conns.contains_key(&id) {
            // swept by an earlier reset; the current epoch is not ours to touch
            drop(state);
            let _ = stream.shutdown().await;
            return Ok(());
        }

        if state.conns.len() > 1 {
            state.conns.remove(&id);
            drop(state);
            stream.shutdown().await?;
            return Ok(());
        }

        drop(stream);
        self.reset_locked(&mut state, "last connection closed")
            .await
            .map_err(TunnelError::from)
    }
}

async fn watch_session(tunnel: Weak<TunnelInner>, epoch: u64, closed: SessionClosed) {
    closed.wait().await;

    let Some(inner) = tunnel.upgrade() else {
        return;
    };
    let mut state = inner.session.lock().await;
    if state.phase != TunnelState::Connected || state.epoch != epoch {
        return;
    }

    warn!(address = %inner.address, epoch, "SSH session lost");
    if let Err(e) = inner.reset_locked(&mut state, "session lost").await {
        debug!(address = %inner.address, "Closing lost session failed: {}", e);
    }
}

/// Weak reference to a tunnel handed to backends and cached connectors, so
/// the connector cache does not keep its own tunnel alive.
pub(crate) struct TunnelHandle {
    inner: Weak<TunnelInner>,
}

impl TunnelHandle {
    fn upgrade(&self) -> Result<Arc<TunnelInner>, TunnelError> {
        self.inner.upgrade().ok_or(TunnelError::TunnelDropped)
    }
}

#[async_trait]
impl Dialer for TunnelHandle {
    async fn dial(
        &self,
        cancel: &CancellationToken,
        network: &str,
        address: &str,
    ) -> Result<TrackedConnection, TunnelError> {
        self.upgrade()?.dial(cancel, network, address).await
    }
}

#[async_trait]
impl Driver for TunnelHandle {
    async fn open(&self, conn_str: &str) -> Result<Box<dyn Connection>, TunnelError> {
        let connector = self.upgrade()?.open_connector(conn_str)?;
        connector.connect(&CancellationToken::new()).await
    }

    fn open_connector(&self, conn_str: &str) -> Result<Arc<dyn Connector>, TunnelError> {
        let connector: Arc<dyn Connector> = self.upgrade()?.open_connector(conn_str)?;
        Ok(connector)
    }
}
