//! Common test utilities
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sshdb::backend::{Backend, Connector, Dialer};
use sshdb::backends::{StreamBackend, StreamConnection};
use sshdb::error::{BoxError, SshError};
use sshdb::ssh::{
    EstablishedSession, ForwardStream, ForwardTarget, SessionClosed, SessionGuard, SshLink,
    SshTransport,
};
use sshdb::{HostKeyPolicy, SshConfig, TrackedConnection, Tunnel};

pub fn init_tracing() {
    let _ = sshdb::logging::init_logging(None);
}

pub fn password_config() -> SshConfig {
    SshConfig::new("dbuser", HostKeyPolicy::InsecureIgnore).with_password("secret")
}

#[derive(Default)]
struct MemoryState {
    handshakes: AtomicUsize,
    sessions_closed: AtomicUsize,
    fail_next: AtomicBool,
    cancel_during_handshake: Mutex<Option<CancellationToken>>,
    unreachable: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    live: Mutex<Vec<Arc<MemoryLink>>>,
}

/// In-memory SSH transport. Every forwarded channel is an echo stream.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    /// Make the next handshake fail.
    pub fn fail_next_handshake(&self) {
        self.state.fail_next.store(true, Ordering::SeqCst);
    }

    /// Cancel `token` while the next handshake is in flight.
    pub fn cancel_during_next_handshake(&self, token: CancellationToken) {
        *self.state.cancel_during_handshake.lock() = Some(token);
    }

    pub fn set_unreachable(&self, target: &str) {
        self.state.unreachable.lock().insert(target.to_string());
    }

    /// Delay channel opens to `target`, holding up the dial that opens them.
    pub fn set_slow(&self, target: &str, delay: Duration) {
        self.state.slow.lock().insert(target.to_string(), delay);
    }

    /// Kill every live session as a network failure would.
    pub fn kill_all(&self) {
        let live: Vec<_> = self.state.live.lock().drain(..).collect();
        for link in live {
            link.terminate();
        }
    }

    pub fn tunnel(&self, backend: Arc<dyn Backend>) -> Tunnel {
        Tunnel::builder()
            .backend(backend)
            .ssh_config(password_config())
            .address("bastion.example.com:22")
            .transport(Arc::new(self.clone()))
            .build()
            .expect("valid tunnel")
    }
}

#[async_trait]
impl SshTransport for MemoryTransport {
    async fn handshake(
        &self,
        address: &str,
        _config: &SshConfig,
    ) -> Result<EstablishedSession, SshError> {
        self.state.handshakes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if let Some(token) = self.state.cancel_during_handshake.lock().take() {
            token.cancel();
        }
        if self.state.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SshError::ConnectionFailed {
                host: address.to_string(),
                port: 22,
                reason: "connection refused".to_string(),
            });
        }

        let (guard, closed) = SessionClosed::channel();
        let link = Arc::new(MemoryLink {
            guard: Mutex::new(Some(guard)),
            echoes: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        });
        self.state.live.lock().push(Arc::clone(&link));
        Ok(EstablishedSession { link, closed })
    }
}

struct MemoryLink {
    guard: Mutex<Option<SessionGuard>>,
    echoes: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    state: Arc<MemoryState>,
}

impl MemoryLink {
    fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for echo in self.echoes.lock().drain(..) {
            echo.abort();
        }
        self.guard.lock().take();
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshLink for MemoryLink {
    async fn open_forward(&self, target: &ForwardTarget) -> Result<ForwardStream, SshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SshError::Channel("session closed".to_string()));
        }
        if self.state.unreachable.lock().contains(&target.to_string()) {
            return Err(SshError::Channel(format!("{target}: connect failed")));
        }
        let delay = self.state.slow.lock().get(&target.to_string()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (client, mut server) = tokio::io::duplex(4096);
        let echo = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if server.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.echoes.lock().push(echo);
        Ok(Box::new(client))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.terminate();
        Ok(())
    }
}

/// Stream backend that counts how often it builds a connector.
#[derive(Default)]
pub struct CountingBackend {
    opened: AtomicUsize,
}

impl CountingBackend {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn open_connector(
        &self,
        dialer: Arc<dyn Dialer>,
        conn_str: &str,
    ) -> Result<Box<dyn Connector>, BoxError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        StreamBackend.open_connector(dialer, conn_str)
    }
}

/// Connect through the tunnel's connector for `target` and unwrap the raw stream.
pub async fn open_stream(tunnel: &Tunnel, target: &str) -> TrackedConnection {
    let conn = tunnel
        .open_connector(target)
        .expect("connector")
        .connect(&CancellationToken::new())
        .await
        .expect("connect");
    conn.into_any()
        .downcast::<StreamConnection>()
        .expect("stream connection")
        .into_inner()
}

/// Write `payload` and read it back.
pub async fn assert_echo(conn: &mut TrackedConnection, payload: &[u8]) {
    conn.write_all(payload).await.expect("write");
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .expect("read");
    assert_eq!(buf, payload);
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
