//! In-process SSH server fixtures

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::Channel;
use tokio::io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use sshdb::ssh::{load_private_key, load_public_key};

pub fn key_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/keys")
        .join(name)
}

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    ended: AtomicUsize,
}

/// A password and public key SSH server that allows direct-tcpip forwarding.
///
/// Every accepted connection is piped through a task the test can abort,
/// which cuts the session the way a network failure would.
pub struct TestSshServer {
    pub addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub host_key: PublicKey,
    counters: Arc<Counters>,
    pipes: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept: JoinHandle<()>,
}

impl TestSshServer {
    pub async fn start() -> Self {
        let host_key = load_private_key(&key_path("host_ed25519"), None).expect("host key");
        let host_public = host_key.public_key().clone();
        let client_key = load_public_key(&key_path("client_ed25519.pub")).expect("client key");

        let config = Arc::new(russh::server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ssh");
        let addr = listener.local_addr().expect("local addr");
        let counters = Arc::new(Counters::default());
        let pipes = Arc::new(Mutex::new(Vec::new()));

        let username = "tunnel".to_string();
        let password = "tunnel-secret".to_string();

        let accept = tokio::spawn({
            let counters = Arc::clone(&counters);
            let pipes = Arc::clone(&pipes);
            let username = username.clone();
            let password = password.clone();
            async move {
                while let Ok((mut tcp, _)) = listener.accept().await {
                    counters.started.fetch_add(1, Ordering::SeqCst);

                    let (mut near, far) = tokio::io::duplex(64 * 1024);
                    pipes.lock().push(tokio::spawn(async move {
                        let _ = copy_bidirectional(&mut tcp, &mut near).await;
                    }));

                    let handler = SessionHandler {
                        username: username.clone(),
                        password: password.clone(),
                        client_key: client_key.clone(),
                        counters: Arc::clone(&counters),
                    };
                    let config = Arc::clone(&config);
                    tokio::spawn(async move {
                        if let Err(e) = russh::server::run_stream(config, far, handler).await {
                            tracing::debug!("test server session failed: {}", e);
                        }
                    });
                }
            }
        });

        Self {
            addr,
            username,
            password,
            host_key: host_public,
            counters,
            pipes,
            accept,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Sessions whose TCP connection was accepted.
    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Sessions the server has finished with.
    pub fn ended(&self) -> usize {
        self.counters.ended.load(Ordering::SeqCst)
    }

    /// Drop every live connection without an SSH disconnect.
    pub fn kill_sessions(&self) {
        for pipe in self.pipes.lock().drain(..) {
            pipe.abort();
        }
    }
}

impl Drop for TestSshServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.kill_sessions();
    }
}

struct SessionHandler {
    username: String,
    password: String,
    client_key: PublicKey,
    counters: Arc<Counters>,
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.counters.ended.fetch_add(1, Ordering::SeqCst);
    }
}

impl russh::server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == self.username && password == self.password {
            Ok(Auth::Accept)
        } else {
            Err(russh::Error::NotAuthenticated)
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user == self.username && public_key.key_data() == self.client_key.key_data() {
            Ok(Auth::Accept)
        } else {
            Err(russh::Error::NotAuthenticated)
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let Ok(mut upstream) = TcpStream::connect((host_to_connect, port)).await else {
            return Ok(false);
        };
        tokio::spawn(async move {
            let mut stream = channel.into_stream();
            let _ = copy_bidirectional(&mut stream, &mut upstream).await;
        });
        Ok(true)
    }
}

/// A TCP listener that echoes whatever it reads, standing in for a database.
pub struct EchoServer {
    pub addr: SocketAddr,
    accept: JoinHandle<()>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
        let addr = listener.local_addr().expect("local addr");
        let accept = tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        Self { addr, accept }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
