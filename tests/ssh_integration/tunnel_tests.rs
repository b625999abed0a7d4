//! End-to-end tunnel tests over a real SSH session

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sshdb::backends::StreamBackend;
use sshdb::ssh::load_private_key;
use sshdb::{
    Connection, Connector, HostKeyPolicy, SshConfig, SshError, Tunnel, TunnelError, TunnelState,
};

use super::common::{assert_echo, init_tracing, open_stream, wait_until};
use super::fixtures::{EchoServer, TestSshServer, key_path};

fn password_tunnel(server: &TestSshServer) -> Tunnel {
    let cfg = SshConfig::new(&server.username, HostKeyPolicy::Fixed(server.host_key.clone()))
        .with_password(server.password.clone())
        .with_connect_timeout(Duration::from_secs(10));
    Tunnel::new(Arc::new(StreamBackend), cfg, &server.address()).expect("tunnel")
}

#[tokio::test]
async fn connections_share_one_session_until_the_last_closes() {
    init_tracing();
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;
    let tunnel = password_tunnel(&server);

    let connector = tunnel.open_connector(&echo.address()).unwrap();
    let (cancel_a, cancel_b) = (CancellationToken::new(), CancellationToken::new());
    let (a, b) = tokio::join!(
        connector.connect(&cancel_a),
        connector.connect(&cancel_b),
    );
    let mut a = a.expect("first connection");
    let mut b = b.expect("second connection");

    a.ping().await.unwrap();
    b.ping().await.unwrap();
    assert_eq!(server.started(), 1);
    assert_eq!(tunnel.conn_count().await, 2);

    a.close().await.unwrap();
    assert_eq!(tunnel.conn_count().await, 1);
    assert_eq!(tunnel.state().await, TunnelState::Connected);
    b.ping().await.unwrap();

    b.close().await.unwrap();
    assert_eq!(tunnel.conn_count().await, 0);
    assert_eq!(tunnel.state().await, TunnelState::Reset);
    assert!(wait_until(|| async { server.ended() == 1 }).await);
}

#[tokio::test]
async fn forwarded_bytes_reach_the_remote_listener() {
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;
    let tunnel = password_tunnel(&server);

    let mut conn = open_stream(&tunnel, &echo.address()).await;
    assert_echo(&mut conn, b"SELECT 1;").await;
    assert_echo(&mut conn, &[0u8, 1, 2, 3, 255]).await;
    conn.close().await.unwrap();
}

#[tokio::test]
async fn lost_session_is_replaced_on_next_dial() {
    init_tracing();
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;
    let tunnel = password_tunnel(&server);

    let _a = open_stream(&tunnel, &echo.address()).await;
    let _b = open_stream(&tunnel, &echo.address()).await;
    assert_eq!(tunnel.conn_count().await, 2);

    server.kill_sessions();
    assert!(wait_until(|| async { tunnel.conn_count().await == 0 }).await);
    assert_eq!(tunnel.state().await, TunnelState::Reset);

    let mut fresh = open_stream(&tunnel, &echo.address()).await;
    assert_echo(&mut fresh, b"back again").await;
    assert_eq!(server.started(), 2);
}

#[tokio::test]
async fn public_key_authentication() {
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;

    let key = load_private_key(&key_path("client_ed25519"), None).unwrap();
    let cfg = SshConfig::new(&server.username, HostKeyPolicy::Fixed(server.host_key.clone()))
        .with_private_key(key);
    let tunnel = Tunnel::new(Arc::new(StreamBackend), cfg, &server.address()).unwrap();

    let mut conn = open_stream(&tunnel, &echo.address()).await;
    assert_echo(&mut conn, b"keyed").await;
}

#[tokio::test]
async fn unexpected_host_key_is_rejected() {
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;

    let wrong = sshdb::ssh::load_public_key(&key_path("client_ed25519.pub")).unwrap();
    let cfg = SshConfig::new(&server.username, HostKeyPolicy::Fixed(wrong))
        .with_password(server.password.clone());
    let tunnel = Tunnel::new(Arc::new(StreamBackend), cfg, &server.address()).unwrap();

    let err = tunnel
        .dial(&CancellationToken::new(), "tcp", &echo.address())
        .await
        .unwrap_err();
    assert!(
        matches!(err, TunnelError::Dial(SshError::HostKeyVerification(_))),
        "unexpected error: {err:?}"
    );
    assert_eq!(tunnel.state().await, TunnelState::Reset);
}

#[tokio::test]
async fn wrong_password_fails_the_dial() {
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;

    let cfg = SshConfig::new(&server.username, HostKeyPolicy::InsecureIgnore)
        .with_password("not-the-password");
    let tunnel = Tunnel::new(Arc::new(StreamBackend), cfg, &server.address()).unwrap();

    let err = tunnel
        .dial(&CancellationToken::new(), "tcp", &echo.address())
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Dial(_)), "unexpected error: {err:?}");
    assert_eq!(tunnel.conn_count().await, 0);
}

#[tokio::test]
async fn refused_forward_keeps_the_session() {
    let server = TestSshServer::start().await;
    let echo = EchoServer::start().await;
    let tunnel = password_tunnel(&server);

    let _live = open_stream(&tunnel, &echo.address()).await;

    // nothing listens on the closed port
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed_addr = closed.local_addr().unwrap().to_string();
    drop(closed);

    let err = tunnel
        .dial(&CancellationToken::new(), "tcp", &closed_addr)
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Dial(SshError::Channel(_))), "{err:?}");
    assert_eq!(tunnel.conn_count().await, 1);
    assert_eq!(server.started(), 1);
}

#[tokio::test]
async fn unreachable_ssh_host_is_a_connection_failure() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = closed.local_addr().unwrap().to_string();
    drop(closed);

    let cfg = SshConfig::new("tunnel", HostKeyPolicy::InsecureIgnore)
        .with_password("x")
        .with_connect_timeout(Duration::from_secs(2));
    let tunnel = Tunnel::new(Arc::new(StreamBackend), cfg, &addr).unwrap();

    let err = tunnel
        .dial(&CancellationToken::new(), "tcp", "db.internal:5432")
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            TunnelError::Dial(SshError::ConnectionFailed { .. } | SshError::Timeout(_))
        ),
        "{err:?}"
    );
}
