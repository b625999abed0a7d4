use std::sync::Arc;

use async_trait::async_trait;
use russh::Disconnect;
use russh::client::{self, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::SshError;
use crate::validation::split_host_port;

use super::auth;
use super::config::SshConfig;
use super::handler::ClientHandler;
use super::target::ForwardTarget;
use super::{EstablishedSession, ForwardStream, SessionClosed, SshLink, SshTransport};

/// russh-backed transport for tunnels.
#[derive(Debug, Clone, Default)]
pub struct SshClient;

impl SshClient {
    pub fn new() -> Self {
        Self
    }

    fn russh_config(config: &SshConfig) -> Config {
        Config {
            inactivity_timeout: config.inactivity_timeout,
            keepalive_interval: config.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        }
    }

    async fn establish_session(
        &self,
        stream: TcpStream,
        host: &str,
        port: u16,
        config: &SshConfig,
    ) -> Result<EstablishedSession, SshError> {
        let (guard, closed) = SessionClosed::channel();
        let handler = ClientHandler::new(host.to_string(), port, config.host_key.clone(), guard);

        let mut handle =
            client::connect_stream(Arc::new(Self::russh_config(config)), stream, handler)
                .await
                .map_err(|e| match e {
                    SshError::HostKeyVerification(_) => e,
                    other => SshError::ConnectionFailed {
                        host: host.to_string(),
                        port,
                        reason: other.to_string(),
                    },
                })?;

        if let Err(e) = auth::authenticate(&mut handle, &config.user, &config.auth, host, port).await
        {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(e);
        }

        Ok(EstablishedSession {
            link: Arc::new(SshConnection { handle }),
            closed,
        })
    }
}

#[async_trait]
impl SshTransport for SshClient {
    async fn handshake(
        &self,
        address: &str,
        config: &SshConfig,
    ) -> Result<EstablishedSession, SshError> {
        let (host, port) = split_host_port(address).map_err(|e| SshError::ConnectionFailed {
            host: address.to_string(),
            port: 0,
            reason: e.message,
        })?;

        // Connect with timeout
        let stream = timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| SshError::Timeout(address.to_string()))?
            .map_err(|e| SshError::ConnectionFailed {
                host: host.clone(),
                port,
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        match timeout(
            config.connect_timeout,
            self.establish_session(stream, &host, port, config),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SshError::Timeout(address.to_string())),
        }
    }
}

/// A live russh session.
pub struct SshConnection {
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl SshLink for SshConnection {
    async fn open_forward(&self, target: &ForwardTarget) -> Result<ForwardStream, SshError> {
        let channel = match target {
            ForwardTarget::Tcp { host, port } => {
                self.handle
                    .channel_open_direct_tcpip(host.as_str(), u32::from(*port), "127.0.0.1", 0)
                    .await
            }
            ForwardTarget::Unix(path) => {
                self.handle
                    .channel_open_direct_streamlocal(path.to_string_lossy().to_string())
                    .await
            }
        }
        .map_err(|e| SshError::Channel(format!("{target}: {e}")))?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(SshError::from)
    }
}
