use std::fmt;
use std::path::PathBuf;

use crate::error::SshError;
use crate::validation::split_host_port;

/// Destination of a forwarded channel, as seen from the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTarget {
    /// `direct-tcpip` to a host and port
    Tcp { host: String, port: u16 },
    /// `direct-streamlocal@openssh.com` to a unix socket path
    Unix(PathBuf),
}

impl ForwardTarget {
    /// Parse a dial address. A leading `/` selects a unix socket.
    pub fn parse(address: &str) -> Result<Self, SshError> {
        if address.starts_with('/') {
            return Ok(ForwardTarget::Unix(PathBuf::from(address)));
        }
        let (host, port) =
            split_host_port(address).map_err(|e| SshError::InvalidTarget(e.message))?;
        Ok(ForwardTarget::Tcp { host, port })
    }

    pub fn network(&self) -> &'static str {
        match self {
            ForwardTarget::Tcp { .. } => "tcp",
            ForwardTarget::Unix(_) => "unix",
        }
    }
}

impl fmt::Display for ForwardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardTarget::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            ForwardTarget::Tcp { host, port } => write!(f, "{host}:{port}"),
            ForwardTarget::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}
