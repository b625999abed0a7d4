use std::future::Future;

use russh::client::Handler;
use russh::keys::{HashAlg, PublicKey};

use crate::error::SshError;
use crate::security_log;

use super::SessionGuard;
use super::config::HostKeyPolicy;

/// SSH client handler implementation.
///
/// russh drops the handler when the session task ends, which releases the
/// session guard and wakes the tunnel's watcher.
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    _guard: SessionGuard,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy, guard: SessionGuard) -> Self {
        Self {
            host,
            port,
            policy,
            _guard: guard,
        }
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let verdict = verify_host_key(&self.policy, server_public_key);
        let host = self.host.clone();
        let port = self.port;
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256).to_string();

        async move {
            match verdict {
                HostKeyVerdict::Matched => {
                    tracing::debug!("Host key verified for {}:{}", host, port);
                    Ok(true)
                }
                HostKeyVerdict::Unverified => {
                    security_log::log_insecure_host_key(&host, port, &fingerprint);
                    Ok(true)
                }
                HostKeyVerdict::Mismatch => {
                    let reason = format!("server presented unexpected key {fingerprint}");
                    security_log::log_host_key_rejected(&host, port, &reason);
                    Err(SshError::HostKeyVerification(reason))
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HostKeyVerdict {
    Matched,
    Unverified,
    Mismatch,
}

fn verify_host_key(policy: &HostKeyPolicy, presented: &PublicKey) -> HostKeyVerdict {
    match policy {
        // comments are not part of the key identity
        HostKeyPolicy::Fixed(expected) if expected.key_data() == presented.key_data() => {
            HostKeyVerdict::Matched
        }
        HostKeyPolicy::Fixed(_) => HostKeyVerdict::Mismatch,
        HostKeyPolicy::InsecureIgnore => HostKeyVerdict::Unverified,
    }
}
