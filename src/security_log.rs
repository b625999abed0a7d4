//! Audit events for the SSH sessions that carry database traffic.
//!
//! Everything here logs with `target: "security"`, so operators can route
//! or filter it separately:
//! ```bash
//! RUST_LOG=security=info ./your-service
//! ```

use tracing::{info, warn};

/// The SSH server and login an event refers to.
#[derive(Debug, Clone, Copy)]
pub struct SshPeer<'a> {
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum AuthOutcome<'a> {
    Attempt,
    Accepted,
    /// The server declined the method; the next one is tried.
    Declined,
    Failed(&'a str),
}

pub fn log_auth(peer: SshPeer<'_>, method: &str, outcome: AuthOutcome<'_>) {
    let SshPeer { host, port, user } = peer;
    match outcome {
        AuthOutcome::Attempt => info!(
            target: "security",
            event = "auth_attempt",
            host, port, user, method,
            "SSH authentication attempt"
        ),
        AuthOutcome::Accepted => info!(
            target: "security",
            event = "auth_success",
            host, port, user, method,
            "SSH authentication succeeded"
        ),
        AuthOutcome::Declined => warn!(
            target: "security",
            event = "auth_failure",
            host, port, user, method,
            reason = "rejected by server",
            "SSH authentication failed"
        ),
        AuthOutcome::Failed(reason) => warn!(
            target: "security",
            event = "auth_failure",
            host, port, user, method, reason,
            "SSH authentication failed"
        ),
    }
}

/// The server presented a key other than the pinned one.
pub fn log_host_key_rejected(host: &str, port: u16, reason: &str) {
    warn!(target: "security", event = "host_key_rejected", host, port, reason, "Host key rejected");
}

pub fn log_insecure_host_key(host: &str, port: u16, fingerprint: &str) {
    warn!(
        target: "security",
        event = "host_key_unverified",
        host, port, fingerprint,
        "Accepting unverified host key (insecure host key policy)"
    );
}

/// A tunnel's session became usable for forwarding.
pub fn log_ssh_session_opened(peer: SshPeer<'_>, epoch: u64) {
    let SshPeer { host, port, user } = peer;
    info!(target: "security", event = "ssh_session_opened", host, port, user, epoch, "SSH session opened");
}

pub fn log_ssh_session_closed(address: &str, epoch: u64, reason: &str) {
    info!(
        target: "security",
        event = "ssh_session_closed",
        address, epoch, reason,
        "SSH session closed"
    );
}
