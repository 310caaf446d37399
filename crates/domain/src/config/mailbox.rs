use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mailbox transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Directory pair and polling cadence for the file-based transport.
///
/// Clients, the mailbox server, and the mailbox adapter must all agree on
/// the two directories; they are created on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    #[serde(default = "d_requests_dir")]
    pub requests_dir: PathBuf,
    #[serde(default = "d_responses_dir")]
    pub responses_dir: PathBuf,
    /// How often a waiting client checks for its response file.
    #[serde(default = "d_client_poll_ms")]
    pub client_poll_ms: u64,
    /// How often the server / adapter scans the requests directory.
    #[serde(default = "d_server_poll_ms")]
    pub server_poll_ms: u64,
    /// How long a client waits for a response file before giving up.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            requests_dir: d_requests_dir(),
            responses_dir: d_responses_dir(),
            client_poll_ms: d_client_poll_ms(),
            server_poll_ms: d_server_poll_ms(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

impl MailboxConfig {
    pub fn client_poll_interval(&self) -> Duration {
        Duration::from_millis(self.client_poll_ms)
    }

    pub fn server_poll_interval(&self) -> Duration {
        Duration::from_millis(self.server_poll_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn d_requests_dir() -> PathBuf {
    PathBuf::from("mailbox-requests")
}

fn d_responses_dir() -> PathBuf {
    PathBuf::from("mailbox-responses")
}

fn d_client_poll_ms() -> u64 {
    50
}

fn d_server_poll_ms() -> u64 {
    100
}

fn d_timeout_ms() -> u64 {
    5000
}
