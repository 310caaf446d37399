use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Host the socket client connects to.
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_4000")]
    pub port: u16,
    /// Interface the socket adapter listens on.
    #[serde(default = "d_bind_host")]
    pub bind_host: String,
    /// Per-call timeout applied by the socket client.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_4000(),
            bind_host: d_bind_host(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

impl SocketConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `bind_host:port`, the adapter's listen address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn d_host() -> String {
    "127.0.0.1".into()
}

fn d_4000() -> u16 {
    4000
}

fn d_bind_host() -> String {
    "0.0.0.0".into()
}

fn d_request_timeout_ms() -> u64 {
    5000
}
