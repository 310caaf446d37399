mod mailbox;
mod observability;
mod server;
mod socket;

pub use mailbox::*;
pub use observability::*;
pub use server::*;
pub use socket::*;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TOOLWIRE_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "toolwire.toml";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every section is optional; an empty file yields the built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    /// Child server spawned by the adapters.
    #[serde(default)]
    pub server: ChildServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.socket.port, 4000);
        assert_eq!(cfg.mailbox.timeout_ms, 5000);
        assert!(cfg.server.command.is_none());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[socket\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.socket.host, "127.0.0.1");
    }

    #[test]
    fn load_reports_path_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolwire.toml");
        std::fs::write(&path, "mailbox = 3").unwrap();
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("toolwire.toml"), "got: {err}");
    }
}
