pub mod adapter;
pub mod interactive;
pub mod serve;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tw_domain::config::{Config, ServerCommand, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};

/// toolwire: call tools over pipes, sockets and mailbox directories.
#[derive(Debug, Parser)]
#[command(name = "toolwire", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the demo tools over stdin/stdout.
    Serve,
    /// Serve the demo tools from the mailbox directories.
    MailboxServer,
    /// Put a pipe server behind a TCP listener.
    SocketAdapter {
        /// Port to listen on (defaults to `[socket] port`).
        #[arg(long)]
        port: Option<u16>,
        /// Server command line, after `--` (defaults to `[server]`, then
        /// `toolwire serve`).
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Put a pipe server behind the mailbox directories.
    MailboxAdapter {
        /// Server command line, after `--`.
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Interactive client for a server spawned as a child process.
    Pipe {
        /// Server command followed by its arguments.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Interactive client for a socket server.
    Socket {
        /// Host to connect to (defaults to `[socket] host`).
        host: Option<String>,
        /// Port to connect to (defaults to `[socket] port`).
        port: Option<String>,
    },
    /// Interactive client for the mailbox directories.
    Mailbox,
    /// Print version information.
    Version,
}

// ── Tracing defaults ──────────────────────────────────────────────────

/// `RUST_LOG` fallback for the long-running roles.  The adapter logs every
/// forwarded request at debug.
pub const SERVICE_LOG_FILTER: &str = "info,tw_adapter=debug";

/// `RUST_LOG` fallback for the interactive clients.
pub const CLIENT_LOG_FILTER: &str = "warn";

/// Instrumentation scope reported to the OpenTelemetry collector.
pub const TRACER_NAME: &str = "toolwire-cli";

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `TOOLWIRE_CONFIG` (or `toolwire.toml`).
/// A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    Config::load(&path).map_err(|e| anyhow::anyhow!("loading {path}: {e}"))
}

/// The server the adapters spawn: an explicit command line, else the
/// `[server]` section, else this executable running `serve`.
pub fn child_command(argv: &[String], config: &Config) -> anyhow::Result<ServerCommand> {
    if let Some(command) = ServerCommand::from_argv(argv) {
        return Ok(command);
    }
    if let Some(command) = config.server.to_command() {
        return Ok(command);
    }
    let exe = std::env::current_exe()
        .map_err(|e| anyhow::anyhow!("cannot locate the toolwire executable: {e}"))?;
    Ok(ServerCommand::new(exe.to_string_lossy()).args(["serve"]))
}

/// A token cancelled on Ctrl-C (or SIGTERM on unix).
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot register SIGTERM handler");
                if ctrl_c.await.is_ok() {
                    tracing::info!("received SIGINT, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_ok() {
            tracing::info!("received SIGINT, shutting down");
        }
    }
}
