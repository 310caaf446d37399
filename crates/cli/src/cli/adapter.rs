//! `toolwire socket-adapter` and `toolwire mailbox-adapter`.

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tw_adapter::{MailboxAdapter, SocketAdapter};
use tw_domain::config::Config;

use super::child_command;

pub async fn socket_adapter(
    config: &Config,
    port: Option<u16>,
    argv: &[String],
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let command = child_command(argv, config)?;
    let addr = format!("{}:{}", config.socket.bind_host, port.unwrap_or(config.socket.port));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let adapter = SocketAdapter::start(&command)
        .await
        .with_context(|| format!("starting server {}", command.program))?;

    tracing::info!(addr = %addr, server = %command.program, "socket adapter ready");
    adapter.run(listener, shutdown).await?;
    Ok(())
}

pub async fn mailbox_adapter(
    config: &Config,
    argv: &[String],
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let command = child_command(argv, config)?;
    let adapter = MailboxAdapter::start(&command, &config.mailbox)
        .await
        .with_context(|| format!("starting server {}", command.program))?;

    tracing::info!(
        requests = %config.mailbox.requests_dir.display(),
        server = %command.program,
        "mailbox adapter ready"
    );
    adapter.run(shutdown).await?;
    Ok(())
}
