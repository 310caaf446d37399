//! `toolwire serve` and `toolwire mailbox-server`: the demo tools behind the
//! pipe and mailbox transports.

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use tw_domain::config::Config;
use tw_server::tools::SERVER_NAME;
use tw_server::{builtin_registry, Dispatcher, MailboxServer};

fn demo_dispatcher() -> Dispatcher {
    Dispatcher::new(builtin_registry()).with_server_info(SERVER_NAME, env!("CARGO_PKG_VERSION"))
}

/// Serve over stdin/stdout until stdin closes or `shutdown` fires.
pub async fn serve(shutdown: CancellationToken) -> anyhow::Result<()> {
    tracing::info!(server = SERVER_NAME, "stdio server starting");
    tw_server::stdio::serve(
        demo_dispatcher(),
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
    )
    .await;
    tracing::info!("stdio server stopped");
    Ok(())
}

pub async fn mailbox_server(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let server = MailboxServer::from_config(demo_dispatcher(), &config.mailbox);
    server
        .run(shutdown)
        .await
        .context("mailbox server failed")
}
