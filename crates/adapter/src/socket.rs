//! The socket adapter: accept TCP connections and relay their line-framed
//! requests to a single pipe server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tw_domain::config::ServerCommand;
use tw_protocol::{LineFramer, Message, Response, RpcError};

use crate::child::{ChildServer, Delivery, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::error::{AdapterError, Result};
use crate::ADAPTER_CLIENT_NAME;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where a child response goes: the writer of the connection that asked.
#[derive(Debug, Clone)]
pub struct ConnectionRoute {
    conn: u64,
    tx: mpsc::UnboundedSender<String>,
}

pub struct SocketAdapter {
    child: Arc<ChildServer<ConnectionRoute>>,
    deliveries: mpsc::UnboundedReceiver<Delivery<ConnectionRoute>>,
}

impl SocketAdapter {
    pub fn new(
        child: ChildServer<ConnectionRoute>,
        deliveries: mpsc::UnboundedReceiver<Delivery<ConnectionRoute>>,
    ) -> Self {
        Self {
            child: Arc::new(child),
            deliveries,
        }
    }

    /// Spawn `command` and complete the handshake with it.
    pub async fn start(command: &ServerCommand) -> Result<Self> {
        let (child, deliveries) = ChildServer::spawn(command)?;
        if let Err(e) = child.handshake(ADAPTER_CLIENT_NAME, DEFAULT_HANDSHAKE_TIMEOUT).await {
            child.shutdown().await;
            return Err(e);
        }
        Ok(Self::new(child, deliveries))
    }

    pub fn child(&self) -> &ChildServer<ConnectionRoute> {
        &self.child
    }

    /// Accept connections until `shutdown` is cancelled or the child exits.
    ///
    /// Returns [`AdapterError::ChildExited`] in the second case, after every
    /// in-flight request has been answered with an error.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let Self {
            child,
            mut deliveries,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "socket adapter listening");
        }

        let pump = tokio::spawn(async move {
            while let Some(Delivery { route, response }) = deliveries.recv().await {
                let id = response.id;
                match Message::from(response).encode_line() {
                    Ok(line) => {
                        if route.tx.send(line).is_err() {
                            tracing::debug!(conn = route.conn, id, "connection gone before its response");
                        }
                    }
                    Err(e) => tracing::warn!(conn = route.conn, id, error = %e, "failed to encode response"),
                }
            }
        });

        let mut next_conn = 0u64;
        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = child.exited() => break Err(AdapterError::ChildExited),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_conn += 1;
                        let span = tracing::info_span!("connection", conn = next_conn, peer = %peer);
                        tokio::spawn(
                            handle_connection(child.clone(), stream, peer, next_conn, shutdown.clone())
                                .instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        };

        match &outcome {
            Ok(()) => {
                child.shutdown().await;
                pump.abort();
                tracing::info!("socket adapter stopped");
            }
            Err(e) => {
                // The pump ends once the exit drain has been delivered.
                let _ = pump.await;
                tracing::error!(error = %e, "socket adapter stopping");
            }
        }
        outcome
    }
}

async fn handle_connection(
    child: Arc<ChildServer<ConnectionRoute>>,
    stream: TcpStream,
    peer: SocketAddr,
    conn: u64,
    shutdown: CancellationToken,
) {
    tracing::info!(conn, peer = %peer, "connection accepted");
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                tracing::debug!(conn, error = %e, "write to connection failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut frames = FramedRead::new(read_half, LineFramer::new());
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => frame,
        };
        let line = match frame {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(conn, error = %e, "read from connection failed");
                break;
            }
            None => break,
        };

        match Message::decode(&line) {
            Ok(Message::Request(request)) => {
                let id = request.id;
                let route = ConnectionRoute { conn, tx: tx.clone() };
                if let Err(e) = child.forward(request, route).await {
                    tracing::warn!(conn, id, error = %e, "cannot forward request");
                    let failure = Response::failure(id, RpcError::internal(e.to_string()));
                    if let Ok(line) = Message::from(failure).encode_line() {
                        let _ = tx.send(line);
                    }
                }
            }
            Ok(other) => {
                tracing::debug!(conn, id = ?other.id(), "ignoring non-request from client");
            }
            Err(e) => {
                tracing::warn!(conn, error = %e, "dropping malformed line from client");
            }
        }
    }

    // Responses still in flight keep the writer alive until they land.
    drop(tx);
    if shutdown.is_cancelled() {
        writer.abort();
    } else {
        let _ = writer.await;
    }
    tracing::info!(conn, "connection closed");
}
