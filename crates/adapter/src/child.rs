//! A pipe-transport server running as a child process, shared by the
//! adapters.
//!
//! Requests from many callers are multiplexed onto the child's stdin.  Each
//! forwarded request gets a fresh child-side id; the correlation table maps
//! that id back to the caller's original id and a caller-defined route
//! (`R`), so callers that reuse the same ids never collide.  Answers come
//! back on a [`Delivery`] channel with the original id restored.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tw_client::CorrelationTable;
use tw_domain::config::ServerCommand;
use tw_protocol::mcp::{self, methods, InitializeResult};
use tw_protocol::{
    LineFramer, Message, Notification, ProtocolError, Request, RequestId, Response, RpcError,
};

use crate::error::{AdapterError, Result};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long [`ChildServer::shutdown`] waits for the child after closing its
/// stdin before killing it.
const EXIT_GRACE: Duration = Duration::from_secs(2);

const OUTBOUND_CAPACITY: usize = 64;

/// A child response on its way back to the caller that sent the request.
#[derive(Debug)]
pub struct Delivery<R> {
    pub route: R,
    /// Carries the caller's original id.
    pub response: Response,
}

enum Slot<R> {
    Handshake(oneshot::Sender<Response>),
    Forward { original_id: RequestId, route: R },
}

pub struct ChildServer<R> {
    label: String,
    outbound: mpsc::Sender<String>,
    table: Arc<CorrelationTable<Slot<R>>>,
    exited: CancellationToken,
    child: tokio::sync::Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl<R: Send + 'static> ChildServer<R> {
    /// Spawn `command` with piped stdin/stdout.  The child's stderr is
    /// inherited.
    pub fn spawn(command: &ServerCommand) -> Result<(Self, mpsc::UnboundedReceiver<Delivery<R>>)> {
        let program = command.program.clone();
        let spawn_err = |source: std::io::Error| AdapterError::Spawn {
            program: program.clone(),
            source,
        };

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        tracing::info!(program = %command.program, pid = ?child.id(), "server process started");
        let (mut server, deliveries) = Self::from_io(format!("child:{program}"), stdout, stdin);
        *server.child.get_mut() = Some(child);
        Ok((server, deliveries))
    }

    /// Drive an already-connected server over `reader`/`writer`.
    pub fn from_io<Rd, Wr>(
        label: impl Into<String>,
        reader: Rd,
        writer: Wr,
    ) -> (Self, mpsc::UnboundedReceiver<Delivery<R>>)
    where
        Rd: AsyncRead + Unpin + Send + 'static,
        Wr: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let table = Arc::new(CorrelationTable::new());
        let exited = CancellationToken::new();

        let writer_task = tokio::spawn(write_loop(label.clone(), writer, outbound_rx));
        let reader_task = tokio::spawn(read_loop(
            label.clone(),
            reader,
            table.clone(),
            deliveries_tx,
            exited.clone(),
        ));

        let server = Self {
            label,
            outbound,
            table,
            exited,
            child: tokio::sync::Mutex::new(None),
            reader_task,
            writer_task,
        };
        (server, deliveries_rx)
    }

    /// Run `initialize` and announce `notifications/initialized`.
    pub async fn handshake(&self, client_name: &str, timeout: Duration) -> Result<InitializeResult> {
        let (tx, rx) = oneshot::channel();
        let id = self.table.insert_new(Slot::Handshake(tx));

        let params = serde_json::to_value(mcp::initialize_params(client_name)).map_err(ProtocolError::from)?;
        let line = Message::from(Request::new(id, methods::INITIALIZE, Some(params))).encode_line()?;
        if self.outbound.send(line).await.is_err() {
            self.table.take(id);
            return Err(AdapterError::ChildExited);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(AdapterError::ChildExited),
            Err(_) => {
                self.table.take(id);
                return Err(AdapterError::Handshake(format!(
                    "no initialize response within {timeout:?}"
                )));
            }
        };

        let value = response
            .into_result()
            .map_err(|e| AdapterError::Handshake(e.to_string()))?;
        let info: InitializeResult = serde_json::from_value(value)
            .map_err(|e| AdapterError::Handshake(format!("unexpected initialize result: {e}")))?;

        let initialized = Message::from(Notification::new(methods::INITIALIZED)).encode_line()?;
        self.outbound
            .send(initialized)
            .await
            .map_err(|_| AdapterError::ChildExited)?;

        tracing::info!(
            child = %self.label,
            server = ?info.server_info.as_ref().map(|s| &s.name),
            protocol = %info.protocol_version,
            "server handshake complete"
        );
        Ok(info)
    }

    /// Send `request` to the child under a fresh id.  Its answer arrives on
    /// the delivery channel tagged with `route`.
    ///
    /// On `Err` nothing will be delivered and the caller answers for itself.
    pub async fn forward(&self, request: Request, route: R) -> Result<()> {
        let span = tracing::info_span!(
            "child.forward",
            child = %self.label,
            original_id = request.id,
            method = %request.method
        );
        self.send_request(request, route).instrument(span).await
    }

    async fn send_request(&self, mut request: Request, route: R) -> Result<()> {
        if !self.is_alive() {
            return Err(AdapterError::ChildExited);
        }

        let original_id = request.id;
        let method = request.method.clone();
        let child_id = self.table.insert_new(Slot::Forward { original_id, route });
        request.id = child_id;

        let line = match Message::from(request).encode_line() {
            Ok(line) => line,
            Err(e) => {
                self.table.take(child_id);
                return Err(e.into());
            }
        };

        // The reader flags exit before draining: either the drain saw this
        // entry and answers it, or it is still here for us to withdraw.
        if !self.is_alive() || self.outbound.send(line).await.is_err() {
            return match self.table.take(child_id) {
                Some(_) => Err(AdapterError::ChildExited),
                None => Ok(()),
            };
        }

        tracing::debug!(child = %self.label, original_id, child_id, method = %method, "forwarded request");
        Ok(())
    }
}

impl<R> ChildServer<R> {
    /// Requests sent to the child and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    pub fn is_alive(&self) -> bool {
        !self.exited.is_cancelled()
    }

    /// Resolves once the child's output has closed and every in-flight
    /// request has been answered with an error.
    pub async fn exited(&self) {
        self.exited.cancelled().await
    }

    /// Close the child's stdin, wait briefly for it to exit, then kill it.
    pub async fn shutdown(&self) {
        self.writer_task.abort();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(child = %self.label, ?status, "server process exited"),
                Ok(Err(e)) => tracing::warn!(child = %self.label, error = %e, "error waiting for server process"),
                Err(_) => {
                    tracing::warn!(child = %self.label, "server process did not exit, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(child = %self.label, error = %e, "failed to kill server process");
                    }
                }
            }
        }
        self.reader_task.abort();
    }
}

impl<R> Drop for ChildServer<R> {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop<R, Rd>(
    label: String,
    reader: Rd,
    table: Arc<CorrelationTable<Slot<R>>>,
    deliveries: mpsc::UnboundedSender<Delivery<R>>,
    exited: CancellationToken,
) where
    Rd: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LineFramer::new());
    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(child = %label, error = %e, "read from server failed");
                break;
            }
        };
        match Message::decode(&line) {
            Ok(Message::Response(response)) => route_response(&label, &table, &deliveries, response),
            Ok(other) => {
                tracing::debug!(child = %label, id = ?other.id(), "ignoring non-response from server");
            }
            Err(e) => {
                tracing::warn!(child = %label, error = %e, "dropping malformed message from server");
            }
        }
    }

    exited.cancel();
    let mut answered = 0usize;
    for (_, slot) in table.drain() {
        if let Slot::Forward { original_id, route } = slot {
            let response = Response::failure(
                original_id,
                RpcError::internal(AdapterError::ChildExited.to_string()),
            );
            let _ = deliveries.send(Delivery { route, response });
            answered += 1;
        }
    }
    tracing::warn!(child = %label, answered, "server process output closed");
}

fn route_response<R>(
    label: &str,
    table: &CorrelationTable<Slot<R>>,
    deliveries: &mpsc::UnboundedSender<Delivery<R>>,
    mut response: Response,
) {
    match table.take(response.id) {
        Some(Slot::Handshake(tx)) => {
            let _ = tx.send(response);
        }
        Some(Slot::Forward { original_id, route }) => {
            response.id = original_id;
            if deliveries.send(Delivery { route, response }).is_err() {
                tracing::debug!(child = %label, original_id, "no one is waiting for deliveries");
            }
        }
        None => {
            tracing::debug!(child = %label, id = response.id, "dropping response for unknown id");
        }
    }
}

async fn write_loop<W>(label: String, mut writer: W, mut outbound: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(child = %label, error = %e, "write to server failed");
            return;
        }
    }
}
