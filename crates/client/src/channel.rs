//! A multiplexed JSON-RPC channel over any byte stream.
//!
//! Outgoing lines go through a single writer task so concurrent callers
//! never interleave bytes.  A reader task frames the incoming stream and
//! routes each response to the caller parked on its id, so many requests
//! may be in flight at once and may complete in any order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;

use tw_protocol::{LineFramer, Message, Notification, Request, Response};

use crate::correlation::PendingCalls;
use crate::error::ClientError;

/// Lines queued for the writer task before senders wait.
const OUTBOUND_CAPACITY: usize = 64;

pub struct RpcChannel {
    label: String,
    outbound: mpsc::Sender<String>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
    request_timeout: Option<Duration>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RpcChannel {
    /// Start the reader and writer tasks.  `request_timeout` of `None`
    /// waits for a response indefinitely.
    pub fn start<R, W>(
        label: impl Into<String>,
        reader: R,
        writer: W,
        request_timeout: Option<Duration>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let label = label.into();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pending = Arc::new(PendingCalls::new());
        let alive = Arc::new(AtomicBool::new(true));

        let writer_task = tokio::spawn(write_loop(
            label.clone(),
            writer,
            outbound_rx,
            pending.clone(),
            alive.clone(),
        ));
        let reader_task = tokio::spawn(read_loop(
            label.clone(),
            reader,
            pending.clone(),
            alive.clone(),
        ));

        Self {
            label,
            outbound,
            pending,
            alive,
            request_timeout,
            reader_task,
            writer_task,
        }
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed);
        }

        let id = self.pending.allocate();
        let line = Message::from(Request::new(id, method, params)).encode_line()?;
        let rx = self.pending.register(id);

        // The reader marks the channel dead before draining, so either the
        // drain saw this entry or this check sees the flag.
        if !self.is_alive() {
            self.pending.take(id);
            return Err(ClientError::Closed);
        }

        tracing::debug!(channel = %self.label, id, method, "sending request");
        if self.outbound.send(line).await.is_err() {
            self.pending.take(id);
            return Err(ClientError::ConnectionFailed(format!(
                "{}: writer has stopped",
                self.label
            )));
        }

        self.pending.wait(id, rx, self.request_timeout).await
    }

    /// Send a notification.  No response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        if !self.is_alive() {
            return Err(ClientError::Closed);
        }
        let mut notification = Notification::new(method);
        notification.params = params;
        let line = Message::from(notification).encode_line()?;

        tracing::debug!(channel = %self.label, method, "sending notification");
        self.outbound.send(line).await.map_err(|_| {
            ClientError::ConnectionFailed(format!("{}: writer has stopped", self.label))
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Stop both tasks and fail every in-flight request with
    /// [`ClientError::Closed`].  Returns how many requests were failed.
    pub fn close(&self) -> usize {
        self.alive.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        self.writer_task.abort();
        let failed = self.pending.drain_with_error(|| ClientError::Closed);
        if failed > 0 {
            tracing::debug!(channel = %self.label, failed, "failed in-flight requests on close");
        }
        failed
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn read_loop<R>(label: String, reader: R, pending: Arc<PendingCalls>, alive: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LineFramer::new());

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(channel = %label, error = %e, "read failed");
                break;
            }
        };

        match Message::decode(&line) {
            Ok(Message::Response(response)) => route_response(&label, &pending, response),
            Ok(Message::Notification(n)) => {
                tracing::debug!(channel = %label, method = %n.method, "ignoring server notification");
            }
            Ok(Message::Request(r)) => {
                tracing::debug!(channel = %label, id = r.id, method = %r.method, "ignoring server request");
            }
            Err(e) => {
                tracing::warn!(channel = %label, error = %e, "dropping malformed message");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    let failed = pending.drain_with_error(|| {
        ClientError::ConnectionFailed(format!("{label}: connection closed by peer"))
    });
    tracing::debug!(channel = %label, failed, "reader finished");
}

fn route_response(label: &str, pending: &PendingCalls, response: Response) {
    let id = response.id;
    let delivered = match response.into_result() {
        Ok(value) => pending.resolve(id, value),
        Err(e) => pending.reject(id, ClientError::Rpc(e)),
    };
    if !delivered {
        tracing::debug!(channel = %label, id, "dropping response for unknown request id");
    }
}

async fn write_loop<W>(
    label: String,
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    pending: Arc<PendingCalls>,
    alive: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbound.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            tracing::warn!(channel = %label, error = %e, "write failed");
            alive.store(false, Ordering::SeqCst);
            let reason = format!("{label}: write failed: {e}");
            pending.drain_with_error(|| ClientError::ConnectionFailed(reason.clone()));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tw_protocol::RpcError;

    type ServerRx = FramedRead<ReadHalf<DuplexStream>, LineFramer>;
    type ServerTx = WriteHalf<DuplexStream>;

    fn pair(timeout: Option<Duration>) -> (Arc<RpcChannel>, ServerRx, ServerTx) {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (cr, cw) = tokio::io::split(client_io);
        let (sr, sw) = tokio::io::split(server_io);
        let channel = Arc::new(RpcChannel::start("test", cr, cw, timeout));
        (channel, FramedRead::new(sr, LineFramer::new()), sw)
    }

    async fn next_request(rx: &mut ServerRx) -> Request {
        let line = rx.next().await.unwrap().unwrap();
        match Message::decode(&line).unwrap() {
            Message::Request(r) => r,
            other => panic!("expected request, got {other:?}"),
        }
    }

    async fn reply(tx: &mut ServerTx, response: Response) {
        let line = Message::from(response).encode_line().unwrap();
        tx.write_all(line.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_requests_resolve_out_of_order() {
        let (channel, mut srx, mut stx) = pair(None);

        let a = tokio::spawn({
            let c = channel.clone();
            async move { c.request("tools/call", Some(json!({"name": "a"}))).await }
        });
        let first = next_request(&mut srx).await;
        let b = tokio::spawn({
            let c = channel.clone();
            async move { c.request("tools/call", Some(json!({"name": "b"}))).await }
        });
        let second = next_request(&mut srx).await;
        assert_ne!(first.id, second.id);

        // A stray id is ignored; the real answers come back reversed.
        reply(&mut stx, Response::success(999, json!("stray"))).await;
        reply(&mut stx, Response::success(second.id, json!("for b"))).await;
        reply(&mut stx, Response::success(first.id, json!("for a"))).await;

        assert_eq!(a.await.unwrap().unwrap(), json!("for a"));
        assert_eq!(b.await.unwrap().unwrap(), json!("for b"));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_response_becomes_rpc_error() {
        let (channel, mut srx, mut stx) = pair(None);
        let call = tokio::spawn({
            let c = channel.clone();
            async move { c.request("tools/call", Some(json!({"name": "nope"}))).await }
        });
        let req = next_request(&mut srx).await;
        reply(&mut stx, Response::failure(req.id, RpcError::tool_not_found("nope"))).await;

        let err = call.await.unwrap().unwrap_err();
        let rpc = err.rpc().unwrap();
        assert_eq!(rpc.code, -32601);
        assert_eq!(rpc.message, "Tool not found: nope");
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_the_reader() {
        let (channel, mut srx, mut stx) = pair(None);
        let call = tokio::spawn({
            let c = channel.clone();
            async move { c.request("ping", None).await }
        });
        let req = next_request(&mut srx).await;
        stx.write_all(b"not json\n{\"jsonrpc\":\"1.0\",\"id\":1}\n").await.unwrap();
        reply(&mut stx, Response::success(req.id, json!({}))).await;

        assert_eq!(call.await.unwrap().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn close_fails_pending_requests() {
        let (channel, mut srx, _stx) = pair(None);
        let calls: Vec<_> = (0..3)
            .map(|_| {
                let c = channel.clone();
                tokio::spawn(async move { c.request("ping", None).await })
            })
            .collect();
        for _ in 0..3 {
            next_request(&mut srx).await;
        }

        assert_eq!(channel.close(), 3);
        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(ClientError::Closed)));
        }
        assert!(matches!(channel.request("ping", None).await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn peer_eof_fails_pending_with_connection_error() {
        let (channel, mut srx, stx) = pair(None);
        let call = tokio::spawn({
            let c = channel.clone();
            async move { c.request("ping", None).await }
        });
        next_request(&mut srx).await;
        drop(stx);
        drop(srx);

        assert!(matches!(call.await.unwrap(), Err(ClientError::ConnectionFailed(_))));
        assert!(!channel.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_ignores_late_response() {
        let (channel, mut srx, mut stx) = pair(Some(Duration::from_millis(100)));
        let call = tokio::spawn({
            let c = channel.clone();
            async move { c.request("slow", None).await }
        });
        let req = next_request(&mut srx).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Timeout { id, .. } if id == req.id));

        // Arrives after the deadline and is dropped without effect.
        reply(&mut stx, Response::success(req.id, json!("late"))).await;
        tokio::task::yield_now().await;
        assert_eq!(channel.pending_count(), 0);
        assert!(channel.is_alive());
    }

    #[tokio::test]
    async fn notifications_carry_no_id() {
        let (channel, mut srx, _stx) = pair(None);
        channel.notify("notifications/initialized", None).await.unwrap();
        let line = srx.next().await.unwrap().unwrap();
        assert!(matches!(Message::decode(&line).unwrap(), Message::Notification(_)));
    }
}
