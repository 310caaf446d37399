//! The pipe-transport server loop: newline-delimited JSON-RPC on a reader
//! and writer pair (stdin/stdout in `toolwire serve`).

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use tw_protocol::{LineFramer, Message};

use crate::dispatch::Dispatcher;

const OUTBOUND_CAPACITY: usize = 64;

/// Serve requests from `reader` until EOF or `shutdown`.
///
/// Each request is dispatched on its own task, so a slow tool does not hold
/// up the ones behind it; responses may therefore be written out of order.
/// Responses still in progress when the input closes are written before
/// this returns.
pub async fn serve<R, W>(dispatcher: Dispatcher, reader: R, writer: W, shutdown: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

    let mut frames = FramedRead::new(reader, LineFramer::new());
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("stdio server shutting down");
                break;
            }
            frame = frames.next() => frame,
        };
        let line = match frame {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read failed");
                break;
            }
            None => {
                tracing::debug!("input closed");
                break;
            }
        };

        match Message::decode(&line) {
            Ok(Message::Request(request)) => {
                let dispatcher = dispatcher.clone();
                let tx = outbound_tx.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch(request).await;
                    match Message::from(response).encode_line() {
                        Ok(line) => {
                            let _ = tx.send(line).await;
                        }
                        Err(e) => tracing::error!(error = %e, "failed to encode response"),
                    }
                });
            }
            Ok(Message::Notification(n)) => {
                tracing::debug!(method = %n.method, "notification received");
            }
            Ok(Message::Response(r)) => {
                tracing::debug!(id = r.id, "ignoring unsolicited response");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed message");
            }
        }
    }

    // The writer stops once every in-flight request has dropped its sender.
    drop(outbound_tx);
    if let Err(e) = writer_task.await {
        tracing::warn!(error = %e, "writer task failed");
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut outbound: mpsc::Receiver<String>) {
    while let Some(line) = outbound.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(error = %e, "write failed, dropping remaining responses");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ToolError, ToolRegistry};
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tw_protocol::{Request, Response, ToolDescriptor};

    fn dispatcher() -> Dispatcher {
        let mut reg = ToolRegistry::new();
        reg.register_fn(ToolDescriptor::new("slow", ""), |_| async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(json!({"content": [{"type": "text", "text": "slow"}]}))
        })
        .register_fn(ToolDescriptor::new("fast", ""), |_| async {
            Ok(json!({"content": [{"type": "text", "text": "fast"}]}))
        })
        .register_fn(ToolDescriptor::new("fail", ""), |_| async {
            Err(ToolError::Failed("nope".into()))
        });
        Dispatcher::new(reg)
    }

    fn request_line(id: u64, method: &str, params: serde_json::Value) -> String {
        Message::from(Request::new(id, method, Some(params)))
            .encode_line()
            .unwrap()
    }

    async fn read_response(lines: &mut tokio::io::Lines<tokio::io::BufReader<tokio::io::DuplexStream>>) -> Response {
        let line = lines.next_line().await.unwrap().unwrap();
        match Message::decode(&line).unwrap() {
            Message::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn answers_requests_and_ignores_noise() {
        let (mut client_in, server_in) = tokio::io::duplex(4096);
        let (server_out, client_out) = tokio::io::duplex(4096);
        let server = tokio::spawn(serve(dispatcher(), server_in, server_out, CancellationToken::new()));

        let mut input = String::new();
        input.push_str("garbage\n");
        input.push_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        input.push('\n');
        input.push_str(&request_line(1, "tools/call", json!({"name": "fail"})));
        client_in.write_all(input.as_bytes()).await.unwrap();

        let mut lines = tokio::io::BufReader::new(client_out).lines();
        let resp = read_response(&mut lines).await;
        assert_eq!(resp.id, 1);
        assert_eq!(resp.into_result().unwrap_err().message, "nope");

        drop(client_in);
        server.await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slow_tool_does_not_block_fast_one() {
        let (mut client_in, server_in) = tokio::io::duplex(4096);
        let (server_out, client_out) = tokio::io::duplex(4096);
        let server = tokio::spawn(serve(dispatcher(), server_in, server_out, CancellationToken::new()));

        let mut input = request_line(1, "tools/call", json!({"name": "slow"}));
        input.push_str(&request_line(2, "tools/call", json!({"name": "fast"})));
        client_in.write_all(input.as_bytes()).await.unwrap();
        drop(client_in);

        let mut lines = tokio::io::BufReader::new(client_out).lines();
        let first = read_response(&mut lines).await;
        let second = read_response(&mut lines).await;
        assert_eq!(first.id, 2);
        assert_eq!(second.id, 1);

        // Input closed before the slow response was ready; it is still written.
        server.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (_client_in, server_in) = tokio::io::duplex(64);
        let (server_out, _client_out) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(dispatcher(), server_in, server_out, shutdown.clone()));

        shutdown.cancel();
        server.await.unwrap();
    }
}
