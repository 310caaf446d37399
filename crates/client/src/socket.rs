//! Socket transport: newline-delimited JSON-RPC over TCP.
//!
//! No handshake is performed; the adapter on the other end has already
//! initialized its child server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;

use tw_domain::config::SocketConfig;
use tw_protocol::mcp::methods;
use tw_protocol::{ToolCallResult, ToolsListResult};

use crate::channel::RpcChannel;
use crate::error::ClientError;
use crate::transport::{call_params, decode_result, ClientState, ToolClient};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SocketClient {
    host: String,
    port: u16,
    request_timeout: Duration,
    state: Mutex<ClientState>,
    channel: Mutex<Option<Arc<RpcChannel>>>,
}

impl SocketClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(ClientState::Idle),
            channel: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SocketConfig) -> Self {
        Self::new(config.host.clone(), config.port).with_request_timeout(config.request_timeout())
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Send an arbitrary request.  Exposed for callers that need methods
    /// beyond listing and calling tools.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let channel = self.ready_channel()?;
        channel.request(method, params).await
    }

    fn ready_channel(&self) -> Result<Arc<RpcChannel>, ClientError> {
        if *self.state.lock() != ClientState::Ready {
            return Err(ClientError::NotConnected);
        }
        self.channel.lock().clone().ok_or(ClientError::NotConnected)
    }
}

#[async_trait]
impl ToolClient for SocketClient {
    async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            if *state != ClientState::Idle {
                return Err(ClientError::Protocol(format!(
                    "cannot connect from state {:?}",
                    *state
                )));
            }
            *state = ClientState::Connecting;
        }

        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.state.lock() = ClientState::Idle;
                return Err(ClientError::ConnectionFailed(format!("{}: {e}", self.endpoint())));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let channel = RpcChannel::start(
            format!("socket:{}", self.endpoint()),
            reader,
            writer,
            Some(self.request_timeout),
        );
        *self.channel.lock() = Some(Arc::new(channel));
        *self.state.lock() = ClientState::Ready;
        tracing::info!(endpoint = %self.endpoint(), "socket client connected");
        Ok(())
    }

    async fn list_tools(&self) -> Result<ToolsListResult, ClientError> {
        let value = self.request(methods::TOOLS_LIST, None).await?;
        decode_result(methods::TOOLS_LIST, value)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        let value = self
            .request(methods::TOOLS_CALL, Some(call_params(name, arguments)?))
            .await?;
        decode_result(methods::TOOLS_CALL, value)
    }

    async fn close(&self) -> Result<(), ClientError> {
        *self.state.lock() = ClientState::Closed;
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }
        Ok(())
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio_util::codec::FramedRead;
    use tw_protocol::{LineFramer, Message, Response};

    /// Answers `tools/list` with one tool, echoes `tools/call` arguments as
    /// text, and never answers `hang`.
    async fn fake_adapter() -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut frames = FramedRead::new(reader, LineFramer::new());
            while let Some(Ok(line)) = frames.next().await {
                let Ok(Message::Request(req)) = Message::decode(&line) else {
                    continue;
                };
                let result = match req.method.as_str() {
                    "tools/list" => json!({"tools": [{"name": "greet"}]}),
                    "tools/call" => {
                        let text = req.params.unwrap_or_default()["arguments"].to_string();
                        json!({"content": [{"type": "text", "text": text}]})
                    }
                    _ => continue,
                };
                let line = Message::from(Response::success(req.id, result))
                    .encode_line()
                    .unwrap();
                writer.write_all(line.as_bytes()).await.unwrap();
            }
        });
        (port, task)
    }

    #[tokio::test]
    async fn lists_and_calls_tools() {
        let (port, _server) = fake_adapter().await;
        let client = SocketClient::new("127.0.0.1", port);
        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Ready);

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.tools[0].name, "greet");

        let result = client.call_tool("greet", json!({"name": "Ada"})).await.unwrap();
        assert_eq!(result.joined_text(), r#"{"name":"Ada"}"#);

        client.close().await.unwrap();
        assert!(matches!(client.list_tools().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (port, _server) = fake_adapter().await;
        let client =
            SocketClient::new("127.0.0.1", port).with_request_timeout(Duration::from_millis(100));
        client.connect().await.unwrap();

        let err = client.request("hang", None).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = SocketClient::new("127.0.0.1", port);
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn from_config_uses_defaults() {
        let client = SocketClient::from_config(&SocketConfig::default());
        assert_eq!(client.endpoint(), "127.0.0.1:4000");
        assert_eq!(client.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
