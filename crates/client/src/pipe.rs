//! Pipe transport: spawn the server as a child process and talk JSON-RPC
//! over its stdin/stdout.  The child's stderr is inherited so its logs stay
//! visible.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Child;

use tw_domain::config::ServerCommand;
use tw_protocol::mcp::{self, methods, InitializeResult};
use tw_protocol::{ToolCallResult, ToolsListResult};

use crate::channel::RpcChannel;
use crate::error::ClientError;
use crate::transport::{call_params, decode_result, ClientState, ToolClient};

pub struct PipeClient {
    command: ServerCommand,
    client_name: String,
    state: Mutex<ClientState>,
    channel: Mutex<Option<Arc<RpcChannel>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    server_info: Mutex<Option<InitializeResult>>,
}

impl PipeClient {
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            client_name: "toolwire-pipe-client".into(),
            state: Mutex::new(ClientState::Idle),
            channel: Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            server_info: Mutex::new(None),
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// What the server reported during the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().clone()
    }

    fn ready_channel(&self) -> Result<Arc<RpcChannel>, ClientError> {
        if *self.state.lock() != ClientState::Ready {
            return Err(ClientError::NotConnected);
        }
        self.channel.lock().clone().ok_or(ClientError::NotConnected)
    }

    fn spawn_child(&self) -> Result<(Child, RpcChannel), ClientError> {
        let program = &self.command.program;
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::ConnectionFailed(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::ConnectionFailed("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::ConnectionFailed("failed to capture child stdout".into()))?;

        let channel = RpcChannel::start(format!("pipe:{program}"), stdout, stdin, None);
        Ok((child, channel))
    }

    async fn handshake(&self, channel: &RpcChannel) -> Result<InitializeResult, ClientError> {
        let params = serde_json::to_value(mcp::initialize_params(&self.client_name))?;
        let value = channel.request(methods::INITIALIZE, Some(params)).await?;
        let info: InitializeResult = decode_result(methods::INITIALIZE, value)?;
        channel.notify(methods::INITIALIZED, None).await?;
        Ok(info)
    }

    async fn reap_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match child.kill().await {
            Ok(()) => tracing::debug!(program = %self.command.program, "pipe server stopped"),
            Err(e) => tracing::debug!(error = %e, "error stopping pipe server"),
        }
    }
}

#[async_trait]
impl ToolClient for PipeClient {
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

        let (child, channel) = match self.spawn_child() {
            Ok(spawned) => spawned,
            Err(e) => {
                *self.state.lock() = ClientState::Idle;
                return Err(e);
            }
        };
        let channel = Arc::new(channel);
        *self.child.lock().await = Some(child);
        *self.channel.lock() = Some(channel.clone());

        match self.handshake(&channel).await {
            Ok(info) => {
                tracing::info!(
                    program = %self.command.program,
                    server = ?info.server_info.as_ref().map(|s| &s.name),
                    protocol = %info.protocol_version,
                    "pipe client connected"
                );
                *self.server_info.lock() = Some(info);
                *self.state.lock() = ClientState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(program = %self.command.program, error = %e, "handshake failed");
                channel.close();
                self.channel.lock().take();
                self.reap_child().await;
                *self.state.lock() = ClientState::Closed;
                Err(e)
            }
        }
    }

    async fn list_tools(&self) -> Result<ToolsListResult, ClientError> {
        let channel = self.ready_channel()?;
        let value = channel.request(methods::TOOLS_LIST, None).await?;
        decode_result(methods::TOOLS_LIST, value)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        let channel = self.ready_channel()?;
        let value = channel
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
        self.reap_child().await;
        Ok(())
    }

    fn endpoint(&self) -> String {
        std::iter::once(self.command.program.as_str())
            .chain(self.command.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn calls_before_connect_fail() {
        let client = PipeClient::new(ServerCommand::new("unused"));
        assert!(matches!(client.list_tools().await, Err(ClientError::NotConnected)));
        assert!(matches!(
            client.call_tool("greet", json!({})).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_connection_error() {
        let client = PipeClient::new(ServerCommand::new("/nonexistent/toolwire-test-server"));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed(_)));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn closed_client_cannot_reconnect() {
        let client = PipeClient::new(ServerCommand::new("unused"));
        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.connect().await.is_err());
        assert!(matches!(client.list_tools().await, Err(ClientError::NotConnected)));
    }

    #[test]
    fn endpoint_shows_command_line() {
        let client = PipeClient::new(ServerCommand::new("node").args(["server.js", "--quiet"]));
        assert_eq!(client.endpoint(), "node server.js --quiet");
    }
}
