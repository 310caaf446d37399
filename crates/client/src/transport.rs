//! The common client surface shared by the pipe, socket and mailbox
//! transports.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use tw_protocol::mcp::ToolCallParams;
use tw_protocol::{ToolCallResult, ToolsListResult};

use crate::error::ClientError;

/// A client for a tool server, independent of how bytes reach it.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Establish the connection.  Calls made before this succeeds fail with
    /// [`ClientError::NotConnected`].
    async fn connect(&self) -> Result<(), ClientError>;

    /// List the tools the server offers.
    async fn list_tools(&self) -> Result<ToolsListResult, ClientError>;

    /// Invoke `name` with `arguments`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError>;

    /// Release the connection.  In-flight calls fail.
    async fn close(&self) -> Result<(), ClientError>;

    /// Human-readable description of the endpoint, for logs and prompts.
    fn endpoint(&self) -> String;
}

/// Connection lifecycle.  A client moves forward only and is not reusable
/// once closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Ready,
    Closed,
}

pub(crate) fn call_params(name: &str, arguments: Value) -> Result<Value, ClientError> {
    Ok(serde_json::to_value(ToolCallParams {
        name: name.to_string(),
        arguments,
    })?)
}

pub(crate) fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("unexpected {method} result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_params_shape() {
        let params = call_params("greet", json!({"name": "World"})).unwrap();
        assert_eq!(params, json!({"name": "greet", "arguments": {"name": "World"}}));
    }

    #[test]
    fn decode_result_reports_method() {
        let err = decode_result::<ToolsListResult>("tools/list", json!({"nope": 1})).unwrap_err();
        assert!(err.to_string().contains("tools/list"));
    }
}
