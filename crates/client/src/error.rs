use std::time::Duration;

use tw_protocol::{ProtocolError, RequestId, RpcError};

/// Errors surfaced by every client transport.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a JSON-RPC error object.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("timed out waiting for response to request {id} after {after:?}")]
    Timeout { id: RequestId, after: Duration },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("client is not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Encode(e) => ClientError::Json(e),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl ClientError {
    /// The JSON-RPC error, when the server produced one.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            ClientError::Rpc(e) => Some(e),
            _ => None,
        }
    }
}
