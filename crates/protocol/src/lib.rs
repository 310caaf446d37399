//! `tw-protocol`: the on-wire shape shared by every toolwire transport.
//!
//! - [`message`]: JSON-RPC 2.0 requests, responses and notifications as a
//!   validated tagged union, plus line encoding.
//! - [`framing`]: a [`tokio_util::codec::Decoder`] that turns an arbitrary
//!   byte stream into newline-delimited frames.
//! - [`mcp`]: the tool-protocol payloads carried inside `params` / `result`.
//! - [`mailbox`]: file names and atomic writes for the directory transport.

pub mod framing;
pub mod mailbox;
pub mod mcp;
pub mod message;

pub use framing::LineFramer;
pub use mcp::{ToolCallParams, ToolCallResult, ToolDescriptor, ToolsListResult};
pub use message::{
    ErrorKind, Message, Notification, ProtocolError, Request, RequestId, Response, RpcError,
};
