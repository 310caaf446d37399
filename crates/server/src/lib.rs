//! `tw-server`: the server side of toolwire.
//!
//! - [`ToolRegistry`] maps tool names to [`ToolHandler`]s.
//! - [`Dispatcher`] answers `initialize`, `ping`, `tools/list` and
//!   `tools/call` against a registry.
//! - [`stdio::serve`] runs the pipe-transport loop over a reader/writer
//!   pair.
//! - [`MailboxServer`] answers request files in a mailbox directory.
//! - [`tools`] holds the demo tools.

pub mod dispatch;
pub mod error;
pub mod mailbox;
pub mod registry;
pub mod stdio;
pub mod tools;

pub use dispatch::Dispatcher;
pub use error::ServerError;
pub use mailbox::MailboxServer;
pub use registry::{ToolError, ToolHandler, ToolRegistry, ToolResult};
pub use tools::builtin_registry;
