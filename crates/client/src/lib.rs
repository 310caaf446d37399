//! `tw-client`: clients for toolwire tool servers.
//!
//! Three transports share the [`ToolClient`] surface:
//! - [`PipeClient`] spawns the server and speaks over its stdin/stdout.
//! - [`SocketClient`] connects to a socket adapter over TCP.
//! - [`MailboxClient`] exchanges one file per message through two
//!   directories.
//!
//! The stream transports multiplex concurrent calls over one connection
//! through [`RpcChannel`], which correlates responses by id using a
//! [`CorrelationTable`].
//!
//! ```rust,ignore
//! use tw_client::{SocketClient, ToolClient};
//!
//! let client = SocketClient::new("127.0.0.1", 4000);
//! client.connect().await?;
//! let result = client.call_tool("greet", json!({"name": "World"})).await?;
//! println!("{}", result.joined_text());
//! ```

pub mod channel;
pub mod correlation;
pub mod error;
pub mod mailbox;
pub mod pipe;
pub mod socket;
pub mod transport;

pub use channel::RpcChannel;
pub use correlation::{CorrelationTable, PendingCalls, RequestIds};
pub use error::ClientError;
pub use mailbox::MailboxClient;
pub use pipe::PipeClient;
pub use socket::SocketClient;
pub use transport::{ClientState, ToolClient};
