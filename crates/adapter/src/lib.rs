//! `tw-adapter`: put a pipe-transport server behind the socket or mailbox
//! transport.
//!
//! Both adapters own one [`ChildServer`] and multiplex every caller onto it.

pub mod child;
pub mod error;
pub mod mailbox;
pub mod socket;

pub use child::{ChildServer, Delivery};
pub use error::AdapterError;
pub use mailbox::MailboxAdapter;
pub use socket::{ConnectionRoute, SocketAdapter};

/// Client name the adapters announce in their `initialize` request.
pub const ADAPTER_CLIENT_NAME: &str = "toolwire-adapter";
