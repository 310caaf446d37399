//! `tw-domain`: configuration and the shared error type for the toolwire
//! workspace.

pub mod config;
pub mod error;

pub use error::{Error, Result};
