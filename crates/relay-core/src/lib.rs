//! `relay-core` — configuration and shared error types for the relay workspace.

pub mod config;
pub mod error;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
