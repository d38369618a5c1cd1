//! Core types for the bridge.
//!
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Listener, web transport and bind address configuration

mod config;
mod errors;

pub use config::{Config, ListenerConfig, WebConfig};
pub use errors::{Error, Result};
