//! # grpc-bridge - gRPC and gRPC-Web in front of one method table
//!
//! Serves a single [`backend::Backend`] three ways:
//! - native gRPC over cleartext HTTP/2
//! - gRPC-Web over HTTP/1.1, binary and base64 text modes, with CORS
//! - an [`client::InProcessClient`] calling handlers directly
//!
//! ```text
//!            ┌──────────── Bridge ─────────────┐
//!   HTTP/2 → │ native listener ─┐              │
//!   HTTP/1 → │ web listener ────┼→ MethodTable │
//!            │ in-process ──────┘              │
//!            └─────────────────────────────────┘
//! ```
//!
//! Messages are opaque bytes; serialization belongs to the caller.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod bridge;
pub mod client;
pub mod codec;
pub mod types;

pub mod observability;

pub use bridge::Bridge;
pub use types::{Config, Error, Result};
