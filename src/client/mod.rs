//! Clients for the three call paths.
//!
//! - [`InProcessClient`] - direct method-table calls, no framing
//! - [`WebClient`] - gRPC-Web over HTTP/1.1 (binary or text mode)
//! - [`NativeClient`] - gRPC over HTTP/2 via `tonic`

pub mod in_process;
pub mod native;
pub mod web;

pub use in_process::InProcessClient;
pub use native::NativeClient;
pub use web::{WebClient, WebResponse};
