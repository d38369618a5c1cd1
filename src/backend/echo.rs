//! Built-in echo service used by the `grpc-bridge` binary for smoke tests.
//!
//! Methods:
//! - `/grpc.bridge.v1.EchoService/Echo` returns the request unchanged
//! - `/grpc.bridge.v1.EchoService/Split` streams the request back one byte per message
//! - `/grpc.bridge.v1.EchoService/Fail` fails with `FAILED_PRECONDITION`, the
//!   request bytes (lossy UTF-8) as the message

use bytes::Bytes;
use tonic::Status;

use super::MethodTable;
use crate::types::Result;

pub const SERVICE: &str = "grpc.bridge.v1.EchoService";
pub const ECHO: &str = "/grpc.bridge.v1.EchoService/Echo";
pub const SPLIT: &str = "/grpc.bridge.v1.EchoService/Split";
pub const FAIL: &str = "/grpc.bridge.v1.EchoService/Fail";

/// Method table with the echo service registered.
pub fn echo_table() -> Result<MethodTable> {
    MethodTable::builder()
        .unary(ECHO, |request: Bytes| async move { Ok(request) })
        .server_streaming(SPLIT, |request: Bytes| async move {
            Ok((0..request.len())
                .map(|i| request.slice(i..i + 1))
                .collect::<Vec<_>>())
        })
        .unary(FAIL, |request: Bytes| async move {
            Err(Status::failed_precondition(
                String::from_utf8_lossy(&request).into_owned(),
            ))
        })
        .build()
}
