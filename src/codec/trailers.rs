//! Trailer metadata blocks and gRPC status trailers.

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use tonic::{Code, Status};

const GRPC_STATUS: &str = "grpc-status";

/// Serialize trailers as `key: value\r\n` lines.
pub fn encode_trailer_block(trailers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::new();
    for (name, value) in trailers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

/// Parse a trailer block. Keys come back lowercased.
///
/// Lines end in `\r\n` or `\n`; a blank line ends the block. Any malformed
/// line makes the whole block count as empty metadata: a bad trailer never
/// costs the caller the messages decoded before it.
pub fn parse_trailer_block(block: &[u8]) -> HeaderMap {
    match try_parse(block) {
        Some(trailers) => trailers,
        None => {
            tracing::debug!(len = block.len(), "ignoring malformed trailer block");
            HeaderMap::new()
        }
    }
}

fn try_parse(block: &[u8]) -> Option<HeaderMap> {
    let mut trailers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        let colon = line.iter().position(|&b| b == b':')?;
        let name = HeaderName::from_bytes(&line[..colon]).ok()?;
        let value = HeaderValue::from_bytes(trim_ows(&line[colon + 1..])).ok()?;
        trailers.append(name, value);
    }
    Some(trailers)
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// `grpc-status` / `grpc-message` (plus the status' own metadata) as trailers.
pub fn status_trailers(status: &Status) -> HeaderMap {
    let mut trailers = status.metadata().clone().into_headers();
    match status.add_header(&mut trailers) {
        Ok(()) => trailers,
        Err(_) => {
            let mut trailers = HeaderMap::new();
            trailers.insert(GRPC_STATUS, HeaderValue::from(status.code() as i32));
            trailers
        }
    }
}

/// Recover the call status from trailers (or headers of a trailers-only
/// response). `None` when no `grpc-status` is present.
pub fn status_from_trailers(trailers: &HeaderMap) -> Option<Status> {
    if !trailers.contains_key(GRPC_STATUS) {
        return None;
    }
    Status::from_header_map(trailers)
}

/// True when `status` is the OK status.
pub fn is_ok(status: &Status) -> bool {
    status.code() == Code::Ok
}
