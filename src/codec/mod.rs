//! Frame codec for the gRPC-Web wire format.
//!
//! Frame format:
//! ```text
//! ┌──────────┬──────────┬────────────────────────┐
//! │ flags(1B)│ len (4B) │   payload (len bytes)  │
//! │ u8       │ u32 BE   │                        │
//! └──────────┴──────────┴────────────────────────┘
//! ```
//! Bit 7 of `flags` marks a trailer frame (`key: value\r\n` lines), bit 0 a
//! compressed message. In text mode the frame stream travels as one or more
//! independently padded base64 chunks, see [`text`].
//!
//! The same frames are what gRPC puts on an HTTP/2 stream, so the native
//! listener decodes request bodies with this module too.

pub mod raw;
pub mod text;
pub mod trailers;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::HeaderMap;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub use raw::RawCodec;
pub use trailers::{encode_trailer_block, parse_trailer_block, status_from_trailers, status_trailers};

/// Bytes of flags + length in front of every payload.
pub const PREAMBLE_LEN: usize = 5;
/// Flag bit: payload is trailer metadata.
pub const TRAILER_FLAG: u8 = 0x80;
/// Flag bit: payload is compressed.
pub const COMPRESSED_FLAG: u8 = 0x01;
/// Default cap on a single frame's payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

pub const CONTENT_TYPE_GRPC: &str = "application/grpc";
pub const CONTENT_TYPE_GRPC_WEB: &str = "application/grpc-web";
pub const CONTENT_TYPE_GRPC_WEB_PROTO: &str = "application/grpc-web+proto";
pub const CONTENT_TYPE_GRPC_WEB_TEXT: &str = "application/grpc-web-text";
pub const CONTENT_TYPE_GRPC_WEB_TEXT_PROTO: &str = "application/grpc-web-text+proto";

/// Malformed web-framed body.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("truncated preamble: {available} of 5 bytes before end of body")]
    TruncatedPreamble { available: usize },

    #[error("truncated payload: {available} of {expected} bytes before end of body")]
    TruncatedPayload { expected: usize, available: usize },

    #[error("frame of {length} bytes exceeds limit of {max} bytes")]
    TooLarge { length: usize, max: usize },

    #[error("invalid base64 chunk at offset {offset}: {source}")]
    InvalidBase64 {
        offset: usize,
        #[source]
        source: base64::DecodeError,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One frame of the web wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Message frame (`flags = 0`).
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self {
            flags: 0,
            payload: payload.into(),
        }
    }

    /// Trailer frame carrying a raw `key: value` block.
    pub fn trailers(block: impl Into<Bytes>) -> Self {
        Self {
            flags: TRAILER_FLAG,
            payload: block.into(),
        }
    }

    /// Trailer frame built from a header map.
    pub fn from_trailers(trailers: &HeaderMap) -> Self {
        Self::trailers(encode_trailer_block(trailers))
    }

    pub fn is_trailers(&self) -> bool {
        self.flags & TRAILER_FLAG != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSED_FLAG != 0
    }

    /// Size on the wire.
    pub fn encoded_len(&self) -> usize {
        PREAMBLE_LEN + self.payload.len()
    }

    /// Append this frame to `dst`. Fails without writing anything if the
    /// payload does not fit the 32-bit length prefix.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let length = length_prefix(self.payload.len())?;
        dst.reserve(self.encoded_len());
        dst.put_u8(self.flags);
        dst.put_u32(length);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

fn length_prefix(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::TooLarge {
        length: len,
        max: u32::MAX as usize,
    })
}

/// Incremental frame decoder/encoder for use with `FramedRead`/`FramedWrite`
/// or over a fully buffered body.
///
/// `decode` waits for more bytes while a frame is incomplete; `decode_eof`
/// applies the end-of-body rules: nothing left is a clean end, a partial
/// preamble or partial payload is a [`FrameError`], and a complete preamble
/// with no payload bytes at all ends the sequence quietly.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

fn payload_len(src: &[u8]) -> usize {
    u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < PREAMBLE_LEN {
            return Ok(None);
        }

        let length = payload_len(src);
        if length > self.max_frame_len {
            return Err(FrameError::TooLarge {
                length,
                max: self.max_frame_len,
            });
        }

        let frame_len = PREAMBLE_LEN + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let flags = src[0];
        src.advance(PREAMBLE_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame { flags, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match src.len() {
            0 => Ok(None),
            available if available < PREAMBLE_LEN => {
                Err(FrameError::TruncatedPreamble { available })
            }
            PREAMBLE_LEN => {
                tracing::debug!(
                    expected = payload_len(src),
                    "body ended after a frame preamble; treating as end of messages"
                );
                src.clear();
                Ok(None)
            }
            buffered => Err(FrameError::TruncatedPayload {
                expected: payload_len(src),
                available: buffered - PREAMBLE_LEN,
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if frame.payload.len() > self.max_frame_len {
            return Err(FrameError::TooLarge {
                length: frame.payload.len(),
                max: self.max_frame_len,
            });
        }
        frame.encode(dst)
    }
}

/// Which gRPC-Web variant a request or response uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebMode {
    /// Raw frame stream.
    Binary,
    /// Base64 frame stream, possibly in several padded chunks.
    Text,
}

impl WebMode {
    /// Select the mode from a `content-type` value. Parameters after `;` are
    /// ignored; anything that is not a gRPC-Web media type yields `None`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            CONTENT_TYPE_GRPC_WEB | CONTENT_TYPE_GRPC_WEB_PROTO => Some(WebMode::Binary),
            CONTENT_TYPE_GRPC_WEB_TEXT | CONTENT_TYPE_GRPC_WEB_TEXT_PROTO => Some(WebMode::Text),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            WebMode::Binary => CONTENT_TYPE_GRPC_WEB_PROTO,
            WebMode::Text => CONTENT_TYPE_GRPC_WEB_TEXT_PROTO,
        }
    }
}

/// Concatenate frames into a binary frame stream.
pub fn encode_frames(frames: &[Frame]) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::with_capacity(frames.iter().map(Frame::encoded_len).sum());
    for frame in frames {
        frame.encode(&mut buf)?;
    }
    Ok(buf.freeze())
}

/// Encode frames as a transport body. Text mode flushes one padded base64
/// chunk per frame, the way a streaming encoder would.
pub fn encode_body(frames: &[Frame], mode: WebMode) -> Result<Bytes, FrameError> {
    match mode {
        WebMode::Binary => encode_frames(frames),
        WebMode::Text => {
            let mut encoder = text::TextEncoder::default();
            let mut buf = BytesMut::new();
            for frame in frames {
                buf.clear();
                frame.encode(&mut buf)?;
                encoder.push_chunk(&buf);
            }
            Ok(encoder.finish())
        }
    }
}

/// Split a binary frame stream into frames, in order.
pub fn decode_frames(raw: &[u8], max_frame_len: usize) -> Result<Vec<Frame>, FrameError> {
    let mut codec = FrameCodec::new(max_frame_len);
    let mut buf = BytesMut::from(raw);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode_eof(&mut buf)? {
        frames.push(frame);
    }
    Ok(frames)
}

/// Messages and trailer metadata recovered from a body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBody {
    pub messages: Vec<Bytes>,
    pub trailers: HeaderMap,
}

impl DecodedBody {
    /// Sort frames into messages and trailers. Several trailer frames merge;
    /// a malformed trailer block contributes nothing.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        let mut decoded = DecodedBody::default();
        for frame in frames {
            if frame.is_trailers() {
                decoded.trailers.extend(parse_trailer_block(&frame.payload));
            } else {
                decoded.messages.push(frame.payload);
            }
        }
        decoded
    }
}

/// Decode a whole transport body: text pre-pass if needed, then frames.
pub fn decode_body(
    body: &[u8],
    mode: WebMode,
    max_frame_len: usize,
) -> Result<DecodedBody, FrameError> {
    let frames = match mode {
        WebMode::Binary => decode_frames(body, max_frame_len)?,
        WebMode::Text => decode_frames(&text::decode_text(body)?, max_frame_len)?,
    };
    Ok(DecodedBody::from_frames(frames))
}
