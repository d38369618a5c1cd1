//! Text-mode envelope: the frame stream as base64.
//!
//! A streaming encoder pads whenever it flushes, so a text body is a run of
//! independently padded chunks (`"AAE="` + `"AgM="`), not necessarily one
//! base64 string. Decoding splits at the end of each run of `=`.
//!
//! Encoding is canonical. Decoding accepts what browser encoders emit in
//! practice: nonzero trailing bits and a final chunk without padding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};

use super::FrameError;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Incremental base64 encoder producing padded chunks on `flush`.
#[derive(Debug, Default)]
pub struct TextEncoder {
    pending: Vec<u8>,
    out: BytesMut,
}

impl TextEncoder {
    /// Buffer `data`, emitting every complete 3-byte group right away.
    pub fn write(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() - self.pending.len() % 3;
        if whole > 0 {
            let encoded = STANDARD.encode(&self.pending[..whole]);
            self.out.extend_from_slice(encoded.as_bytes());
            self.pending.drain(..whole);
        }
    }

    /// Emit the buffered tail as a padded chunk end.
    pub fn flush(&mut self) {
        if !self.pending.is_empty() {
            let encoded = STANDARD.encode(&self.pending);
            self.out.extend_from_slice(encoded.as_bytes());
            self.pending.clear();
        }
    }

    /// Write then flush: `chunk` ends on a chunk boundary.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.write(chunk);
        self.flush();
    }

    pub fn finish(mut self) -> Bytes {
        self.flush();
        self.out.freeze()
    }
}

/// Base64 of `raw` as a single chunk.
pub fn encode_text(raw: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(raw))
}

/// Decode a body made of one or more padded base64 chunks.
///
/// The end of a chunk is the end of the next run of `=`; a remainder with no
/// padding is the last chunk. A chunk that is not valid base64 fails with
/// [`FrameError::InvalidBase64`] carrying the chunk's offset in `body`.
pub fn decode_text(body: &[u8]) -> Result<Bytes, FrameError> {
    let mut out = Vec::with_capacity(body.len() / 4 * 3 + 3);
    let mut start = 0;

    while start < body.len() {
        let rest = &body[start..];
        let end = match rest.iter().position(|&b| b == b'=') {
            Some(pad) => pad + rest[pad..].iter().take_while(|&&b| b == b'=').count(),
            None => rest.len(),
        };

        LENIENT
            .decode_vec(&rest[..end], &mut out)
            .map_err(|source| FrameError::InvalidBase64 {
                offset: start,
                source,
            })?;
        start += end;
    }

    Ok(Bytes::from(out))
}
