//! HTTP helpers shared by both listeners.

use std::convert::Infallible;

use bytes::Bytes;
use futures::stream;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Frame as BodyFrame};
use tonic::Status;

use crate::codec::{self, Frame, WebMode, PREAMBLE_LEN};

/// Response body type of both listeners.
pub type ResponseBody = BoxBody<Bytes, Infallible>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Read a whole request body, at most `limit` bytes.
pub(crate) async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Status>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(
            Status::resource_exhausted(format!("request body exceeds {} bytes", limit)),
        ),
        Err(err) => Err(Status::cancelled(format!("reading request body: {}", err))),
    }
}

/// Largest binary frame stream one request may carry: a frame of
/// `max_message_bytes` plus its preamble.
pub(crate) fn frame_stream_limit(max_message_bytes: usize) -> usize {
    max_message_bytes.saturating_add(PREAMBLE_LEN)
}

/// Transport body budget for `mode`. A text body is the base64 of the frame
/// stream, so it gets the encoded size of the binary budget.
pub(crate) fn body_limit(max_message_bytes: usize, mode: WebMode) -> usize {
    let binary = frame_stream_limit(max_message_bytes);
    match mode {
        WebMode::Binary => binary,
        WebMode::Text => binary.div_ceil(3).saturating_mul(4),
    }
}

/// Request messages from a raw body, in arrival order. Trailer frames in a
/// request are ignored; compressed frames are refused.
pub(crate) fn decode_request(
    raw: &[u8],
    mode: WebMode,
    max_message_bytes: usize,
) -> Result<Vec<Bytes>, Status> {
    let decoded = match mode {
        WebMode::Binary => codec::decode_frames(raw, max_message_bytes),
        WebMode::Text => match codec::text::decode_text(raw) {
            // Padded chunks can decode to more than the body budget allowed for.
            Ok(binary) if binary.len() > frame_stream_limit(max_message_bytes) => {
                return Err(Status::resource_exhausted(format!(
                    "request body exceeds {} bytes",
                    frame_stream_limit(max_message_bytes)
                )));
            }
            Ok(binary) => codec::decode_frames(&binary, max_message_bytes),
            Err(e) => Err(e),
        },
    };
    let frames = decoded.map_err(|e| {
        tracing::warn!("rejecting request body: {}", e);
        Status::invalid_argument(e.to_string())
    })?;

    if frames.iter().any(Frame::is_compressed) {
        return Err(Status::unimplemented(
            "compressed messages are not supported",
        ));
    }
    Ok(frames
        .into_iter()
        .filter(|frame| !frame.is_trailers())
        .map(|frame| frame.payload)
        .collect())
}

pub(crate) fn full(data: Bytes) -> ResponseBody {
    Full::new(data).boxed()
}

/// `data` followed by HTTP trailers.
pub(crate) fn with_trailers(data: Bytes, trailers: HeaderMap) -> ResponseBody {
    let mut frames = Vec::with_capacity(2);
    if !data.is_empty() {
        frames.push(Ok::<_, Infallible>(BodyFrame::data(data)));
    }
    frames.push(Ok(BodyFrame::trailers(trailers)));
    StreamBody::new(stream::iter(frames)).boxed()
}

/// Bodyless response with just a status code.
pub(crate) fn status_only(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Empty::new().boxed());
    *response.status_mut() = status;
    response
}

/// `200 OK` with a content type.
pub(crate) fn ok_response(body: ResponseBody, content_type: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn body_within_limit_is_read() {
        let body = Full::new(Bytes::from_static(b"abcd"));
        assert_eq!(read_body(body, 4).await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn oversized_body_is_resource_exhausted() {
        let body = Full::new(Bytes::from_static(b"abcde"));
        let status = read_body(body, 4).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
    }

    #[test]
    fn body_limit_fits_one_full_frame_in_either_mode() {
        assert_eq!(body_limit(1024, WebMode::Binary), 1029);
        assert_eq!(body_limit(1024, WebMode::Text), 1372);

        let frame = codec::encode_frames(&[Frame::message(vec![7u8; 1024])]).unwrap();
        assert_eq!(frame.len(), body_limit(1024, WebMode::Binary));
        let text = codec::encode_body(&[Frame::message(vec![7u8; 1024])], WebMode::Text)
            .unwrap();
        assert_eq!(text.len(), body_limit(1024, WebMode::Text));
    }

    #[test]
    fn oversized_text_after_decoding_is_resource_exhausted() {
        // Six one-byte chunks decode to more than an empty message's frame.
        let status = decode_request(b"AA==AA==AA==AA==AA==AA==", WebMode::Text, 0).unwrap_err();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
    }

    #[test]
    fn request_trailer_frames_are_skipped() {
        let raw = codec::encode_frames(&[
            Frame::message(vec![1u8]),
            Frame::trailers(&b"x: y\r\n"[..]),
            Frame::message(vec![2u8]),
        ])
        .unwrap();
        let messages = decode_request(&raw, WebMode::Binary, 1024).unwrap();
        assert_eq!(messages, vec![Bytes::from_static(&[1]), Bytes::from_static(&[2])]);
    }

    #[test]
    fn compressed_request_is_unimplemented() {
        let raw = codec::encode_frames(&[Frame {
            flags: codec::COMPRESSED_FLAG,
            payload: Bytes::from_static(&[1]),
        }])
        .unwrap();
        let status = decode_request(&raw, WebMode::Binary, 1024).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[test]
    fn malformed_request_is_invalid_argument() {
        let status = decode_request(&[0, 0], WebMode::Binary, 1024).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        let status = decode_request(b"%%%%", WebMode::Text, 1024).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn trailers_follow_data() {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        let collected = with_trailers(Bytes::from_static(b"xy"), trailers)
            .collect()
            .await
            .unwrap();
        let seen = collected.trailers().cloned().unwrap();
        assert_eq!(seen["grpc-status"], "0");
        assert_eq!(collected.to_bytes(), Bytes::from_static(b"xy"));
    }
}
