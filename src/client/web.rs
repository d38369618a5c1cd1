//! gRPC-Web client: request builder and response parser over `reqwest`.
//!
//! This is the client half of the web wire format. [`encode_request`] and
//! [`WebResponse::parse`] do not touch the network and can be used on their
//! own.

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use tonic::Status;

use crate::codec::{self, Frame, WebMode, DEFAULT_MAX_FRAME_LEN};
use crate::types::{Error, Result};

/// Frame request messages as a body for `mode`.
pub fn encode_request(messages: &[Bytes], mode: WebMode) -> Result<Bytes> {
    let frames: Vec<Frame> = messages.iter().cloned().map(Frame::message).collect();
    Ok(codec::encode_body(&frames, mode)?)
}

/// A decoded gRPC-Web response.
#[derive(Debug)]
pub struct WebResponse {
    pub messages: Vec<Bytes>,
    /// Trailer metadata from the trailer frame (empty if missing or malformed).
    pub trailers: HeaderMap,
    /// Call status from the trailers, or from the response headers of a
    /// trailers-only response.
    pub status: Status,
}

impl WebResponse {
    /// Parse an HTTP 200 gRPC-Web response body.
    pub fn parse(mode: WebMode, headers: &HeaderMap, body: &[u8]) -> Result<Self> {
        let decoded = codec::decode_body(body, mode, DEFAULT_MAX_FRAME_LEN)?;
        let status = codec::status_from_trailers(&decoded.trailers)
            .or_else(|| codec::status_from_trailers(headers))
            .unwrap_or_else(|| Status::unknown("response carried no grpc-status"));
        Ok(Self {
            messages: decoded.messages,
            trailers: decoded.trailers,
            status,
        })
    }

    /// Messages on success, the call status as [`Error::Application`] otherwise.
    pub fn into_result(self) -> Result<Vec<Bytes>> {
        if codec::trailers::is_ok(&self.status) {
            Ok(self.messages)
        } else {
            Err(Error::from(self.status))
        }
    }
}

/// HTTP client speaking gRPC-Web to one server.
#[derive(Debug, Clone)]
pub struct WebClient {
    http: reqwest::Client,
    base_url: String,
    mode: WebMode,
}

impl WebClient {
    /// Client for a bridge's web listener.
    pub fn new(addr: SocketAddr, mode: WebMode) -> Self {
        Self::with_base_url(format!("http://{}", addr), mode)
    }

    pub fn with_base_url(base_url: impl Into<String>, mode: WebMode) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
        }
    }

    pub fn mode(&self) -> WebMode {
        self.mode
    }

    /// Send `messages` to `method` and parse whatever comes back.
    pub async fn call(&self, method: &str, messages: &[Bytes]) -> Result<WebResponse> {
        self.call_with_metadata(method, messages, HeaderMap::new()).await
    }

    /// As [`WebClient::call`], adding `metadata` as request headers.
    pub async fn call_with_metadata(
        &self,
        method: &str,
        messages: &[Bytes],
        metadata: HeaderMap,
    ) -> Result<WebResponse> {
        let body = encode_request(messages, self.mode)?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, method))
            .headers(metadata)
            .header(CONTENT_TYPE, self.mode.content_type())
            .header("x-grpc-web", "1")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("POST {}: {}", method, e)))?;

        let http_status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(format!("reading {} response: {}", method, e)))?;

        if http_status != StatusCode::OK {
            return Err(Error::transport(format!(
                "{} answered HTTP {}",
                method, http_status
            )));
        }
        WebResponse::parse(self.mode, &headers, &body)
    }

    /// Unary call: exactly one reply message on success.
    pub async fn unary(&self, method: &str, request: impl Into<Bytes>) -> Result<Bytes> {
        let messages = self.call(method, &[request.into()]).await?.into_result()?;
        let count = messages.len();
        match <[Bytes; 1]>::try_from(messages) {
            Ok([message]) => Ok(message),
            Err(_) => Err(Error::unexpected_reply(method, count)),
        }
    }
}
