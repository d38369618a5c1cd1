//! gRPC-Web listener over HTTP/1.1.
//!
//! Every call answers `200 OK` once the content type is recognised; the call
//! status travels in the trailer frame at the end of the body, and is also
//! copied into the response headers when it is not OK so that clients which
//! never see the body still learn what happened. Browsers get CORS headers
//! per [`WebConfig::allowed_origins`].

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, CONTENT_TYPE, ORIGIN, VARY,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use super::http::{self as h, ResponseBody};
use super::listener::Transport;
use crate::backend::{call_metadata, dispatch, Backend, Call};
use crate::codec::{self, Frame, WebMode};
use crate::types::{Error, ListenerConfig, WebConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_ALLOW_HEADERS: &str =
    "content-type, x-grpc-web, x-user-agent, grpc-timeout, authorization";
const EXPOSE_HEADERS: &str = "grpc-status, grpc-message, grpc-status-details-bin";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Serves gRPC-Web against a [`Backend`].
pub struct WebTransport {
    backend: Arc<dyn Backend>,
    max_message_bytes: usize,
    web: WebConfig,
}

impl std::fmt::Debug for WebTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebTransport")
            .field("methods", &self.backend.methods())
            .field("max_message_bytes", &self.max_message_bytes)
            .field("allowed_origins", &self.web.allowed_origins)
            .finish()
    }
}

impl WebTransport {
    pub fn new(backend: Arc<dyn Backend>, listener: &ListenerConfig, web: &WebConfig) -> Self {
        Self {
            backend,
            max_message_bytes: listener.max_message_bytes as usize,
            web: web.clone(),
        }
    }

    /// Answer one HTTP/1.1 request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let origin = request
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut response = match *request.method() {
            Method::OPTIONS => preflight(request.headers()),
            Method::POST => self.call(request).await,
            _ => h::status_only(StatusCode::METHOD_NOT_ALLOWED),
        };
        self.apply_cors(origin.as_deref(), response.headers_mut());
        response
    }

    async fn call<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let Some(mode) = WebMode::from_content_type(content_type) else {
            let err = Error::UnsupportedContentType(content_type.to_string());
            tracing::debug!(listener = "web", "{}", err);
            return h::status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        };

        let (parts, body) = request.into_parts();
        let method = parts.uri.path().to_string();
        let metadata = call_metadata(&parts.headers);

        let limit = h::body_limit(self.max_message_bytes, mode);
        let messages = match h::read_body(body, limit).await {
            Ok(raw) => h::decode_request(&raw, mode, self.max_message_bytes),
            Err(status) => Err(status),
        };
        let outcome = match messages {
            Ok(messages) => {
                let call = Call {
                    method: method.clone(),
                    metadata,
                    messages,
                };
                dispatch(self.backend.as_ref(), call).await
            }
            Err(status) => Err(status),
        };

        match outcome {
            Ok(reply) => respond(mode, reply.messages, &Status::ok(""), reply.trailers),
            Err(status) => {
                tracing::debug!(listener = "web", %method, code = ?status.code(), "call failed");
                respond(mode, Vec::new(), &status, HeaderMap::new())
            }
        }
    }

    fn apply_cors(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        let Some(allowed) = self.web.allow_origin(origin) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(allowed) else {
            return;
        };
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSE_HEADERS),
        );
        if allowed != "*" {
            headers.append(VARY, HeaderValue::from_static("origin"));
        }
    }
}

fn preflight(request_headers: &HeaderMap) -> Response<ResponseBody> {
    let mut response = h::status_only(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    let allow_headers = request_headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOW_HEADERS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
    headers.insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

/// Reply messages, then one trailer frame with `extra` plus the status.
fn respond(
    mode: WebMode,
    messages: Vec<Bytes>,
    status: &Status,
    extra: HeaderMap,
) -> Response<ResponseBody> {
    let status_headers = codec::status_trailers(status);
    let mut trailers = extra;
    trailers.extend(status_headers.clone());

    let mut frames: Vec<Frame> = messages.into_iter().map(Frame::message).collect();
    frames.push(Frame::from_trailers(&trailers));
    let body = match codec::encode_body(&frames, mode) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(listener = "web", error = %e, "reply cannot be framed");
            let status = Status::resource_exhausted(e.to_string());
            return respond(mode, Vec::new(), &status, HeaderMap::new());
        }
    };

    let mut response = h::ok_response(h::full(body), mode.content_type());
    if !codec::trailers::is_ok(status) {
        response.headers_mut().extend(status_headers);
    }
    response
}

#[async_trait]
impl Transport for WebTransport {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> Result<(), hyper::Error> {
        let transport = self;
        let service = service_fn(move |request: Request<Incoming>| {
            let transport = transport.clone();
            async move { Ok::<_, Infallible>(transport.handle(request).await) }
        });
        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let mut draining = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => return result,
                _ = shutdown.cancelled(), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}
