//! Native gRPC listener: HTTP/2 without TLS, status in HTTP trailers.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Request, Response, StatusCode};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use super::http::{self as h, ResponseBody};
use super::listener::Transport;
use crate::backend::{call_metadata, dispatch, Backend, Call};
use crate::codec::{self, Frame, WebMode, CONTENT_TYPE_GRPC};
use crate::types::ListenerConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serves standard gRPC against a [`Backend`].
pub struct NativeTransport {
    backend: Arc<dyn Backend>,
    max_message_bytes: usize,
}

impl std::fmt::Debug for NativeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTransport")
            .field("methods", &self.backend.methods())
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}

/// `application/grpc`, optionally with a `+<subtype>` or parameters, but not
/// one of the gRPC-Web types.
fn is_grpc_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    match value.strip_prefix(CONTENT_TYPE_GRPC) {
        Some(rest) => rest.is_empty() || rest.starts_with('+') || rest.starts_with(';'),
        None => false,
    }
}

impl NativeTransport {
    pub fn new(backend: Arc<dyn Backend>, config: &ListenerConfig) -> Self {
        Self {
            backend,
            max_message_bytes: config.max_message_bytes as usize,
        }
    }

    /// Answer one HTTP/2 request.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        if request.method() != Method::POST {
            return h::status_only(StatusCode::METHOD_NOT_ALLOWED);
        }
        if !is_grpc_content_type(request.headers()) {
            return h::status_only(StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }

        let (parts, body) = request.into_parts();
        let method = parts.uri.path().to_string();
        let metadata = call_metadata(&parts.headers);

        let limit = h::body_limit(self.max_message_bytes, WebMode::Binary);
        let messages = match h::read_body(body, limit).await {
            Ok(raw) => h::decode_request(&raw, WebMode::Binary, self.max_message_bytes),
            Err(status) => Err(status),
        };
        let messages = match messages {
            Ok(messages) => messages,
            Err(status) => return failure(&method, &status),
        };

        let call = Call {
            method: method.clone(),
            metadata,
            messages,
        };
        match dispatch(self.backend.as_ref(), call).await {
            Ok(reply) => {
                let mut trailers = reply.trailers;
                trailers.extend(codec::status_trailers(&Status::ok("")));
                grpc_response(reply.messages, trailers)
            }
            Err(status) => failure(&method, &status),
        }
    }
}

fn failure(method: &str, status: &Status) -> Response<ResponseBody> {
    tracing::debug!(listener = "native", method, code = ?status.code(), "call failed");
    grpc_response(Vec::new(), codec::status_trailers(status))
}

fn grpc_response(messages: Vec<Bytes>, trailers: HeaderMap) -> Response<ResponseBody> {
    let frames: Vec<Frame> = messages.into_iter().map(Frame::message).collect();
    let (body, trailers) = match codec::encode_frames(&frames) {
        Ok(body) => (body, trailers),
        Err(e) => {
            tracing::warn!(listener = "native", error = %e, "reply cannot be framed");
            let status = Status::resource_exhausted(e.to_string());
            (Bytes::new(), codec::status_trailers(&status))
        }
    };
    h::ok_response(h::with_trailers(body, trailers), CONTENT_TYPE_GRPC)
}

#[async_trait]
impl Transport for NativeTransport {
    fn name(&self) -> &'static str {
        "native"
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
        let conn = http2::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(stream), service);
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
