//! The backend the bridge forwards calls to.
//!
//! A backend is a read-only method table: method path to [`Handler`]. All
//! three call paths (native listener, web listener, in-process client) look
//! handlers up here and call them the same way.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use grpc_bridge::backend::MethodTable;
//!
//! let table = MethodTable::builder()
//!     .unary("/demo.Greeter/Hello", |name: Bytes| async move {
//!         Ok(Bytes::from([b"hello ".as_slice(), &name[..]].concat()))
//!     })
//!     .build()
//!     .unwrap();
//! assert!(table.contains("/demo.Greeter/Hello"));
//! ```

pub mod echo;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tonic::Status;

use crate::types::{Error, Result};

/// One RPC invocation as the backend sees it.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// `/<package>.<Service>/<Method>`.
    pub method: String,
    /// Request metadata forwarded from the transport.
    pub metadata: HeaderMap,
    /// Request messages in arrival order.
    pub messages: Vec<Bytes>,
}

impl Call {
    /// Call with a single request message and no metadata.
    pub fn unary(method: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            method: method.into(),
            metadata: HeaderMap::new(),
            messages: vec![message.into()],
        }
    }
}

/// Successful result of a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub messages: Vec<Bytes>,
    /// Extra trailer metadata sent after the messages.
    pub trailers: HeaderMap,
}

impl Reply {
    pub fn unary(message: impl Into<Bytes>) -> Self {
        Self {
            messages: vec![message.into()],
            trailers: HeaderMap::new(),
        }
    }

    pub fn streaming(messages: Vec<Bytes>) -> Self {
        Self {
            messages,
            trailers: HeaderMap::new(),
        }
    }

    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = trailers;
        self
    }
}

/// A registered method.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Run the method. An `Err` is the call's application status.
    async fn call(&self, call: Call) -> std::result::Result<Reply, Status>;
}

/// Method table lookup.
pub trait Backend: Send + Sync + 'static {
    fn lookup(&self, method: &str) -> Option<Arc<dyn Handler>>;

    /// Registered method paths, sorted.
    fn methods(&self) -> Vec<String>;
}

/// Look `call.method` up and run it. Unknown methods answer `UNIMPLEMENTED`,
/// as a gRPC server would.
pub async fn dispatch(backend: &dyn Backend, call: Call) -> std::result::Result<Reply, Status> {
    let Some(handler) = backend.lookup(&call.method) else {
        tracing::debug!(method = %call.method, "unknown method");
        return Err(Status::unimplemented(format!(
            "unknown method {}",
            call.method
        )));
    };
    tracing::debug!(method = %call.method, messages = call.messages.len(), "dispatching call");
    handler.call(call).await
}

/// Request headers that belong to the transport rather than the call.
fn is_transport_header(name: &str) -> bool {
    matches!(
        name,
        "content-type"
            | "content-length"
            | "te"
            | "host"
            | "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "user-agent"
            | "accept"
            | "accept-encoding"
            | "origin"
            | "referer"
            | "x-grpc-web"
            | "x-user-agent"
    ) || name.starts_with("grpc-")
        || name.starts_with("access-control-")
        || name.starts_with("sec-")
}

/// Call metadata from HTTP request headers.
pub fn call_metadata(headers: &HeaderMap) -> HeaderMap {
    let mut metadata = HeaderMap::new();
    for (name, value) in headers {
        if !is_transport_header(name.as_str()) {
            metadata.append(name.clone(), value.clone());
        }
    }
    metadata
}

/// Expect exactly one request message.
fn single_message(call: Call) -> std::result::Result<Bytes, Status> {
    let count = call.messages.len();
    let mut messages = call.messages.into_iter();
    match (messages.next(), count) {
        (Some(message), 1) => Ok(message),
        _ => Err(Status::invalid_argument(format!(
            "{} expects exactly one request message, got {}",
            call.method, count
        ))),
    }
}

/// Unary method from an async closure.
struct UnaryFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for UnaryFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Bytes, Status>> + Send + 'static,
{
    async fn call(&self, call: Call) -> std::result::Result<Reply, Status> {
        let message = single_message(call)?;
        (self.0)(message).await.map(Reply::unary)
    }
}

/// Server-streaming method from an async closure.
struct ServerStreamingFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for ServerStreamingFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<Bytes>, Status>> + Send + 'static,
{
    async fn call(&self, call: Call) -> std::result::Result<Reply, Status> {
        let message = single_message(call)?;
        (self.0)(message).await.map(Reply::streaming)
    }
}

/// Check `/<service>/<method>` shape.
pub fn validate_method_path(path: &str) -> Result<()> {
    let valid = path
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(service, method)| {
            !service.is_empty() && !method.is_empty() && !method.contains('/')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!(
            "method path {:?} is not of the form /<service>/<method>",
            path
        )))
    }
}

/// Immutable method table.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Arc<dyn Handler>>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods())
            .finish()
    }
}

impl MethodTable {
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Backend for MethodTable {
    fn lookup(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(method).cloned()
    }

    fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.methods.keys().cloned().collect();
        methods.sort();
        methods
    }
}

/// Collects registrations; the first invalid or duplicate path fails `build`.
#[derive(Default)]
pub struct MethodTableBuilder {
    methods: HashMap<String, Arc<dyn Handler>>,
    error: Option<Error>,
}

impl fmt::Debug for MethodTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTableBuilder")
            .field("methods", &self.methods.len())
            .field("error", &self.error)
            .finish()
    }
}

impl MethodTableBuilder {
    /// Register any [`Handler`].
    pub fn handler(mut self, path: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let path = path.into();
        if let Err(e) = validate_method_path(&path) {
            self.error = Some(e);
        } else if self.methods.contains_key(&path) {
            self.error = Some(Error::config(format!("method {} registered twice", path)));
        } else {
            self.methods.insert(path, handler);
        }
        self
    }

    /// Register a unary method: one request message, one reply message.
    pub fn unary<F, Fut>(self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Bytes, Status>> + Send + 'static,
    {
        self.handler(path, Arc::new(UnaryFn(f)))
    }

    /// Register a server-streaming method: one request message, any number
    /// of reply messages.
    pub fn server_streaming<F, Fut>(self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Vec<Bytes>, Status>> + Send + 'static,
    {
        self.handler(path, Arc::new(ServerStreamingFn(f)))
    }

    pub fn build(self) -> Result<MethodTable> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(MethodTable {
                methods: self.methods,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn table() -> MethodTable {
        MethodTable::builder()
            .unary("/test.Svc/Echo", |req: Bytes| async move { Ok(req) })
            .server_streaming("/test.Svc/Twice", |req: Bytes| async move {
                Ok(vec![req.clone(), req])
            })
            .unary("/test.Svc/Fail", |_req: Bytes| async move {
                Err(Status::failed_precondition("nope"))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn dispatches_unary() {
        let table = table();
        let reply = dispatch(&table, Call::unary("/test.Svc/Echo", &b"hi"[..]))
            .await
            .unwrap();
        assert_eq!(reply, Reply::unary(&b"hi"[..]));
    }

    #[tokio::test]
    async fn dispatches_server_streaming() {
        let table = table();
        let reply = dispatch(&table, Call::unary("/test.Svc/Twice", &b"x"[..]))
            .await
            .unwrap();
        assert_eq!(reply.messages.len(), 2);
    }

    #[tokio::test]
    async fn unknown_method_is_unimplemented() {
        let status = dispatch(&table(), Call::unary("/test.Svc/Missing", Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn application_error_is_returned_as_is() {
        let status = dispatch(&table(), Call::unary("/test.Svc/Fail", Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert_eq!(status.message(), "nope");
    }

    #[tokio::test]
    async fn unary_rejects_wrong_message_count() {
        let call = Call {
            method: "/test.Svc/Echo".to_string(),
            metadata: HeaderMap::new(),
            messages: vec![Bytes::new(), Bytes::new()],
        };
        let status = dispatch(&table(), call).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let call = Call {
            method: "/test.Svc/Echo".to_string(),
            ..Call::default()
        };
        let status = dispatch(&table(), call).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn method_paths_are_validated() {
        assert!(validate_method_path("/berty.chat.ChatService/ConversationGet").is_ok());
        assert!(validate_method_path("berty.chat.ChatService/ConversationGet").is_err());
        assert!(validate_method_path("/ChatService").is_err());
        assert!(validate_method_path("/svc/").is_err());
        assert!(validate_method_path("//Method").is_err());
        assert!(validate_method_path("/a/b/c").is_err());
    }

    #[test]
    fn duplicate_registration_fails_build() {
        let err = MethodTable::builder()
            .unary("/a.B/C", |r: Bytes| async move { Ok(r) })
            .unary("/a.B/C", |r: Bytes| async move { Ok(r) })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("twice")));
    }

    #[test]
    fn methods_are_sorted() {
        assert_eq!(
            table().methods(),
            vec!["/test.Svc/Echo", "/test.Svc/Fail", "/test.Svc/Twice"]
        );
    }

    #[test]
    fn transport_headers_are_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/grpc"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("grpc-timeout", HeaderValue::from_static("1S"));
        headers.insert("x-grpc-web", HeaderValue::from_static("1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("x-request-id", HeaderValue::from_static("42"));

        let metadata = call_metadata(&headers);
        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata["authorization"], "Bearer t");
        assert_eq!(metadata["x-request-id"], "42");
    }
}
