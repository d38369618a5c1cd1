//! Direct calls into the method table, no transport involved.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::backend::{Backend, Call, Reply};
use crate::types::{Error, Result};

/// Calls the backend's handlers directly. Cheap to clone.
#[derive(Clone)]
pub struct InProcessClient {
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for InProcessClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessClient")
            .field("methods", &self.backend.methods().len())
            .finish()
    }
}

impl InProcessClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Invoke a unary method with already-encoded request bytes.
    ///
    /// Unknown methods fail with [`Error::NotFound`] before anything runs; a
    /// backend failure comes back as [`Error::Application`] with the status
    /// the handler returned. A reply with other than one message is
    /// [`Error::UnexpectedReply`].
    pub async fn unary_request(&self, method: &str, request: impl Into<Bytes>) -> Result<Bytes> {
        let reply = self.call(Call::unary(method, request)).await?;
        let count = reply.messages.len();
        match <[Bytes; 1]>::try_from(reply.messages) {
            Ok([message]) => Ok(message),
            Err(_) => Err(Error::unexpected_reply(method, count)),
        }
    }

    /// Invoke any method: metadata in, every reply message and trailers out.
    pub async fn call(&self, call: Call) -> Result<Reply> {
        let handler = self
            .backend
            .lookup(&call.method)
            .ok_or_else(|| Error::not_found(format!("unknown method {}", call.method)))?;
        tracing::debug!(method = %call.method, "in-process call");
        handler.call(call).await.map_err(Error::from)
    }
}
