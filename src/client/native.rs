//! Schema-less gRPC client over a `tonic` channel.

use std::net::SocketAddr;

use bytes::Bytes;
use http::uri::PathAndQuery;
use tonic::client::Grpc;
use tonic::transport::{Channel, Endpoint};

use crate::codec::RawCodec;
use crate::types::{Error, Result};

/// gRPC client sending and receiving already-encoded messages.
#[derive(Debug, Clone)]
pub struct NativeClient {
    inner: Grpc<Channel>,
}

impl NativeClient {
    /// Connect over cleartext HTTP/2 to a bridge's native listener.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| Error::transport(e.to_string()))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::transport(format!("connecting to {}: {}", addr, e)))?;
        Ok(Self {
            inner: Grpc::new(channel),
        })
    }

    fn path(method: &str) -> Result<PathAndQuery> {
        PathAndQuery::try_from(method)
            .map_err(|e| Error::config(format!("method path {:?}: {}", method, e)))
    }

    async fn ready(&mut self) -> Result<()> {
        self.inner
            .ready()
            .await
            .map_err(|e| Error::transport(format!("channel not ready: {}", e)))
    }

    /// Unary call. A non-OK status is returned as [`Error::Application`].
    pub async fn unary(&mut self, method: &str, request: impl Into<Bytes>) -> Result<Bytes> {
        let path = Self::path(method)?;
        self.ready().await?;
        let response = self
            .inner
            .unary(tonic::Request::new(request.into()), path, RawCodec)
            .await?;
        Ok(response.into_inner())
    }

    /// Server-streaming call, collecting every reply message.
    pub async fn server_streaming(
        &mut self,
        method: &str,
        request: impl Into<Bytes>,
    ) -> Result<Vec<Bytes>> {
        let path = Self::path(method)?;
        self.ready().await?;
        let mut stream = self
            .inner
            .server_streaming(tonic::Request::new(request.into()), path, RawCodec)
            .await?
            .into_inner();

        let mut messages = Vec::new();
        while let Some(message) = stream.message().await? {
            messages.push(message);
        }
        Ok(messages)
    }
}
