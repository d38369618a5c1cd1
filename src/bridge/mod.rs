//! The bridge: one backend behind a native gRPC listener, a gRPC-Web
//! listener and an in-process client.
//!
//! ```text
//!   gRPC (HTTP/2)      ─→ native listener ─┐
//!   gRPC-Web (HTTP/1)  ─→ web listener    ─┼─→ Backend (method table)
//!   InProcessClient    ───────────────────-┘
//! ```
//!
//! [`Bridge::start`] binds both listeners or neither; [`Bridge::close`]
//! stops both and releases their ports.

pub mod http;
pub mod listener;
pub mod native;
pub mod web;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::backend::Backend;
use crate::client::InProcessClient;
use crate::types::{Config, Result};

pub use listener::{Listener, Transport};
pub use native::NativeTransport;
pub use web::WebTransport;

/// A running bridge.
pub struct Bridge {
    native: Listener,
    web: Listener,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("native", &self.native)
            .field("web", &self.web)
            .field("methods", &self.backend.methods())
            .finish()
    }
}

impl Bridge {
    /// Validate `config`, then bind the native listener and the web listener,
    /// in that order. If the web listener cannot bind, the native one is
    /// stopped again before the error is returned.
    pub async fn start(config: Config, backend: Arc<dyn Backend>) -> Result<Self> {
        let (native_addr, web_addr) = config.validate()?;

        let native = Listener::bind(
            native_addr,
            Arc::new(NativeTransport::new(backend.clone(), &config.listener)),
            &config.listener,
        )
        .await?;

        let web_transport = WebTransport::new(backend.clone(), &config.listener, &config.web);
        let web = match Listener::bind(web_addr, Arc::new(web_transport), &config.listener).await {
            Ok(web) => web,
            Err(e) => {
                if let Err(stop_err) = native.stop().await {
                    tracing::warn!("stopping native listener after failed start: {}", stop_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            native_addr = %native.local_addr(),
            web_addr = %web.local_addr(),
            methods = backend.methods().len(),
            "bridge started"
        );
        Ok(Self {
            native,
            web,
            backend,
        })
    }

    /// Bound address of the native gRPC listener.
    pub fn native_addr(&self) -> SocketAddr {
        self.native.local_addr()
    }

    /// Bound address of the gRPC-Web listener.
    pub fn web_addr(&self) -> SocketAddr {
        self.web.local_addr()
    }

    /// Client calling the backend directly. It shares the backend, not the
    /// listeners, so it keeps working after [`Bridge::close`].
    pub fn in_process_client(&self) -> InProcessClient {
        InProcessClient::new(self.backend.clone())
    }

    /// Stop both listeners (native first), draining open connections. Both
    /// are stopped even if the first fails; the first error is returned.
    pub async fn close(self) -> Result<()> {
        let native = self.native.stop().await;
        finish_close(native, self.web).await
    }
}

/// Stop the web listener whatever became of the native one.
async fn finish_close(native: Result<()>, web: Listener) -> Result<()> {
    let web = web.stop().await;
    let result = native.and(web);
    match &result {
        Ok(()) => tracing::info!("bridge closed"),
        Err(e) => tracing::warn!("bridge closed with error: {}", e),
    }
    result
}
