//! TCP listener: accept loop, per-connection tasks, shutdown.
//!
//! A [`Listener`] owns one bound socket and the task accepting on it. What is
//! spoken on each accepted connection is up to its [`Transport`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::types::{Error, ListenerConfig, Result};

/// Back-off after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Protocol served on accepted connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name for logs and errors (`"native"`, `"web"`).
    fn name(&self) -> &'static str;

    /// Serve one connection until the peer closes it or `shutdown` fires,
    /// in which case in-flight requests finish and the connection closes.
    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> std::result::Result<(), hyper::Error>;
}

/// A bound, accepting listener.
#[derive(Debug)]
pub struct Listener {
    name: &'static str,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
    // Stops the accept loop if the listener is dropped without `stop`.
    _stop_on_drop: DropGuard,
}

impl Listener {
    /// Bind `addr` and start accepting connections for `transport`.
    pub async fn bind<T: Transport>(
        addr: SocketAddr,
        transport: Arc<T>,
        config: &ListenerConfig,
    ) -> Result<Self> {
        let name = transport.name();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::startup(name, addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::startup(name, addr, e))?;

        let shutdown = CancellationToken::new();
        tracing::info!(
            listener = name,
            %local_addr,
            max_connections = config.max_connections,
            "listening"
        );
        let task = tokio::spawn(accept_loop(
            listener,
            transport,
            shutdown.clone(),
            config.clone(),
        ));

        Ok(Self {
            name,
            local_addr,
            _stop_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            task,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drain open connections and release the socket.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::shutdown(self.name, format!("accept task failed: {}", e))),
        }
    }
}

async fn accept_loop<T: Transport>(
    listener: TcpListener,
    transport: Arc<T>,
    shutdown: CancellationToken,
    config: ListenerConfig,
) -> Result<()> {
    let name = transport.name();
    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(listener = name, "connection task panicked: {}", e);
                    }
                }
            }
            accept = listener.accept() => {
                let (stream, peer) = match accept {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(listener = name, "accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!(
                            listener = name,
                            %peer,
                            "connection rejected: at max_connections ({})",
                            config.max_connections,
                        );
                        drop(stream);
                        continue;
                    }
                };

                tracing::debug!(
                    listener = name,
                    %peer,
                    active = config.max_connections - semaphore.available_permits(),
                    "connection accepted"
                );
                let transport = transport.clone();
                let conn_shutdown = shutdown.child_token();
                connections.spawn(async move {
                    if let Err(e) = transport.serve_connection(stream, conn_shutdown).await {
                        tracing::debug!(listener = name, %peer, "connection error: {}", e);
                    }
                    drop(permit);
                });
            }
        }
    }

    // Release the port before waiting on connections.
    drop(listener);
    tracing::info!(
        listener = name,
        open_connections = connections.len(),
        "stopped accepting"
    );

    let drained = tokio::time::timeout(config.drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            listener = name,
            remaining = connections.len(),
            "drain timeout ({:?}) elapsed; aborting connections",
            config.drain_timeout
        );
        connections.shutdown().await;
    }
    Ok(())
}
