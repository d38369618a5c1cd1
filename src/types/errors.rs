//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Transport
//! failures (startup, framing, not-found) are errors of the operation that hit
//! them; a backend's own failure travels as [`Error::Application`] and keeps
//! its `tonic::Status` untouched.

use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::FrameError;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// A listener could not bind. The bridge is not usable.
    #[error("startup error: {listener} listener could not bind {addr}: {source}")]
    Startup {
        listener: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or method registration.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed web-framed body.
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    /// Unknown method path (map to gRPC NOT_FOUND).
    #[error("not found: {0}")]
    NotFound(String),

    /// Status returned by the backend's own method logic (boxed to reduce Result size).
    #[error("application error: {0}")]
    Application(Box<tonic::Status>),

    /// A listener failed while stopping.
    #[error("shutdown error: {listener} listener: {reason}")]
    Shutdown {
        listener: &'static str,
        reason: String,
    },

    /// Web request whose content type selects neither binary nor text mode.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A reply that does not fit the call shape, such as a unary call
    /// answered with other than one message.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Client-side HTTP or channel failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to gRPC status.
    ///
    /// Application errors come back exactly as the backend produced them.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            Error::Application(status) => (**status).clone(),
            Error::NotFound(msg) => tonic::Status::not_found(msg.clone()),
            Error::Framing(e) => tonic::Status::invalid_argument(e.to_string()),
            Error::Config(msg) => tonic::Status::invalid_argument(msg.clone()),
            Error::UnsupportedContentType(ct) => {
                tonic::Status::invalid_argument(format!("unsupported content type: {}", ct))
            }
            Error::UnexpectedReply(msg) => tonic::Status::internal(msg.clone()),
            Error::Transport(msg) => tonic::Status::unavailable(msg.clone()),
            Error::Startup { .. } | Error::Shutdown { .. } => {
                tonic::Status::unavailable(self.to_string())
            }
            Error::Io(e) => tonic::Status::internal(format!("io error: {}", e)),
        }
    }

    /// The backend status carried by an application error, if that is what this is.
    pub fn as_status(&self) -> Option<&tonic::Status> {
        match self {
            Error::Application(status) => Some(status),
            _ => None,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn startup(listener: &'static str, addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Startup {
            listener,
            addr: addr.to_string(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn shutdown(listener: &'static str, reason: impl Into<String>) -> Self {
        Self::Shutdown {
            listener,
            reason: reason.into(),
        }
    }

    pub fn unexpected_reply(method: &str, count: usize) -> Self {
        Self::UnexpectedReply(format!(
            "{} returned {} messages to a unary call",
            method, count
        ))
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Self::Application(Box::new(status))
    }
}

// Implement From<Error> for Status to enable ? operator in gRPC handlers
impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}
