use std::{io, net::SocketAddr};

use thiserror::Error;

/// Error type returned by application [`Handler`](crate::Handler)s.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("event loop is stopped")]
    Stopped,
    #[error("event loop is already running")]
    AlreadyRunning,
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HarnessError {
    /// Whether the error ended the event loop for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::Bind { .. } | HarnessError::Poll(_))
    }
}
