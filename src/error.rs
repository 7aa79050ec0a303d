use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors produced by the event loop and the TCP server/client built on it.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The remote end closed its side of the stream.
    #[error("connection closed by peer")]
    PeerClosed,

    /// An operation was interrupted by a deliberate stop.
    #[error("operation cancelled")]
    Cancelled,

    #[error("event loop is already running")]
    AlreadyRunning,

    #[error("event loop is gone")]
    EventLoopGone,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl NetworkError {
    /// Returns `true` for errors caused by a deliberate `stop()`/`close()`.
    ///
    /// These end the affected read/write loop silently and must never trigger
    /// retirement or reconnection.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, NetworkError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(NetworkError::Cancelled.is_cancellation());
        assert!(!NetworkError::PeerClosed.is_cancellation());
        assert!(!NetworkError::from(io::Error::from(io::ErrorKind::ConnectionReset))
            .is_cancellation());
    }

    #[test]
    fn test_bind_error_display() {
        let err = NetworkError::Bind {
            addr: "127.0.0.1:13".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:13"));
    }
}
