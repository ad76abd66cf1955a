//! Connection pool errors

use std::io;
use std::time::Duration;

use sitehttp_common::{Error, ErrorKind};

/// Failures of the pooled transport layer
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was shut down
    #[error("Connection pool shut down")]
    Shutdown,

    /// No connection became available in time
    #[error("Timeout waiting for connection from pool after {0:?}")]
    LeaseTimeout(Duration),

    /// TCP connect failed
    #[error("Connect to {host} failed: {source}")]
    Connect {
        /// Host being connected to
        host: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// TLS handshake failed
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        /// Host the handshake was for
        host: String,
        /// Underlying failure
        #[source]
        source: io::Error,
    },

    /// The proxy refused to open a tunnel
    #[error("Proxy tunnel to {target} refused: {status}")]
    TunnelRefused {
        /// Tunnel target authority
        target: String,
        /// Proxy status line
        status: String,
    },

    /// Operation needs an open connection
    #[error("Connection is not open")]
    NotOpen,

    /// Other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PoolError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::LeaseTimeout(_) => ErrorKind::Timeout,
            Self::Connect { source, .. } | Self::Handshake { source, .. } | Self::Io(source)
                if source.kind() == io::ErrorKind::TimedOut || source.kind() == io::ErrorKind::WouldBlock =>
            {
                ErrorKind::Timeout
            }
            _ => ErrorKind::Transport,
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        let kind = err.kind();
        Error::with_source(kind, err)
    }
}
