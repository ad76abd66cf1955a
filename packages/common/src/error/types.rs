//! The workspace error record and its kinds

use std::sync::Arc;
use thiserror::Error;

/// Error shared by every sitehttp crate
///
/// Cloning is cheap; clones share the same inner record. Callers branch on
/// [`ErrorKind`] and read the context for the site or pool involved.
#[derive(Debug, Clone)]
pub struct Error {
    pub(super) inner: Arc<ErrorInner>,
}

#[derive(Debug)]
pub(super) struct ErrorInner {
    pub kind: ErrorKind,
    /// Human readable description of what was being attempted
    pub context: Option<String>,
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    #[cfg(feature = "full-backtrace")]
    pub backtrace: backtrace::Backtrace,
}

/// Broad failure classes surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// Socket or stream failure outside the pool
    #[error("I/O error")]
    Io,

    /// Invalid or unusable site configuration, including TLS material
    #[error("Configuration error")]
    Configuration,

    /// Connection-level failure reported by the pooled transport layer
    #[error("Transport error")]
    Transport,

    /// A lease or connect deadline passed
    #[error("Operation timed out")]
    Timeout,

    /// A blocking wait was interrupted before it completed
    #[error("Interrupted")]
    Interrupted,

    /// Broken internal invariant, such as a reference count overflow
    #[error("Internal error")]
    Internal,

    /// Free-form failure; the message is the whole display
    #[error("{0}")]
    Other(String),
}

/// `Result` defaulting to the workspace [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
