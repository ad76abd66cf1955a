//! Error constructors and methods

use super::types::{Error, ErrorInner, ErrorKind};
use std::fmt;
use std::sync::Arc;

impl Error {
    /// Create a new error with the given kind
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self::from_parts(kind, None, None)
    }

    /// Create an error with a source error
    #[must_use]
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_parts(kind, None, Some(Arc::new(source)))
    }

    fn from_parts(
        kind: ErrorKind,
        context: Option<String>,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(ErrorInner {
                kind,
                context,
                source,
                #[cfg(feature = "full-backtrace")]
                backtrace: backtrace::Backtrace::new_unresolved(),
            }),
        }
    }

    /// Add context to this error
    ///
    /// An error that already carries context becomes the source of the new one,
    /// so no message is lost along the chain.
    #[must_use]
    pub fn context<C: fmt::Display>(self, context: C) -> Self {
        let source = if self.inner.context.is_some() {
            Some(Arc::new(self.clone()) as Arc<dyn std::error::Error + Send + Sync>)
        } else {
            self.inner.source.clone()
        };
        Self::from_parts(self.inner.kind.clone(), Some(context.to_string()), source)
    }

    /// Get the error kind
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    /// Whether this error is of the given kind
    #[must_use]
    pub fn is(&self, kind: &ErrorKind) -> bool {
        &self.inner.kind == kind
    }

    /// Get the error context if any
    #[must_use]
    pub fn get_context(&self) -> Option<&str> {
        self.inner.context.as_deref()
    }

    /// Get the backtrace
    #[cfg(feature = "full-backtrace")]
    #[must_use]
    pub fn backtrace(&self) -> &backtrace::Backtrace {
        &self.inner.backtrace
    }

    /// Create an I/O error
    #[must_use]
    pub fn io() -> Self {
        Self::new(ErrorKind::Io)
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Create a transport error
    #[must_use]
    pub fn transport() -> Self {
        Self::new(ErrorKind::Transport)
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    /// Create an interrupted error
    #[must_use]
    pub fn interrupted() -> Self {
        Self::new(ErrorKind::Interrupted)
    }

    /// Create an internal error
    #[must_use]
    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }

    /// Create an other error with custom message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Other(msg.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Io, err)
    }
}
