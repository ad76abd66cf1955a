//! Extension traits for attaching an error kind and context to foreign results

use super::types::{Error, ErrorKind, Result};
use std::fmt;

/// Convert any `std::error::Error` result into our [`Error`]
pub trait ResultExt<T> {
    /// Wrap the error as `kind` with a context message
    fn context_as<C: fmt::Display>(self, kind: ErrorKind, context: C) -> Result<T>;

    /// Like [`ResultExt::context_as`] but the context is built lazily
    fn with_context_as<C, F>(self, kind: ErrorKind, f: F) -> Result<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_as<C: fmt::Display>(self, kind: ErrorKind, context: C) -> Result<T> {
        self.map_err(|e| Error::with_source(kind, e).context(context))
    }

    fn with_context_as<C, F>(self, kind: ErrorKind, f: F) -> Result<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::with_source(kind, e).context(f()))
    }
}

/// Turn a missing value into an [`Error`]
pub trait OptionExt<T> {
    /// Map `None` to an error of `kind` with a context message
    fn ok_or_kind<C: fmt::Display>(self, kind: ErrorKind, context: C) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_kind<C: fmt::Display>(self, kind: ErrorKind, context: C) -> Result<T> {
        self.ok_or_else(|| Error::new(kind).context(context))
    }
}
