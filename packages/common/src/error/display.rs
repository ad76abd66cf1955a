//! Rendering of errors and their cause chains

use super::types::Error;
use std::fmt;

impl Error {
    /// Innermost error in the cause chain, or `self` when there is none
    #[must_use]
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut current: &(dyn std::error::Error + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    // Kind and own context only; causes are rendered by the caller.
    fn write_headline(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.context {
            Some(context) => write!(f, "{}: {context}", self.inner.kind),
            None => write!(f, "{}", self.inner.kind),
        }
    }
}

/// One line per link: `kind: context`, then `Caused by: ...` for every
/// source down to the root
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_headline(f)?;

        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            f.write_str("\nCaused by: ")?;
            match err.downcast_ref::<Error>() {
                Some(inner) => inner.write_headline(f)?,
                None => write!(f, "{err}")?,
            }
            cause = err.source();
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.inner.source.as_deref()?;
        Some(source as &(dyn std::error::Error + 'static))
    }
}
