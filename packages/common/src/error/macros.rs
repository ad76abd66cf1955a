//! Shorthand for building and returning contextual errors
//!
//! The first argument names an [`Error`](crate::Error) constructor
//! (`configuration`, `transport`, `timeout`, ...); any further arguments
//! form the context message.
//!
//! ```
//! use sitehttp_common::{ensure, Result};
//!
//! fn pool_size(max_total: usize) -> Result<usize> {
//!     ensure!(max_total > 0, configuration, "Pool for {} needs a positive size", "example.org");
//!     Ok(max_total)
//! }
//!
//! assert!(pool_size(0).is_err());
//! ```

/// Build an [`Error`](crate::Error) of the named kind, optionally with context
#[macro_export]
macro_rules! err {
    ($kind:ident $(,)?) => {
        $crate::Error::$kind()
    };
    ($kind:ident, $context:expr $(,)?) => {
        $crate::Error::$kind().context($context)
    };
    ($kind:ident, $fmt:literal, $($arg:expr),+ $(,)?) => {
        $crate::Error::$kind().context(::std::format!($fmt, $($arg),+))
    };
}

/// Return early with [`err!`]
#[macro_export]
macro_rules! bail {
    ($($tokens:tt)+) => {
        return ::core::result::Result::Err($crate::err!($($tokens)+))
    };
}

/// Return early with [`err!`] unless `cond` holds
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($tokens:tt)+) => {
        if !($cond) {
            $crate::bail!($($tokens)+);
        }
    };
}
