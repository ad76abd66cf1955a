//! Errors carrying a kind, a context message and a cause chain
//!
//! Library code returns [`Result`] and attaches context at the point where
//! the site, route or pool involved is known:
//! - [`ResultExt`] and [`OptionExt`] adapt foreign results and options
//! - `err!`, `bail!` and `ensure!` build contextual errors inline
//! - [`LoggingTransformer`] installs the process logger

pub mod constructors;
pub mod display;
pub mod extensions;
pub mod logging;
pub mod macros;
pub mod types;

pub use extensions::{OptionExt, ResultExt};
pub use logging::LoggingTransformer;
pub use types::{Error, ErrorKind, Result};
