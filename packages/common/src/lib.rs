//! Common infrastructure for the sitehttp workspace
//!
//! This crate provides shared functionality used across the workspace:
//! - Error handling with context propagation
//! - Logging bootstrap with secure handling of identifiers

#![forbid(unsafe_code)]

pub mod error;

pub use error::*;
