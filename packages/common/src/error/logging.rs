//! Structured logging bootstrap
//!
//! Provides env_logger-based logging with secure handling of sensitive data.
//! Crates in this workspace emit through `tracing` built with its `log`
//! feature, so the records land in the logger installed here.

use log::{info, warn};
use sha2::{Digest, Sha256};
use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Logging bootstrap and secure log helpers
pub struct LoggingTransformer;

impl LoggingTransformer {
    /// Install the process logger; later calls are no-ops
    ///
    /// Levels come from `RUST_LOG`:
    /// - `RUST_LOG=debug` - lifecycle of pools, trackers and TLS contexts
    /// - `RUST_LOG=trace` - every delegated pool operation and key material listing
    /// - `RUST_LOG=sitehttp::conn=debug` - module-specific levels
    pub fn init() {
        INIT_LOGGER.call_once(|| {
            env_logger::Builder::from_default_env()
                .format_timestamp_micros()
                .init();

            info!("Structured logging initialized");
        });
    }

    /// Install a logger that writes through the test harness capture
    ///
    /// Safe to call from every test; only the first call installs the logger.
    pub fn init_test() {
        let _ = env_logger::Builder::from_default_env()
            .is_test(true)
            .try_init();
    }

    /// Log authentication setup without exposing the user name
    pub fn log_auth_event(event: &str, user_id: Option<&str>, success: bool) {
        if success {
            let user_tag = user_id.map_or_else(|| "anonymous".to_string(), Self::fingerprint);
            info!("Authentication configured: {event} (user: {user_tag})");
        } else {
            warn!("Authentication not configured: {event}");
        }
    }

    /// Log shutdown of a shared component
    pub fn log_shutdown_event(component: &str, forced: bool, outstanding: usize) {
        if forced && outstanding > 0 {
            warn!("Forced shutdown of {component} with {outstanding} outstanding reference(s)");
        } else {
            info!("Shut down {component} (forced: {forced})");
        }
    }

    /// Stable tag standing in for an identifier in log lines
    ///
    /// Returns `#` followed by the first 12 hex characters of the SHA-256 digest.
    #[must_use]
    pub fn fingerprint(key: &str) -> String {
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        format!("#{}", &digest[..12])
    }
}
