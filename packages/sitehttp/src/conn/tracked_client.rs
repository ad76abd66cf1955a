//! Client that gives its pool reference back on close

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sitehttp_common::Result;

use crate::client::{ClientContext, HttpClient, PooledHttpClient, RequestHead};

use super::connection::ManagedConnection;
use super::route::HttpHost;
use super::tracker::ConnectionManagerTracker;

/// A [`PooledHttpClient`] over a shared pool, holding one tracker reference
///
/// Closing, explicitly or by drop, closes the inner client (its manager
/// ignores the shutdown) and releases the reference exactly once.
pub struct TrackedHttpClient {
    client: PooledHttpClient,
    tracker: Arc<ConnectionManagerTracker>,
    released: AtomicBool,
}

impl TrackedHttpClient {
    /// Wrap `client`, which holds a reference acquired from `tracker`
    #[must_use]
    pub fn new(client: PooledHttpClient, tracker: Arc<ConnectionManagerTracker>) -> Self {
        Self {
            client,
            tracker,
            released: AtomicBool::new(false),
        }
    }

    /// The wrapped client
    #[must_use]
    pub fn inner(&self) -> &PooledHttpClient {
        &self.client
    }

    /// Tracker the pool reference belongs to
    #[must_use]
    pub fn tracker(&self) -> &Arc<ConnectionManagerTracker> {
        &self.tracker
    }
}

impl HttpClient for TrackedHttpClient {
    fn execute<T, F>(&self, target: &HttpHost, context: &ClientContext, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut ManagedConnection, &RequestHead) -> io::Result<T>,
    {
        self.client.execute(target, context, exchange)
    }

    fn close(&self) {
        self.client.close();
        if !self.released.swap(true, Ordering::AcqRel) {
            tracing::trace!("Releasing connection manager reference for {}", self.tracker.config());
            self.tracker.release();
        }
    }

    fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for TrackedHttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for TrackedHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedHttpClient")
            .field("client", &self.client)
            .field("tracker", &self.tracker)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}
