//! Concurrent map from pool key to tracker, plus global shutdown control

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use sitehttp_common::{Error, ErrorKind, Result};

use crate::tls::SslSocketFactory;

use super::manager::{ConnectionManager, PoolingConnectionManager};
use super::site_connection_config::SiteConnectionConfig;
use super::tracker::ConnectionManagerTracker;

/// Creates the connection manager for a new tracker
pub type ManagerFactory =
    dyn Fn(&SiteConnectionConfig) -> Result<Arc<dyn ConnectionManager>> + Send + Sync;

const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// One tracker per distinct [`SiteConnectionConfig`], created on demand
pub struct ConnectionManagerCache {
    trackers: DashMap<SiteConnectionConfig, Arc<ConnectionManagerTracker>>,
    // Per-key creation gates; the manager factory runs holding only its key's gate.
    creating: DashMap<SiteConnectionConfig, Arc<Mutex<()>>>,
    manager_factory: Arc<ManagerFactory>,
    shutdown_waiters: AtomicUsize,
    interrupt_requested: AtomicBool,
}

impl ConnectionManagerCache {
    /// Cache creating [`PoolingConnectionManager`]s sized from each key
    #[must_use]
    pub fn new() -> Self {
        Self::with_manager_factory(default_manager)
    }

    /// Cache creating managers with `factory`
    pub fn with_manager_factory<F>(factory: F) -> Self
    where
        F: Fn(&SiteConnectionConfig) -> Result<Arc<dyn ConnectionManager>> + Send + Sync + 'static,
    {
        Self {
            trackers: DashMap::new(),
            creating: DashMap::new(),
            manager_factory: Arc::new(factory),
            shutdown_waiters: AtomicUsize::new(0),
            interrupt_requested: AtomicBool::new(false),
        }
    }

    /// Tracker for `config`, created if absent
    ///
    /// Concurrent callers with equal configs observe the same tracker. A
    /// tracker found already shut down is replaced with a fresh one.
    ///
    /// The manager factory runs outside every map lock, so lookups of other
    /// keys never wait on it; only callers for the same key do. A factory must
    /// therefore not look up the key it is creating a manager for.
    ///
    /// # Errors
    ///
    /// Propagates a failure to create the connection manager.
    pub fn get_tracker_for(&self, config: &SiteConnectionConfig) -> Result<Arc<ConnectionManagerTracker>> {
        if let Some(tracker) = self.live_tracker(config) {
            return Ok(tracker);
        }

        let gate = self.creating.entry(config.clone()).or_default().clone();
        let _creating = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tracker) = self.live_tracker(config) {
            return Ok(tracker);
        }

        let created = self.new_tracker(config);
        if let Ok(tracker) = &created {
            if let Some(previous) = self.trackers.insert(config.clone(), tracker.clone()) {
                tracing::debug!(
                    "Replaced shut down connection manager tracker for {} (was {:?})",
                    config,
                    previous
                );
            }
        }
        // Keep the gate while other callers still queue on it.
        self.creating
            .remove_if(config, |_, held| Arc::ptr_eq(held, &gate) && Arc::strong_count(held) == 2);
        created
    }

    /// Look up the tracker for `config` and take a reference on it
    ///
    /// Retries when the tracker is shut down between lookup and acquire.
    ///
    /// # Errors
    ///
    /// Returns a transport error if no live tracker could be acquired, or a
    /// manager creation failure.
    pub fn acquire(
        &self,
        config: &SiteConnectionConfig,
    ) -> Result<(Arc<ConnectionManagerTracker>, Arc<dyn ConnectionManager>)> {
        let mut attempt = 1;
        loop {
            let tracker = self.get_tracker_for(config)?;
            match tracker.acquire() {
                Ok(manager) => return Ok((tracker, manager)),
                Err(e) if tracker.is_shutdown() && attempt < MAX_ACQUIRE_ATTEMPTS => {
                    tracing::debug!("Tracker for {} shut down during acquire (attempt {}): {}", config, attempt, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether every tracked manager has been shut down; true when empty
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.trackers.iter().all(|entry| entry.value().is_shutdown())
    }

    /// Shut down every manager now, whatever the outstanding references
    ///
    /// Returns [`is_shutdown`](Self::is_shutdown) afterwards.
    pub fn shutdown_now(&self) -> bool {
        let trackers = self.snapshot();
        tracing::info!("Shutting down {} connection manager(s) immediately", trackers.len());
        for tracker in &trackers {
            tracker.really_shutdown();
        }
        self.is_shutdown()
    }

    /// Retire every tracker and wait, against one shared deadline, for all of
    /// them to drain
    ///
    /// Returns whether every manager was shut down in time. Managers that did
    /// not drain stay retired and shut down on their last release.
    ///
    /// # Errors
    ///
    /// Returns an interrupted error if
    /// [`interrupt_shutdown`](Self::interrupt_shutdown) is called meanwhile.
    pub fn shutdown_gracefully(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let trackers = self.snapshot();
        tracing::info!(
            "Shutting down {} connection manager(s) gracefully (timeout {:?})",
            trackers.len(),
            timeout
        );
        self.shutdown_waiters.fetch_add(1, Ordering::AcqRel);
        for tracker in &trackers {
            tracker.retire();
        }

        let outcome = self.await_all(&trackers, deadline);
        if self.shutdown_waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.interrupt_requested.store(false, Ordering::Release);
        }
        outcome
    }

    /// Interrupt every thread blocked in
    /// [`shutdown_gracefully`](Self::shutdown_gracefully)
    pub fn interrupt_shutdown(&self) {
        if self.shutdown_waiters.load(Ordering::Acquire) > 0 {
            self.interrupt_requested.store(true, Ordering::Release);
        }
        let interrupted = self
            .snapshot()
            .iter()
            .filter(|tracker| tracker.interrupt())
            .count();
        tracing::debug!("Interrupted graceful shutdown of {} connection manager(s)", interrupted);
    }

    /// Number of tracked managers, including shut down ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    /// Whether no manager has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    fn await_all(&self, trackers: &[Arc<ConnectionManagerTracker>], deadline: Instant) -> Result<bool> {
        let mut all_drained = true;
        for tracker in trackers {
            if self.interrupt_requested.load(Ordering::Acquire) {
                return Err(Error::interrupted().context("Interrupted during graceful shutdown"));
            }
            if !tracker.await_drained_unless(deadline, &self.interrupt_requested)? {
                all_drained = false;
            }
        }
        Ok(all_drained)
    }

    fn live_tracker(&self, config: &SiteConnectionConfig) -> Option<Arc<ConnectionManagerTracker>> {
        self.trackers
            .get(config)
            .filter(|entry| !entry.value().is_shutdown())
            .map(|entry| entry.value().clone())
    }

    fn new_tracker(&self, config: &SiteConnectionConfig) -> Result<Arc<ConnectionManagerTracker>> {
        let manager = (self.manager_factory)(config)?;
        Ok(Arc::new(ConnectionManagerTracker::new(config.clone(), manager)))
    }

    // Trackers are collected first so no map shard stays locked while pools
    // shut down or threads wait.
    fn snapshot(&self) -> Vec<Arc<ConnectionManagerTracker>> {
        self.trackers.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for ConnectionManagerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionManagerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManagerCache")
            .field("trackers", &self.trackers.len())
            .finish_non_exhaustive()
    }
}

fn default_manager(config: &SiteConnectionConfig) -> Result<Arc<dyn ConnectionManager>> {
    let ssl_factory = match config.ssl_socket_factory() {
        Some(factory) => factory.clone(),
        None => SslSocketFactory::system_default().map_err(|e| {
            Error::with_source(ErrorKind::Configuration, e)
                .context("Cannot create system default SSL socket factory")
        })?,
    };
    Ok(Arc::new(PoolingConnectionManager::new(config.pool_config(), ssl_factory)))
}
