//! Reference-counted ownership of one shared connection manager

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sitehttp_common::{Error, LoggingTransformer, Result};

use super::close_blocking::CloseBlockingConnectionManager;
use super::manager::ConnectionManager;
use super::site_connection_config::SiteConnectionConfig;

// State word layout: bit 63 shut down, bit 62 retired, low bits the count.
const SHUTDOWN: u64 = 1 << 63;
const RETIRED: u64 = 1 << 62;
const COUNT_MASK: u64 = RETIRED - 1;

#[derive(Default)]
struct DrainWaiters {
    waiting: usize,
    interrupted: bool,
}

/// Owns one connection manager on behalf of every client sharing it
///
/// Clients [`acquire`](Self::acquire) a reference when created and
/// [`release`](Self::release) it when closed. The manager is closed for real
/// either on demand ([`really_shutdown`](Self::really_shutdown)) or once the
/// tracker is retired and the last reference is released.
pub struct ConnectionManagerTracker {
    config: SiteConnectionConfig,
    manager: Arc<CloseBlockingConnectionManager>,
    state: AtomicU64,
    waiters: Mutex<DrainWaiters>,
    drained: Condvar,
}

impl ConnectionManagerTracker {
    /// Track `manager`, the pool serving `config`
    #[must_use]
    pub fn new(config: SiteConnectionConfig, manager: Arc<dyn ConnectionManager>) -> Self {
        tracing::debug!("Creating connection manager tracker for {}", config);
        Self {
            manager: Arc::new(CloseBlockingConnectionManager::new(config.clone(), manager)),
            config,
            state: AtomicU64::new(0),
            waiters: Mutex::new(DrainWaiters::default()),
            drained: Condvar::new(),
        }
    }

    /// Take a reference and return the shared manager
    ///
    /// The manager swallows `shutdown` calls, so a client may shut it down on
    /// close without affecting other clients. A retired tracker still hands out
    /// references; it is destroyed once they are all released.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the manager has already been shut down.
    pub fn acquire(&self) -> Result<Arc<dyn ConnectionManager>> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & SHUTDOWN != 0 {
                return Err(Error::transport().context(format!(
                    "Connection manager for {} has been shut down",
                    self.config
                )));
            }
            if current & COUNT_MASK == COUNT_MASK {
                return Err(Error::internal().context("Connection manager reference count overflow"));
            }
            match self.state.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let count = (current & COUNT_MASK) + 1;
        if current & RETIRED != 0 {
            tracing::debug!(
                "Handing out reference {} to retired connection manager for {}",
                count,
                self.config
            );
        } else {
            tracing::trace!("Acquired connection manager for {} (references: {})", self.config, count);
        }
        Ok(self.manager.clone() as Arc<dyn ConnectionManager>)
    }

    /// Give back a reference
    ///
    /// The count never drops below zero; an unmatched release is logged and
    /// ignored. Releasing the last reference of a retired tracker shuts the
    /// manager down.
    pub fn release(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current & COUNT_MASK == 0 {
                tracing::warn!(
                    "Unbalanced release of connection manager for {}; ignoring",
                    self.config
                );
                return;
            }
            match self.state.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let next = current - 1;
        tracing::trace!(
            "Released connection manager for {} (references: {})",
            self.config,
            next & COUNT_MASK
        );
        if next & COUNT_MASK == 0 && next & RETIRED != 0 {
            self.try_destroy_drained();
            self.notify_drained();
        }
    }

    /// Shut the manager down now, whatever the outstanding references
    ///
    /// Later [`acquire`](Self::acquire) calls fail; connections still leased
    /// fail on their next I/O.
    pub fn really_shutdown(&self) {
        let previous = self.state.fetch_or(SHUTDOWN, Ordering::AcqRel);
        if previous & SHUTDOWN == 0 {
            let outstanding = usize::try_from(previous & COUNT_MASK).unwrap_or(usize::MAX);
            LoggingTransformer::log_shutdown_event(
                &format!("connection manager for {}", self.config),
                true,
                outstanding,
            );
            self.manager.really_shutdown();
        }
        self.notify_drained();
    }

    /// Retire the tracker and wait up to `timeout` for its references to drain
    ///
    /// Returns `Ok(true)` once the manager is shut down. On timeout returns
    /// `Ok(false)` and leaves the manager running; it stays retired, so the
    /// last release still shuts it down.
    ///
    /// # Errors
    ///
    /// Returns an interrupted error if [`interrupt`](Self::interrupt) is
    /// called while waiting.
    pub fn graceful_shutdown(&self, timeout: Duration) -> Result<bool> {
        self.retire();
        self.await_drained(Instant::now() + timeout)
    }

    /// Mark the tracker retired, shutting the manager down if nothing holds it
    pub fn retire(&self) {
        let previous = self.state.fetch_or(RETIRED, Ordering::AcqRel);
        if previous & RETIRED == 0 {
            tracing::debug!(
                "Retiring connection manager for {} ({} reference(s) outstanding)",
                self.config,
                previous & COUNT_MASK
            );
        }
        if previous & (SHUTDOWN | COUNT_MASK) == 0 {
            self.try_destroy_drained();
        }
    }

    /// Block until the manager is shut down or `deadline` passes
    ///
    /// # Errors
    ///
    /// Returns an interrupted error if [`interrupt`](Self::interrupt) is
    /// called while waiting.
    pub fn await_drained(&self, deadline: Instant) -> Result<bool> {
        self.await_drained_unless(deadline, &AtomicBool::new(false))
    }

    /// Like [`await_drained`](Self::await_drained), also giving up with an
    /// interrupted error once `interrupted` is set
    ///
    /// The flag is checked under the waiter lock before every wait. A caller
    /// that sets it and then calls [`interrupt`](Self::interrupt) therefore
    /// stops this wait whether or not it had started yet.
    ///
    /// # Errors
    ///
    /// Returns an interrupted error if the flag is set or
    /// [`interrupt`](Self::interrupt) is called while waiting.
    pub fn await_drained_unless(&self, deadline: Instant, interrupted: &AtomicBool) -> Result<bool> {
        let mut waiters = self.lock_waiters();
        waiters.waiting += 1;

        let outcome = loop {
            if waiters.interrupted || interrupted.load(Ordering::Acquire) {
                break Err(Error::interrupted().context(format!(
                    "Interrupted while waiting for connection manager for {} to drain",
                    self.config
                )));
            }
            let state = self.state.load(Ordering::Acquire);
            if state & SHUTDOWN != 0 {
                break Ok(true);
            }
            if state & COUNT_MASK == 0 && state & RETIRED != 0 && self.try_destroy_drained() {
                break Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "Connection manager for {} did not drain in time ({} reference(s) outstanding)",
                    self.config,
                    state & COUNT_MASK
                );
                break Ok(false);
            }
            waiters = self
                .drained
                .wait_timeout(waiters, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };

        waiters.waiting -= 1;
        if waiters.waiting == 0 {
            waiters.interrupted = false;
        }
        outcome
    }

    /// Wake threads blocked in [`graceful_shutdown`](Self::graceful_shutdown)
    /// with an interrupted error; returns whether any thread was waiting
    pub fn interrupt(&self) -> bool {
        let mut waiters = self.lock_waiters();
        if waiters.waiting == 0 {
            return false;
        }
        waiters.interrupted = true;
        drop(waiters);
        self.drained.notify_all();
        true
    }

    /// Outstanding references
    #[must_use]
    pub fn lease_count(&self) -> u64 {
        self.state.load(Ordering::Acquire) & COUNT_MASK
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.state.load(Ordering::Acquire) & RETIRED != 0
    }

    /// Whether the manager has been shut down
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.load(Ordering::Acquire) & SHUTDOWN != 0
    }

    /// Pool key this tracker serves
    #[must_use]
    pub fn config(&self) -> &SiteConnectionConfig {
        &self.config
    }

    // Only the exact state "retired, no references, running" may move to shut
    // down, so a concurrent acquire either lands first or sees the shutdown.
    fn try_destroy_drained(&self) -> bool {
        if self
            .state
            .compare_exchange(RETIRED, RETIRED | SHUTDOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        LoggingTransformer::log_shutdown_event(&format!("connection manager for {}", self.config), false, 0);
        self.manager.really_shutdown();
        true
    }

    fn notify_drained(&self) {
        let _waiters = self.lock_waiters();
        self.drained.notify_all();
    }

    fn lock_waiters(&self) -> MutexGuard<'_, DrainWaiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionManagerTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Acquire);
        f.debug_struct("ConnectionManagerTracker")
            .field("config", &self.config)
            .field("references", &(state & COUNT_MASK))
            .field("retired", &(state & RETIRED != 0))
            .field("shutdown", &(state & SHUTDOWN != 0))
            .finish()
    }
}
