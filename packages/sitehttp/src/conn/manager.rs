//! Connection manager seam and the blocking route-keyed pool behind it

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::model::DEFAULT_MAX_CONNECTIONS;
use crate::tls::SslSocketFactory;

use super::connection::{ConnectionStream, ManagedConnection};
use super::error::PoolError;
use super::route::HttpRoute;

/// Default per-route limit for pools not sized from a site
pub const DEFAULT_MAX_PER_ROUTE: usize = 2;

/// Pooled, reusable set of transport connections grouped by route
pub trait ConnectionManager: Send + Sync + fmt::Debug {
    /// Lease a connection for `route`, waiting up to `timeout` for capacity
    ///
    /// `None` or a zero timeout waits indefinitely. The returned connection
    /// may be unopened; see [`ConnectionManager::connect`].
    ///
    /// # Errors
    ///
    /// [`PoolError::Shutdown`] once the manager is shut down and
    /// [`PoolError::LeaseTimeout`] if no capacity frees up in time.
    fn request_connection(
        &self,
        route: &HttpRoute,
        timeout: Option<Duration>,
    ) -> Result<ManagedConnection, PoolError>;

    /// Return a leased connection; open reusable connections are pooled,
    /// expiring after `keep_alive` if given
    fn release_connection(&self, conn: ManagedConnection, keep_alive: Option<Duration>);

    /// Open the connection to the route's first hop
    ///
    /// # Errors
    ///
    /// Connect and TLS handshake failures.
    fn connect(
        &self,
        conn: &mut ManagedConnection,
        route: &HttpRoute,
        connect_timeout: Option<Duration>,
    ) -> Result<(), PoolError>;

    /// Layer TLS over a tunnelled connection
    ///
    /// # Errors
    ///
    /// [`PoolError::NotOpen`] for an unopened connection and handshake failures.
    fn upgrade(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError>;

    /// Mark the route of `conn` as fully established
    ///
    /// # Errors
    ///
    /// [`PoolError::NotOpen`] for an unopened connection.
    fn route_complete(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError>;

    /// Close pooled connections idle for longer than `idle`
    fn close_idle_connections(&self, idle: Duration);

    /// Close pooled connections whose keep-alive has expired
    fn close_expired_connections(&self);

    /// Close every pooled connection and fail leased and waiting users
    fn shutdown(&self);

    /// Whether the manager has been shut down
    fn is_shutdown(&self) -> bool;

    /// Current pool totals
    fn stats(&self) -> PoolStats;
}

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on connections across all routes
    pub max_total: usize,
    /// Upper bound on connections for one route
    pub max_per_route: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_CONNECTIONS,
            max_per_route: DEFAULT_MAX_PER_ROUTE,
        }
    }
}

/// Pool totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections currently leased
    pub leased: usize,
    /// Idle connections available for reuse
    pub available: usize,
    /// Threads waiting for a connection
    pub pending: usize,
    /// Maximum total connections
    pub max: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[leased: {}; pending: {}; available: {}; max: {}]",
            self.leased, self.pending, self.available, self.max
        )
    }
}

struct IdleEntry {
    conn: ManagedConnection,
    since: Instant,
    expiry: Option<Instant>,
}

impl IdleEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct RoutePool {
    idle: VecDeque<IdleEntry>,
    leased: usize,
}

impl RoutePool {
    fn allocated(&self) -> usize {
        self.leased + self.idle.len()
    }
}

#[derive(Default)]
struct PoolState {
    routes: HashMap<HttpRoute, RoutePool>,
    // Clones of every open socket, so shutdown can unblock leased users
    sockets: HashMap<u64, TcpStream>,
    pending: usize,
    shutdown: bool,
}

impl PoolState {
    fn allocated(&self) -> usize {
        self.routes.values().map(RoutePool::allocated).sum()
    }

    fn evict_idle_except(&mut self, route: &HttpRoute) -> Option<ManagedConnection> {
        let (_, pool) = self
            .routes
            .iter_mut()
            .filter(|(r, pool)| *r != route && !pool.idle.is_empty())
            .min_by_key(|(_, pool)| pool.idle.front().map(|e| e.since))?;
        pool.idle.pop_front().map(|e| e.conn)
    }

    fn discard(&mut self, mut conn: ManagedConnection) {
        self.sockets.remove(&conn.id());
        conn.close();
    }
}

/// Blocking connection pool keyed by [`HttpRoute`]
///
/// Secure routes are layered with the manager's [`SslSocketFactory`].
pub struct PoolingConnectionManager {
    config: PoolConfig,
    ssl_factory: Arc<SslSocketFactory>,
    state: Mutex<PoolState>,
    available: Condvar,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl PoolingConnectionManager {
    /// New pool layering TLS with `ssl_factory`
    #[must_use]
    pub fn new(config: PoolConfig, ssl_factory: Arc<SslSocketFactory>) -> Self {
        tracing::debug!(
            "Creating connection pool (max total {}, max per route {})",
            config.max_total,
            config.max_per_route
        );
        Self {
            config,
            ssl_factory,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            alive: Arc::new(AtomicBool::new(true)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Pool sizing
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Socket factory used for secure routes
    #[must_use]
    pub fn ssl_socket_factory(&self) -> &Arc<SslSocketFactory> {
        &self.ssl_factory
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self, state: &mut PoolState, route: &HttpRoute) -> ManagedConnection {
        state.routes.entry(route.clone()).or_default().leased += 1;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Allocated connection {} for {}", id, route);
        ManagedConnection::new(id, route.clone(), self.alive.clone())
    }

    fn try_lease(&self, state: &mut PoolState, route: &HttpRoute) -> Option<ManagedConnection> {
        let now = Instant::now();
        loop {
            let entry = state.routes.get_mut(route)?.idle.pop_back()?;
            if entry.is_expired(now) || entry.conn.is_stale() {
                tracing::trace!("Discarding stale connection {} for {}", entry.conn.id(), route);
                state.discard(entry.conn);
                continue;
            }
            if let Some(pool) = state.routes.get_mut(route) {
                pool.leased += 1;
            }
            tracing::trace!("Reusing connection {} for {}", entry.conn.id(), route);
            return Some(entry.conn);
        }
    }

    fn register_socket(&self, conn: &ManagedConnection) {
        if let Some(socket) = conn.try_clone_socket() {
            self.lock().sockets.insert(conn.id(), socket);
        }
    }

    fn layer_tls(&self, tcp: TcpStream, route: &HttpRoute) -> Result<ConnectionStream, PoolError> {
        let host = route.target().host();
        self.ssl_factory
            .create_layered(tcp, host)
            .map(|tls| ConnectionStream::Tls(Box::new(tls)))
            .map_err(|source| PoolError::Handshake {
                host: host.to_string(),
                source,
            })
    }

    fn ensure_running(&self) -> Result<(), PoolError> {
        if self.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PoolError::Shutdown)
        }
    }
}

fn connect_tcp(addrs: Vec<SocketAddr>, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(&addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

impl ConnectionManager for PoolingConnectionManager {
    fn request_connection(
        &self,
        route: &HttpRoute,
        timeout: Option<Duration>,
    ) -> Result<ManagedConnection, PoolError> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();

        loop {
            if state.shutdown {
                return Err(PoolError::Shutdown);
            }
            if let Some(conn) = self.try_lease(&mut state, route) {
                return Ok(conn);
            }

            let route_allocated = state.routes.get(route).map_or(0, RoutePool::allocated);
            if route_allocated < self.config.max_per_route {
                if state.allocated() < self.config.max_total {
                    return Ok(self.allocate(&mut state, route));
                }
                if let Some(evicted) = state.evict_idle_except(route) {
                    tracing::trace!("Evicting idle connection {} to make room for {}", evicted.id(), route);
                    state.discard(evicted);
                    return Ok(self.allocate(&mut state, route));
                }
            }

            state.pending += 1;
            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.pending -= 1;
                        tracing::debug!("Timed out waiting for a connection to {}", route);
                        return Err(PoolError::LeaseTimeout(timeout.unwrap_or_default()));
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
            state.pending -= 1;
        }
    }

    fn release_connection(&self, conn: ManagedConnection, keep_alive: Option<Duration>) {
        let mut state = self.lock();
        if let Some(pool) = state.routes.get_mut(conn.route()) {
            pool.leased = pool.leased.saturating_sub(1);
        }

        if state.shutdown || !conn.is_open() || !conn.is_reusable() {
            tracing::trace!("Closing released connection {}", conn.id());
            state.discard(conn);
        } else {
            let now = Instant::now();
            let route = conn.route().clone();
            tracing::trace!("Connection {} back in pool for {}", conn.id(), route);
            state.routes.entry(route).or_default().idle.push_back(IdleEntry {
                conn,
                since: now,
                expiry: keep_alive.map(|d| now + d),
            });
        }
        drop(state);
        self.available.notify_all();
    }

    fn connect(
        &self,
        conn: &mut ManagedConnection,
        route: &HttpRoute,
        connect_timeout: Option<Duration>,
    ) -> Result<(), PoolError> {
        self.ensure_running()?;
        if conn.is_open() {
            return Ok(());
        }

        let hop = route.first_hop();
        let connect_timeout = connect_timeout.filter(|t| !t.is_zero());
        let connect_err = |source: io::Error| PoolError::Connect {
            host: hop.authority(),
            source,
        };
        let addrs: Vec<SocketAddr> = (hop.host(), hop.port())
            .to_socket_addrs()
            .map_err(connect_err)?
            .collect();
        let tcp = connect_tcp(addrs, connect_timeout).map_err(connect_err)?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(connect_timeout)?;
        tcp.set_write_timeout(connect_timeout)?;

        let stream = if route.is_secure() && !route.is_tunnelled() {
            self.layer_tls(tcp, route)?
        } else {
            ConnectionStream::Plain(tcp)
        };
        conn.attach(stream);
        self.register_socket(conn);
        tracing::debug!("Connection {} established to {}", conn.id(), hop);
        Ok(())
    }

    fn upgrade(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError> {
        self.ensure_running()?;
        let tcp = match conn.detach() {
            Some(ConnectionStream::Plain(tcp)) => tcp,
            Some(secure @ ConnectionStream::Tls(_)) => {
                conn.attach(secure);
                return Ok(());
            }
            None => return Err(PoolError::NotOpen),
        };
        let stream = self.layer_tls(tcp, route)?;
        conn.attach(stream);
        tracing::debug!("Connection {} upgraded to TLS for {}", conn.id(), route.target());
        Ok(())
    }

    fn route_complete(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError> {
        if !conn.is_open() {
            return Err(PoolError::NotOpen);
        }
        conn.mark_route_complete();
        tracing::trace!("Route complete for connection {}: {}", conn.id(), route);
        Ok(())
    }

    fn close_idle_connections(&self, idle: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        let mut closing = Vec::new();
        for pool in state.routes.values_mut() {
            let (keep, close): (VecDeque<_>, VecDeque<_>) = pool
                .idle
                .drain(..)
                .partition(|e| now.saturating_duration_since(e.since) <= idle);
            pool.idle = keep;
            closing.extend(close.into_iter().map(|e| e.conn));
        }
        for conn in closing {
            state.discard(conn);
        }
    }

    fn close_expired_connections(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        let mut closing = Vec::new();
        for pool in state.routes.values_mut() {
            let (close, keep): (VecDeque<_>, VecDeque<_>) =
                pool.idle.drain(..).partition(|e| e.is_expired(now));
            pool.idle = keep;
            closing.extend(close.into_iter().map(|e| e.conn));
        }
        for conn in closing {
            state.discard(conn);
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        self.alive.store(false, Ordering::Release);

        let mut idle = Vec::new();
        let mut leased = 0;
        for pool in state.routes.values_mut() {
            leased += pool.leased;
            idle.extend(pool.idle.drain(..).map(|e| e.conn));
        }
        for conn in idle {
            state.discard(conn);
        }
        for (_, socket) in state.sockets.drain() {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        drop(state);
        self.available.notify_all();
        tracing::info!("Connection pool shut down ({} leased connection(s) outstanding)", leased);
    }

    fn is_shutdown(&self) -> bool {
        !self.alive.load(Ordering::Acquire)
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            leased: state.routes.values().map(|p| p.leased).sum(),
            available: state.routes.values().map(|p| p.idle.len()).sum(),
            pending: state.pending,
            max: self.config.max_total,
        }
    }
}

impl fmt::Debug for PoolingConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolingConnectionManager")
            .field("config", &self.config)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
