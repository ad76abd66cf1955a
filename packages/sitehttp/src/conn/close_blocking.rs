//! Decorator that keeps a shared pool alive when a client closes

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::connection::ManagedConnection;
use super::error::PoolError;
use super::manager::{ConnectionManager, PoolStats};
use super::route::HttpRoute;
use super::site_connection_config::SiteConnectionConfig;

/// Delegates every pool operation except `shutdown`, which is swallowed
///
/// Clients call `shutdown` on their manager when they close. A shared pool
/// must outlive any single client, so only the owning tracker can tear it
/// down, through [`CloseBlockingConnectionManager::really_shutdown`].
pub struct CloseBlockingConnectionManager {
    config: SiteConnectionConfig,
    delegate: Arc<dyn ConnectionManager>,
}

impl CloseBlockingConnectionManager {
    /// Wrap `delegate`, the pool for `config`
    #[must_use]
    pub fn new(config: SiteConnectionConfig, delegate: Arc<dyn ConnectionManager>) -> Self {
        Self { config, delegate }
    }

    /// Pool key this manager serves
    #[must_use]
    pub fn config(&self) -> &SiteConnectionConfig {
        &self.config
    }

    pub(crate) fn really_shutdown(&self) {
        tracing::trace!("Really shutting down connection manager for {}", self.config);
        self.delegate.shutdown();
    }
}

impl ConnectionManager for CloseBlockingConnectionManager {
    fn request_connection(
        &self,
        route: &HttpRoute,
        timeout: Option<Duration>,
    ) -> Result<ManagedConnection, PoolError> {
        tracing::trace!("Requesting connection to: {}", route);
        let conn = self.delegate.request_connection(route, timeout);
        tracing::trace!("Connection request is: {:?}", conn);
        conn
    }

    fn release_connection(&self, conn: ManagedConnection, keep_alive: Option<Duration>) {
        tracing::trace!("Releasing connection: {:?}", conn);
        self.delegate.release_connection(conn, keep_alive);
    }

    fn connect(
        &self,
        conn: &mut ManagedConnection,
        route: &HttpRoute,
        connect_timeout: Option<Duration>,
    ) -> Result<(), PoolError> {
        tracing::trace!("Connecting: {} via route: {}", conn.id(), route);
        self.delegate.connect(conn, route, connect_timeout)
    }

    fn upgrade(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError> {
        tracing::trace!("Upgrading: {} via route: {}", conn.id(), route);
        self.delegate.upgrade(conn, route)
    }

    fn route_complete(&self, conn: &mut ManagedConnection, route: &HttpRoute) -> Result<(), PoolError> {
        tracing::trace!("Route complete: {} with route: {}", conn.id(), route);
        self.delegate.route_complete(conn, route)
    }

    fn close_idle_connections(&self, idle: Duration) {
        tracing::trace!("Closing idle connections");
        self.delegate.close_idle_connections(idle);
    }

    fn close_expired_connections(&self) {
        tracing::trace!("Closing expired connections");
        self.delegate.close_expired_connections();
    }

    fn shutdown(&self) {
        tracing::trace!("BLOCKED connection manager shutdown; pool for {} stays reusable", self.config);
    }

    fn is_shutdown(&self) -> bool {
        self.delegate.is_shutdown()
    }

    fn stats(&self) -> PoolStats {
        self.delegate.stats()
    }
}

impl fmt::Debug for CloseBlockingConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseBlockingConnectionManager")
            .field("config", &self.config)
            .field("delegate", &self.delegate)
            .finish()
    }
}
