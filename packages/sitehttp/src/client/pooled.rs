//! Client executing exchanges over pooled connections

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sitehttp_common::{Error, ErrorKind, Result, ResultExt};

use crate::auth::{Credentials, CredentialsProvider};
use crate::conn::{establish_tunnel, ConnectionManager, HttpHost, HttpRoute, ManagedConnection};

use super::config::{Header, RequestConfig, RequestHead};
use super::context::ClientContext;

/// Executes caller-defined exchanges over leased, routed connections
pub trait HttpClient: Send + Sync {
    /// Lease a connection to `target`, establish the route and run `exchange`
    ///
    /// The connection goes back to the pool afterwards, unless the exchange
    /// failed or marked it non-reusable.
    ///
    /// # Errors
    ///
    /// Transport and timeout errors from the pool, and I/O errors from the
    /// exchange.
    fn execute<T, F>(&self, target: &HttpHost, context: &ClientContext, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut ManagedConnection, &RequestHead) -> io::Result<T>;

    /// Close the client; later executions fail
    fn close(&self);

    /// Whether the client has been closed
    fn is_closed(&self) -> bool;
}

/// Client bound to one connection manager
pub struct PooledHttpClient {
    manager: Arc<dyn ConnectionManager>,
    proxy: Option<HttpHost>,
    default_request_config: RequestConfig,
    default_headers: Vec<Header>,
    credentials_provider: Option<Arc<dyn CredentialsProvider>>,
    closed: AtomicBool,
}

impl PooledHttpClient {
    pub(crate) fn new(
        manager: Arc<dyn ConnectionManager>,
        proxy: Option<HttpHost>,
        default_request_config: RequestConfig,
        default_headers: Vec<Header>,
        credentials_provider: Option<Arc<dyn CredentialsProvider>>,
    ) -> Self {
        Self {
            manager,
            proxy,
            default_request_config,
            default_headers,
            credentials_provider,
            closed: AtomicBool::new(false),
        }
    }

    /// Connection manager the client leases from
    #[must_use]
    pub fn connection_manager(&self) -> &Arc<dyn ConnectionManager> {
        &self.manager
    }

    /// Proxy every request goes through
    #[must_use]
    pub fn proxy(&self) -> Option<&HttpHost> {
        self.proxy.as_ref()
    }

    /// Timeouts used when a context leaves them unset
    #[must_use]
    pub fn default_request_config(&self) -> &RequestConfig {
        &self.default_request_config
    }

    /// Headers added to every request
    #[must_use]
    pub fn default_headers(&self) -> &[Header] {
        &self.default_headers
    }

    fn fallback_credentials(&self) -> Option<&dyn CredentialsProvider> {
        self.credentials_provider.as_deref()
    }

    fn run_exchange<T, F>(
        &self,
        conn: &mut ManagedConnection,
        route: &HttpRoute,
        context: &ClientContext,
        config: &RequestConfig,
        exchange: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut ManagedConnection, &RequestHead) -> io::Result<T>,
    {
        if !conn.is_open() {
            self.open_route(conn, route, context, config)?;
        }
        conn.set_socket_timeout(config.socket_timeout())
            .context_as(ErrorKind::Io, "Cannot apply socket timeout")?;

        let head = self.request_head(route, context);
        exchange(conn, &head).map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
                io::ErrorKind::NotConnected => ErrorKind::Transport,
                _ => ErrorKind::Io,
            };
            Error::with_source(kind, e).context(format!("Exchange with {} failed", route.target()))
        })
    }

    fn open_route(
        &self,
        conn: &mut ManagedConnection,
        route: &HttpRoute,
        context: &ClientContext,
        config: &RequestConfig,
    ) -> Result<()> {
        self.manager.connect(conn, route, config.connect_timeout())?;
        if route.is_tunnelled() {
            let proxy = route.first_hop();
            let authorization = self
                .credentials_for(context, proxy)
                .map(|c| c.basic_authorization());
            establish_tunnel(conn, route.target(), authorization.as_deref())?;
            self.manager.upgrade(conn, route)?;
        }
        self.manager.route_complete(conn, route)?;
        Ok(())
    }

    fn credentials_for(&self, context: &ClientContext, host: &HttpHost) -> Option<Credentials> {
        context
            .credentials()
            .credentials_for(host.host(), host.port())
            .or_else(|| {
                self.fallback_credentials()
                    .and_then(|p| p.credentials_for(host.host(), host.port()))
            })
    }

    // Cookies are selected for the root path; path-scoped cookies are left to
    // the exchange.
    fn request_head(&self, route: &HttpRoute, context: &ClientContext) -> RequestHead {
        let target = route.target();
        let mut headers = self.default_headers.clone();

        if let Some(cookies) = context
            .cookie_store()
            .and_then(|store| store.cookie_header(target.host(), "/"))
        {
            headers.push(Header::new("Cookie", cookies));
        }
        if let Some(credentials) =
            context.preemptive_credentials_for(target.host(), target.port(), self.fallback_credentials())
        {
            headers.push(Header::new("Authorization", credentials.basic_authorization()));
        }
        if let Some(proxy) = route.proxy().filter(|_| !route.is_tunnelled()) {
            if let Some(credentials) =
                context.preemptive_credentials_for(proxy.host(), proxy.port(), self.fallback_credentials())
            {
                headers.push(Header::new("Proxy-Authorization", credentials.basic_authorization()));
            }
        }
        RequestHead::new(route.clone(), headers)
    }
}

impl HttpClient for PooledHttpClient {
    fn execute<T, F>(&self, target: &HttpHost, context: &ClientContext, exchange: F) -> Result<T>
    where
        F: FnOnce(&mut ManagedConnection, &RequestHead) -> io::Result<T>,
    {
        if self.is_closed() {
            return Err(Error::transport().context("Client has been closed"));
        }

        let config = context.request_config().or(&self.default_request_config);
        let route = HttpRoute::plan(target.clone(), self.proxy.clone());
        let conn = self
            .manager
            .request_connection(&route, config.connection_request_timeout())?;
        let mut lease = Lease {
            manager: self.manager.as_ref(),
            conn: Some(conn),
        };

        let outcome = match lease.conn.as_mut() {
            Some(conn) => self.run_exchange(conn, &route, context, &config, exchange),
            None => Err(Error::internal().context("Leased connection missing")),
        };
        lease.release(outcome.is_ok());
        outcome
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closing client");
            self.manager.shutdown();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Leased connection that goes back to its manager even if the exchange
/// unwinds; an unwound lease is never reused
struct Lease<'a> {
    manager: &'a dyn ConnectionManager,
    conn: Option<ManagedConnection>,
}

impl Lease<'_> {
    fn release(&mut self, reusable: bool) {
        if let Some(mut conn) = self.conn.take() {
            if !reusable {
                conn.mark_non_reusable();
            }
            self.manager.release_connection(conn, None);
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::debug!("Exchange did not complete; discarding its connection");
            self.release(false);
        }
    }
}

impl Drop for PooledHttpClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PooledHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHttpClient")
            .field("manager", &self.manager)
            .field("proxy", &self.proxy)
            .field("default_request_config", &self.default_request_config)
            .field("default_headers", &self.default_headers.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
