//! Pool identity key

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::model::SiteConfig;
use crate::tls::SslSocketFactory;

use super::manager::PoolConfig;

/// Everything that makes two sites need different connection pools
///
/// Equality and hashing cover every field; the socket factory is compared by
/// identity, which is why factories are memoized per site.
#[derive(Clone)]
pub struct SiteConnectionConfig {
    scheme: String,
    host: String,
    port: u16,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    max_connections: usize,
    max_per_route: usize,
    ssl_factory: Option<Arc<SslSocketFactory>>,
}

impl SiteConnectionConfig {
    /// Key for `site`, without a socket factory
    #[must_use]
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            scheme: site.scheme().to_string(),
            host: site.host().to_ascii_lowercase(),
            port: site.port(),
            proxy_host: site.proxy_host().map(str::to_ascii_lowercase),
            proxy_port: site.proxy_port(),
            max_connections: site.max_connections(),
            max_per_route: site.max_per_route(),
            ssl_factory: None,
        }
    }

    /// Attach the site's socket factory
    #[must_use]
    pub fn with_ssl_socket_factory(mut self, factory: Arc<SslSocketFactory>) -> Self {
        self.ssl_factory = Some(factory);
        self
    }

    /// Scheme
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Proxy host
    #[must_use]
    pub fn proxy_host(&self) -> Option<&str> {
        self.proxy_host.as_deref()
    }

    /// Proxy port
    #[must_use]
    pub fn proxy_port(&self) -> Option<u16> {
        self.proxy_port
    }

    /// Site socket factory; `None` means the system default
    #[must_use]
    pub fn ssl_socket_factory(&self) -> Option<&Arc<SslSocketFactory>> {
        self.ssl_factory.as_ref()
    }

    /// Sizing for the pool serving this key
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_total: self.max_connections,
            max_per_route: self.max_per_route,
        }
    }

    fn factory_ptr(&self) -> Option<*const SslSocketFactory> {
        self.ssl_factory.as_ref().map(Arc::as_ptr)
    }
}

impl PartialEq for SiteConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.proxy_host == other.proxy_host
            && self.proxy_port == other.proxy_port
            && self.max_connections == other.max_connections
            && self.max_per_route == other.max_per_route
            && self.factory_ptr() == other.factory_ptr()
    }
}

impl Eq for SiteConnectionConfig {}

impl Hash for SiteConnectionConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.host.hash(state);
        self.port.hash(state);
        self.proxy_host.hash(state);
        self.proxy_port.hash(state);
        self.max_connections.hash(state);
        self.max_per_route.hash(state);
        self.factory_ptr().hash(state);
    }
}

impl fmt::Debug for SiteConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConnectionConfig")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("max_connections", &self.max_connections)
            .field("max_per_route", &self.max_per_route)
            .field("ssl_factory", &self.factory_ptr())
            .finish()
    }
}

impl fmt::Display for SiteConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)?;
        if let Some(proxy) = &self.proxy_host {
            write!(f, " via {proxy}")?;
            if let Some(port) = self.proxy_port {
                write!(f, ":{port}")?;
            }
        }
        Ok(())
    }
}
