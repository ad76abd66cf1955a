//! Site configuration: identity, transport settings and TLS material for one
//! remote endpoint

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sitehttp_common::{ensure, ErrorKind, OptionExt, Result, ResultExt};
use url::Url;

use crate::conn::route::url_host;

use super::attributes::SiteAttributes;
use super::trust_type::SiteTrustType;

/// Default request (connect and socket) timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 10;

/// Default time to wait for a connection from the pool
pub const DEFAULT_CONNECTION_POOL_TIMEOUT_SECONDS: u64 = 60;

/// Default upper bound on pooled connections for a site
pub const DEFAULT_MAX_CONNECTIONS: usize = 20;

/// Immutable configuration for one site
///
/// Built through [`SiteConfigBuilder`]. Shared behind an `Arc` so that derived
/// artifacts memoized in [`SiteConfig::attributes`] are shared as well.
pub struct SiteConfig {
    id: String,
    uri: Url,
    scheme: String,
    host: String,
    port: u16,
    user: Option<String>,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_user: Option<String>,
    key_cert_pem: Option<String>,
    server_cert_pem: Option<String>,
    trust_type: SiteTrustType,
    ignore_hostname_verification: bool,
    request_timeout_seconds: u64,
    connection_pool_timeout_seconds: u64,
    max_connections: usize,
    max_per_route: usize,
    attributes: SiteAttributes,
}

impl SiteConfig {
    /// Start building a site configuration
    pub fn builder(id: impl Into<String>, uri: impl Into<String>) -> SiteConfigBuilder {
        SiteConfigBuilder::new(id, uri)
    }

    /// Site identifier, also the key used for password lookups
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URI of the site
    #[must_use]
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// `http` or `https`
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Whether the site is reached over TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// Host name from the URI; IPv6 literals carry no brackets
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port from the URI, or the scheme default
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// User for site authentication
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Proxy host, if the site is reached through a proxy
    #[must_use]
    pub fn proxy_host(&self) -> Option<&str> {
        self.proxy_host.as_deref()
    }

    /// Proxy port; `None` means the scheme default
    #[must_use]
    pub fn proxy_port(&self) -> Option<u16> {
        self.proxy_port
    }

    /// User for proxy authentication
    #[must_use]
    pub fn proxy_user(&self) -> Option<&str> {
        self.proxy_user.as_deref()
    }

    /// Client private key and certificate chain, PEM encoded
    #[must_use]
    pub fn key_cert_pem(&self) -> Option<&str> {
        self.key_cert_pem.as_deref()
    }

    /// Certificates trusted for the server, PEM encoded
    #[must_use]
    pub fn server_cert_pem(&self) -> Option<&str> {
        self.server_cert_pem.as_deref()
    }

    /// Server trust policy
    #[must_use]
    pub fn trust_type(&self) -> SiteTrustType {
        self.trust_type
    }

    /// Whether server host name verification is disabled
    #[must_use]
    pub fn is_ignore_hostname_verification(&self) -> bool {
        self.ignore_hostname_verification
    }

    /// Request timeout in seconds
    #[must_use]
    pub fn request_timeout_seconds(&self) -> u64 {
        self.request_timeout_seconds
    }

    /// Request timeout applied to connect and socket operations
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Time to wait for a pooled connection, in seconds
    #[must_use]
    pub fn connection_pool_timeout_seconds(&self) -> u64 {
        self.connection_pool_timeout_seconds
    }

    /// Time to wait for a pooled connection
    #[must_use]
    pub fn connection_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_pool_timeout_seconds)
    }

    /// Maximum pooled connections for the site
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Maximum pooled connections per route
    #[must_use]
    pub fn max_per_route(&self) -> usize {
        self.max_per_route
    }

    /// Memoized artifacts and free-form attributes
    #[must_use]
    pub fn attributes(&self) -> &SiteAttributes {
        &self.attributes
    }
}

impl fmt::Debug for SiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConfig")
            .field("id", &self.id)
            .field("uri", &self.uri.as_str())
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("has_key_cert", &self.key_cert_pem.is_some())
            .field("has_server_cert", &self.server_cert_pem.is_some())
            .field("trust_type", &self.trust_type)
            .field("ignore_hostname_verification", &self.ignore_hostname_verification)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SiteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteConfig{{id={}, uri={}}}", self.id, self.uri)
    }
}

impl fmt::Debug for SiteConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteConfigBuilder")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("has_key_cert", &self.key_cert_pem.is_some())
            .field("has_server_cert", &self.server_cert_pem.is_some())
            .field("trust_type", &self.trust_type)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SiteConfig`]; also the serde representation of a site
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfigBuilder {
    id: String,
    uri: String,
    user: Option<String>,
    proxy_host: Option<String>,
    proxy_port: Option<u16>,
    proxy_user: Option<String>,
    key_cert_pem: Option<String>,
    server_cert_pem: Option<String>,
    trust_type: SiteTrustType,
    ignore_hostname_verification: bool,
    request_timeout_seconds: Option<u64>,
    connection_pool_timeout_seconds: Option<u64>,
    max_connections: Option<usize>,
    max_per_route: Option<usize>,
}

impl SiteConfigBuilder {
    /// New builder for site `id` at `uri`
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Parse a builder from its JSON representation
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document does not describe a site.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context_as(ErrorKind::Configuration, "Invalid site configuration")
    }

    /// Site authentication user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Route requests through `host:port`; a port of 0 means the scheme default
    #[must_use]
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port);
        self
    }

    /// Proxy authentication user
    #[must_use]
    pub fn with_proxy_user(mut self, user: impl Into<String>) -> Self {
        self.proxy_user = Some(user.into());
        self
    }

    /// Client private key and certificate chain, PEM encoded
    #[must_use]
    pub fn with_key_cert_pem(mut self, pem: impl Into<String>) -> Self {
        self.key_cert_pem = Some(pem.into());
        self
    }

    /// Certificates trusted for the server, PEM encoded
    #[must_use]
    pub fn with_server_cert_pem(mut self, pem: impl Into<String>) -> Self {
        self.server_cert_pem = Some(pem.into());
        self
    }

    /// Server trust policy
    #[must_use]
    pub fn with_trust_type(mut self, trust_type: SiteTrustType) -> Self {
        self.trust_type = trust_type;
        self
    }

    /// Disable server host name verification
    #[must_use]
    pub fn with_ignore_hostname_verification(mut self, ignore: bool) -> Self {
        self.ignore_hostname_verification = ignore;
        self
    }

    /// Request timeout in seconds
    #[must_use]
    pub fn with_request_timeout_seconds(mut self, seconds: u64) -> Self {
        self.request_timeout_seconds = Some(seconds);
        self
    }

    /// Pool lease timeout in seconds
    #[must_use]
    pub fn with_connection_pool_timeout_seconds(mut self, seconds: u64) -> Self {
        self.connection_pool_timeout_seconds = Some(seconds);
        self
    }

    /// Maximum pooled connections for the site
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Maximum pooled connections per route
    #[must_use]
    pub fn with_max_per_route(mut self, max: usize) -> Self {
        self.max_per_route = Some(max);
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - the id is empty
    /// - the URI cannot be parsed or has no host
    /// - the scheme is neither `http` nor `https`
    /// - a pool limit is zero
    pub fn build(self) -> Result<SiteConfig> {
        ensure!(!self.id.trim().is_empty(), configuration, "Site id cannot be empty");

        let uri = Url::parse(&self.uri).with_context_as(ErrorKind::Configuration, || {
            format!(
                "Failed to parse site URL for host and port: {} (site id: {})",
                self.uri, self.id
            )
        })?;

        let scheme = uri.scheme().to_ascii_lowercase();
        ensure!(
            scheme == "http" || scheme == "https",
            configuration,
            "Unsupported scheme '{}' in {} (site id: {})",
            scheme,
            self.uri,
            self.id
        );

        let host = url_host(&uri).ok_or_kind(
            ErrorKind::Configuration,
            format!("Site URL has no host: {} (site id: {})", self.uri, self.id),
        )?;
        let port = uri.port_or_known_default().ok_or_kind(
            ErrorKind::Configuration,
            format!("Site URL has no port: {} (site id: {})", self.uri, self.id),
        )?;

        let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let max_per_route = self.max_per_route.unwrap_or(max_connections);
        ensure!(
            max_connections > 0 && max_per_route > 0,
            configuration,
            "Connection limits must be positive (site id: {})",
            self.id
        );

        Ok(SiteConfig {
            id: self.id,
            uri,
            scheme,
            host,
            port,
            user: self.user,
            proxy_host: self.proxy_host.filter(|h| !h.trim().is_empty()),
            proxy_port: self.proxy_port.filter(|p| *p > 0),
            proxy_user: self.proxy_user,
            key_cert_pem: self.key_cert_pem,
            server_cert_pem: self.server_cert_pem,
            trust_type: self.trust_type,
            ignore_hostname_verification: self.ignore_hostname_verification,
            request_timeout_seconds: self
                .request_timeout_seconds
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            connection_pool_timeout_seconds: self
                .connection_pool_timeout_seconds
                .unwrap_or(DEFAULT_CONNECTION_POOL_TIMEOUT_SECONDS),
            max_connections,
            max_per_route,
            attributes: SiteAttributes::default(),
        })
    }
}
