//! Client assembly

use std::sync::Arc;

use sitehttp_common::{Error, ErrorKind, Result};

use crate::auth::CredentialsProvider;
use crate::conn::{ConnectionManager, HttpHost, PoolConfig, PoolingConnectionManager};
use crate::tls::SslSocketFactory;

use super::config::{Header, RequestConfig};
use super::pooled::PooledHttpClient;

/// Collects client settings; [`ClientBuilder::build`] produces a [`PooledHttpClient`]
#[derive(Debug, Default)]
pub struct ClientBuilder {
    proxy: Option<HttpHost>,
    ssl_socket_factory: Option<Arc<SslSocketFactory>>,
    connection_manager: Option<Arc<dyn ConnectionManager>>,
    pool_config: PoolConfig,
    default_request_config: RequestConfig,
    default_headers: Vec<Header>,
    credentials_provider: Option<Arc<dyn CredentialsProvider>>,
}

impl ClientBuilder {
    /// Builder with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every request through `proxy`
    #[must_use]
    pub fn proxy(mut self, proxy: HttpHost) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Socket factory for a pool the builder creates itself
    ///
    /// Ignored when a connection manager is supplied; that manager layers TLS
    /// with its own factory.
    #[must_use]
    pub fn ssl_socket_factory(mut self, factory: Arc<SslSocketFactory>) -> Self {
        self.ssl_socket_factory = Some(factory);
        self
    }

    /// Use `manager` instead of a private pool
    #[must_use]
    pub fn connection_manager(mut self, manager: Arc<dyn ConnectionManager>) -> Self {
        self.connection_manager = Some(manager);
        self
    }

    /// Sizing for a pool the builder creates itself
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Timeouts used when the request context leaves them unset
    #[must_use]
    pub fn default_request_config(mut self, config: RequestConfig) -> Self {
        self.default_request_config = config;
        self
    }

    /// Headers added to every request
    #[must_use]
    pub fn default_headers(mut self, headers: Vec<Header>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Credentials used when the request context has none for a scope
    #[must_use]
    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials_provider = Some(provider);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no manager was supplied and the
    /// system default socket factory cannot be created.
    pub fn build(self) -> Result<PooledHttpClient> {
        let manager = match self.connection_manager {
            Some(manager) => manager,
            None => {
                let ssl_factory = match self.ssl_socket_factory {
                    Some(factory) => factory,
                    None => SslSocketFactory::system_default().map_err(|e| {
                        Error::with_source(ErrorKind::Configuration, e)
                            .context("Cannot create system default SSL socket factory")
                    })?,
                };
                Arc::new(PoolingConnectionManager::new(self.pool_config, ssl_factory))
            }
        };

        Ok(PooledHttpClient::new(
            manager,
            self.proxy,
            self.default_request_config,
            self.default_headers,
            self.credentials_provider,
        ))
    }
}
