//! Entry point: clients and contexts per site, and the operator shutdown surface

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sitehttp_common::Result;
use zeroize::Zeroizing;

use crate::auth::{
    AuthScope, BasicAuthenticator, ClientAuthenticator, PasswordKey, PasswordManager, PasswordType,
};
use crate::client::{ClientBuilder, ClientContext, Header, PooledHttpClient, RequestConfig};
use crate::conn::{ConnectionManagerCache, HttpHost, SiteConnectionConfig, TrackedHttpClient};
use crate::model::SiteConfig;
use crate::tls::build_ssl_socket_factory;

/// Creates site-bound clients that share one pool per distinct site connection
pub struct HttpFactory {
    passwords: Option<Arc<dyn PasswordManager>>,
    authenticator: Option<Arc<dyn ClientAuthenticator>>,
    connection_cache: ConnectionManagerCache,
}

impl HttpFactory {
    /// Factory authenticating with [`BasicAuthenticator`] over `passwords`
    #[must_use]
    pub fn new(passwords: Arc<dyn PasswordManager>) -> Self {
        Self {
            authenticator: Some(Arc::new(BasicAuthenticator::new(passwords.clone()))),
            passwords: Some(passwords),
            connection_cache: ConnectionManagerCache::new(),
        }
    }

    /// Factory with a custom authenticator
    ///
    /// Without `passwords`, sites carrying client key material cannot be used:
    /// there is no key password to decrypt them with.
    #[must_use]
    pub fn with_authenticator(
        authenticator: Arc<dyn ClientAuthenticator>,
        passwords: Option<Arc<dyn PasswordManager>>,
    ) -> Self {
        Self {
            passwords,
            authenticator: Some(authenticator),
            connection_cache: ConnectionManagerCache::new(),
        }
    }

    /// Replace the pool cache, e.g. to supply a custom manager factory
    #[must_use]
    pub fn with_connection_cache(mut self, cache: ConnectionManagerCache) -> Self {
        self.connection_cache = cache;
        self
    }

    /// Password manager, if any
    #[must_use]
    pub fn password_manager(&self) -> Option<&Arc<dyn PasswordManager>> {
        self.passwords.as_ref()
    }

    /// Pool cache
    #[must_use]
    pub fn connection_cache(&self) -> &ConnectionManagerCache {
        &self.connection_cache
    }

    /// Client for `site` over the site's shared pool
    ///
    /// # Errors
    ///
    /// See [`HttpFactory::create_client_with_headers`].
    pub fn create_client(&self, site: &SiteConfig) -> Result<TrackedHttpClient> {
        self.create_client_with_headers(site, Vec::new())
    }

    /// Client for `site` sending `default_headers` with every request
    ///
    /// Non-empty `default_headers` replace any set by the authenticator's
    /// builder hook.
    ///
    /// The TLS socket factory is built before any pool is touched, so a
    /// misconfigured site leaves the pool cache unchanged.
    ///
    /// # Errors
    ///
    /// - a configuration error for unusable TLS material or a missing key password
    /// - a transport error if the site's pool cannot be acquired
    /// - errors from the authenticator's builder hook
    pub fn create_client_with_headers(
        &self,
        site: &SiteConfig,
        default_headers: Vec<Header>,
    ) -> Result<TrackedHttpClient> {
        tracing::debug!("Using site config: {} for advanced client options", site);
        let mut builder = ClientBuilder::new();
        if let Some(authenticator) = &self.authenticator {
            builder = authenticator.decorate_client_builder(builder)?;
        }

        let key_password = self.key_password(site);
        let ssl_factory = build_ssl_socket_factory(site, key_password.as_deref().map(String::as_str))?;

        let mut conn_config = SiteConnectionConfig::from_site(site);
        if let Some(factory) = ssl_factory {
            conn_config = conn_config.with_ssl_socket_factory(factory.clone());
            builder = builder.ssl_socket_factory(factory);
        }

        let (tracker, manager) = self.connection_cache.acquire(&conn_config)?;
        tracing::debug!("Using connection manager tracker: {:?}", tracker);
        builder = builder.connection_manager(manager);

        if let Some(proxy_host) = site.proxy_host() {
            tracing::debug!(
                "Plan to use proxy for connection: host: {}, port: {:?}",
                proxy_host,
                site.proxy_port()
            );
            builder = builder.proxy(HttpHost::new("http", proxy_host, site.proxy_port()));
        }

        let timeout = site.request_timeout();
        builder = builder.default_request_config(
            RequestConfig::new()
                .with_connect_timeout(timeout)
                .with_socket_timeout(timeout),
        );
        if !default_headers.is_empty() {
            builder = builder.default_headers(default_headers);
        }

        match builder.build() {
            Ok(client) => Ok(TrackedHttpClient::new(client, tracker)),
            Err(e) => {
                tracker.release();
                Err(e)
            }
        }
    }

    /// Client with a private pool, not bound to any site
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the system TLS defaults are unusable.
    pub fn create_default_client(&self) -> Result<PooledHttpClient> {
        ClientBuilder::new().build()
    }

    /// Context for a sequence of requests to `site`
    ///
    /// Starts from the site's context prototype when one is set, uses the
    /// site's shared cookie store and pool timeout, and asks the authenticator
    /// to install site and proxy credentials.
    ///
    /// # Errors
    ///
    /// Errors from the authenticator's context hook.
    pub fn create_context(&self, site: Option<&SiteConfig>) -> Result<ClientContext> {
        let Some(site) = site else {
            return Ok(ClientContext::new());
        };

        tracing::debug!("Configuring client context from site {}", site.id());
        let mut context = match site.attributes().context_prototype() {
            Some(prototype) => {
                tracing::debug!("Configuring client context based on prototype instance");
                ClientContext::clone(&prototype)
            }
            None => ClientContext::new(),
        };

        if context.request_config().connection_request_timeout().is_none() {
            tracing::debug!(
                "Configuring client context with connection-pool timeout: {}s",
                site.connection_pool_timeout_seconds()
            );
            let config = context
                .request_config()
                .with_connection_request_timeout(site.connection_pool_timeout());
            context.set_request_config(config);
        }
        context.set_cookie_store(site.attributes().cookie_store());

        let Some(authenticator) = &self.authenticator else {
            return Ok(context);
        };
        if site.user().is_some() {
            tracing::debug!("Setting up authentication from site user + authenticator: {:?}", authenticator);
            let scope = AuthScope::new(site.host(), site.port());
            context = authenticator.decorate_prototype_context(&scope, site, PasswordType::User, context)?;
        }
        if let (Some(proxy_host), Some(_)) = (site.proxy_host(), site.proxy_user()) {
            tracing::debug!(
                "Setting up proxy authentication from site proxy user + authenticator: {:?}",
                authenticator
            );
            let scope = match site.proxy_port() {
                Some(port) => AuthScope::new(proxy_host, port),
                None => AuthScope::any_port(proxy_host),
            };
            context = authenticator.decorate_prototype_context(&scope, site, PasswordType::Proxy, context)?;
        }
        Ok(context)
    }

    /// Whether every pool created by this factory is shut down
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.connection_cache.is_shutdown()
    }

    /// Shut every pool down now; returns [`HttpFactory::is_shutdown`] afterwards
    pub fn shutdown_now(&self) -> bool {
        self.connection_cache.shutdown_now()
    }

    /// Shut every pool down once its clients are closed, waiting up to `timeout`
    ///
    /// # Errors
    ///
    /// Returns an interrupted error if [`HttpFactory::interrupt_shutdown`] is
    /// called while waiting.
    pub fn shutdown_gracefully(&self, timeout: Duration) -> Result<bool> {
        self.connection_cache.shutdown_gracefully(timeout)
    }

    /// Interrupt threads blocked in [`HttpFactory::shutdown_gracefully`]
    pub fn interrupt_shutdown(&self) {
        self.connection_cache.interrupt_shutdown();
    }

    fn key_password(&self, site: &SiteConfig) -> Option<Zeroizing<String>> {
        site.key_cert_pem()?;
        self.passwords
            .as_ref()?
            .lookup(&PasswordKey::for_site(site, PasswordType::Key))
    }
}

impl fmt::Debug for HttpFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFactory")
            .field("passwords", &self.passwords)
            .field("authenticator", &self.authenticator)
            .field("connection_cache", &self.connection_cache)
            .finish()
    }
}
