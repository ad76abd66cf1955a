//! Per-request-sequence client state: cookies, credentials and timeouts

use std::sync::{Arc, PoisonError, RwLock};

use crate::auth::{AuthScope, BasicCredentialsProvider, Credentials, CredentialsProvider};

use super::config::RequestConfig;

/// A cookie as stored by a [`CookieStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
}

impl Cookie {
    /// Host-only cookie valid for every path
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }

    /// Restrict to `domain` and its subdomains
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into().trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Restrict to paths under `path`
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Domain restriction
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Path restriction
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Whether the cookie is sent with a request to `host` for `path`
    #[must_use]
    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host = host.to_ascii_lowercase();
        let domain_ok = self.domain.as_deref().map_or(true, |domain| {
            host == domain || host.ends_with(&format!(".{domain}"))
        });
        let path_ok = self.path.as_deref().map_or(true, |p| path.starts_with(p));
        domain_ok && path_ok
    }

    fn same_slot(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// Thread-safe cookie jar shared by every context of a site
#[derive(Debug, Default)]
pub struct CookieStore {
    cookies: RwLock<Vec<Cookie>>,
}

impl CookieStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cookie, replacing one with the same name, domain and path
    pub fn add(&self, cookie: Cookie) {
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|c| !c.same_slot(&cookie));
        cookies.push(cookie);
    }

    /// Every stored cookie
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        self.cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove every cookie
    pub fn clear(&self) {
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// `Cookie` header value for a request to `host` for `path`
    #[must_use]
    pub fn cookie_header(&self, host: &str, path: &str) -> Option<String> {
        let cookies = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|c| c.matches(host, path))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

/// State carried across the requests of one logical session
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    request_config: RequestConfig,
    cookie_store: Option<Arc<CookieStore>>,
    credentials: BasicCredentialsProvider,
    preemptive: Vec<AuthScope>,
}

impl ClientContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request settings
    #[must_use]
    pub fn request_config(&self) -> &RequestConfig {
        &self.request_config
    }

    /// Replace the request settings
    pub fn set_request_config(&mut self, config: RequestConfig) {
        self.request_config = config;
    }

    /// Cookie store, if any
    #[must_use]
    pub fn cookie_store(&self) -> Option<&Arc<CookieStore>> {
        self.cookie_store.as_ref()
    }

    /// Use `store` for cookies
    pub fn set_cookie_store(&mut self, store: Arc<CookieStore>) {
        self.cookie_store = Some(store);
    }

    /// Credentials
    #[must_use]
    pub fn credentials(&self) -> &BasicCredentialsProvider {
        &self.credentials
    }

    /// Mutable credentials
    pub fn credentials_mut(&mut self) -> &mut BasicCredentialsProvider {
        &mut self.credentials
    }

    /// Send credentials for `scope` without waiting for a challenge
    pub fn enable_preemptive_auth(&mut self, scope: AuthScope) {
        if !self.preemptive.contains(&scope) {
            self.preemptive.push(scope);
        }
    }

    /// Scopes with preemptive authentication
    #[must_use]
    pub fn preemptive_scopes(&self) -> &[AuthScope] {
        &self.preemptive
    }

    /// Credentials to send unprompted to `host:port`
    ///
    /// Context credentials win over `fallback`.
    #[must_use]
    pub fn preemptive_credentials_for(
        &self,
        host: &str,
        port: u16,
        fallback: Option<&dyn CredentialsProvider>,
    ) -> Option<Credentials> {
        if !self.preemptive.iter().any(|scope| scope.matches(host, port)) {
            return None;
        }
        self.credentials
            .credentials_for(host, port)
            .or_else(|| fallback.and_then(|p| p.credentials_for(host, port)))
    }
}
