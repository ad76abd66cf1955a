//! Authentication scopes and credentials

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::Zeroizing;

/// Host and port a credential applies to; no port matches any port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthScope {
    host: String,
    port: Option<u16>,
}

impl AuthScope {
    /// Scope for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port: Some(port),
        }
    }

    /// Scope for `host` on any port
    pub fn any_port(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port: None,
        }
    }

    /// Scope host
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Scope port; `None` matches any port
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Whether a request to `host:port` falls within this scope
    #[must_use]
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port.map_or(true, |p| p == port)
    }
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}:<any>", self.host),
        }
    }
}

/// User name and password
#[derive(Clone)]
pub struct Credentials {
    user: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Credentials for `user`
    pub fn new(user: impl Into<String>, password: Zeroizing<String>) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }

    /// User name
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// `Basic` authorization header value
    #[must_use]
    pub fn basic_authorization(&self) -> String {
        let token = Zeroizing::new(format!("{}:{}", self.user, self.password.as_str()));
        format!("Basic {}", BASE64.encode(token.as_bytes()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Source of credentials by scope
pub trait CredentialsProvider: Send + Sync + fmt::Debug {
    /// Credentials for a request to `host:port`
    fn credentials_for(&self, host: &str, port: u16) -> Option<Credentials>;
}

/// Credentials held in insertion order; a port-specific scope wins over an
/// any-port scope for the same host
#[derive(Debug, Clone, Default)]
pub struct BasicCredentialsProvider {
    entries: Vec<(AuthScope, Credentials)>,
}

impl BasicCredentialsProvider {
    /// Empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the credentials for `scope`, replacing previous ones
    pub fn set_credentials(&mut self, scope: AuthScope, credentials: Credentials) {
        match self.entries.iter_mut().find(|(s, _)| *s == scope) {
            Some(entry) => entry.1 = credentials,
            None => self.entries.push((scope, credentials)),
        }
    }

    /// Remove every credential
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether no credential is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialsProvider for BasicCredentialsProvider {
    fn credentials_for(&self, host: &str, port: u16) -> Option<Credentials> {
        let mut fallback = None;
        for (scope, credentials) in &self.entries {
            if !scope.matches(host, port) {
                continue;
            }
            if scope.port().is_some() {
                return Some(credentials.clone());
            }
            fallback.get_or_insert(credentials);
        }
        fallback.cloned()
    }
}
