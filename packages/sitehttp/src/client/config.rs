//! Request settings and the decorated request head handed to exchanges

use std::fmt;
use std::time::Duration;

use crate::conn::{HttpHost, HttpRoute};

/// Timeouts for one request; unset values fall back to the client defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestConfig {
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    connection_request_timeout: Option<Duration>,
}

impl RequestConfig {
    /// All timeouts unset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// TCP connect (and TLS handshake) timeout
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Socket read/write timeout
    #[must_use]
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Time to wait for a pooled connection
    #[must_use]
    pub fn with_connection_request_timeout(mut self, timeout: Duration) -> Self {
        self.connection_request_timeout = Some(timeout);
        self
    }

    /// Connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Socket timeout
    #[must_use]
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout
    }

    /// Pool lease timeout
    #[must_use]
    pub fn connection_request_timeout(&self) -> Option<Duration> {
        self.connection_request_timeout
    }

    /// `self`, with unset values taken from `defaults`
    #[must_use]
    pub fn or(self, defaults: &RequestConfig) -> Self {
        Self {
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            socket_timeout: self.socket_timeout.or(defaults.socket_timeout),
            connection_request_timeout: self
                .connection_request_timeout
                .or(defaults.connection_request_timeout),
        }
    }
}

/// Request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Header `name: value`
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
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
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Route and headers prepared for one exchange
#[derive(Debug, Clone)]
pub struct RequestHead {
    route: HttpRoute,
    headers: Vec<Header>,
}

impl RequestHead {
    pub(crate) fn new(route: HttpRoute, headers: Vec<Header>) -> Self {
        Self { route, headers }
    }

    /// Route the connection follows
    #[must_use]
    pub fn route(&self) -> &HttpRoute {
        &self.route
    }

    /// Target host
    #[must_use]
    pub fn target(&self) -> &HttpHost {
        self.route.target()
    }

    /// Headers to send: client defaults, cookies and authorization
    #[must_use]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First header named `name`, case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(Header::value)
    }

    /// Request target for `path`: absolute form when talking to a proxy
    /// without a tunnel, origin form otherwise
    #[must_use]
    pub fn request_target(&self, path: &str) -> String {
        if self.route.proxy().is_some() && !self.route.is_tunnelled() {
            format!("{}{}", self.route.target(), path)
        } else {
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_config_falls_back_per_field() {
        let defaults = RequestConfig::new()
            .with_connect_timeout(Duration::from_secs(10))
            .with_socket_timeout(Duration::from_secs(10));
        let merged = RequestConfig::new()
            .with_socket_timeout(Duration::from_secs(1))
            .with_connection_request_timeout(Duration::from_secs(60))
            .or(&defaults);

        assert_eq!(merged.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(merged.socket_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(merged.connection_request_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn proxied_plain_requests_use_absolute_targets() {
        let target = HttpHost::new("http", "example.org", None);
        let proxy = HttpHost::new("http", "proxy", Some(3128));
        let head = RequestHead::new(HttpRoute::plan(target.clone(), Some(proxy)), vec![]);
        assert_eq!(head.request_target("/a"), "http://example.org:80/a");

        let direct = RequestHead::new(HttpRoute::direct(target), vec![Header::new("Accept", "*/*")]);
        assert_eq!(direct.request_target("/a"), "/a");
        assert_eq!(direct.header("accept"), Some("*/*"));
    }
}
