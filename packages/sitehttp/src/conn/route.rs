//! Hosts and routes

use std::fmt;

use url::{Host, Url};

use sitehttp_common::{ErrorKind, OptionExt, Result};

/// Scheme, host and port of an HTTP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpHost {
    scheme: String,
    host: String,
    port: u16,
}

impl HttpHost {
    /// Endpoint for `host`; a missing port means the scheme default
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        let scheme = scheme.into().to_ascii_lowercase();
        let port = port
            .filter(|p| *p > 0)
            .unwrap_or_else(|| default_port(&scheme));
        let host = host.into();
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        Self { scheme, host, port }
    }

    /// Endpoint addressed by `url`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a URL without a host.
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url_host(url)
            .ok_or_kind(ErrorKind::Configuration, format!("URL has no host: {url}"))?;
        Ok(Self::new(url.scheme(), host, url.port_or_known_default()))
    }

    /// `http` or `https`
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or address literal; IPv6 addresses carry no brackets
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the endpoint speaks TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }

    /// `host:port`, as used in `CONNECT` requests and `Host` headers
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", bracketed(&self.host), self.port)
    }
}

impl fmt::Display for HttpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// Host of `url` in the form sockets and TLS server names expect
///
/// `Url::host_str` keeps the brackets around IPv6 literals; resolvers and
/// `ServerName` want the bare address.
pub(crate) fn url_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

fn bracketed(host: &str) -> std::borrow::Cow<'_, str> {
    if host.contains(':') {
        format!("[{host}]").into()
    } else {
        host.into()
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

/// Path from the client to a target, optionally through a proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpRoute {
    target: HttpHost,
    proxy: Option<HttpHost>,
}

impl HttpRoute {
    /// Direct route to `target`
    #[must_use]
    pub fn direct(target: HttpHost) -> Self {
        Self {
            target,
            proxy: None,
        }
    }

    /// Route to `target`, through `proxy` when given
    #[must_use]
    pub fn plan(target: HttpHost, proxy: Option<HttpHost>) -> Self {
        Self { target, proxy }
    }

    /// Final destination
    #[must_use]
    pub fn target(&self) -> &HttpHost {
        &self.target
    }

    /// Proxy, if any
    #[must_use]
    pub fn proxy(&self) -> Option<&HttpHost> {
        self.proxy.as_ref()
    }

    /// Host the TCP connection is opened to
    #[must_use]
    pub fn first_hop(&self) -> &HttpHost {
        self.proxy.as_ref().unwrap_or(&self.target)
    }

    /// Whether traffic to the target is TLS protected
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.target.is_secure()
    }

    /// Whether the route needs a `CONNECT` tunnel through the proxy
    #[must_use]
    pub fn is_tunnelled(&self) -> bool {
        self.proxy.is_some() && self.is_secure()
    }
}

impl fmt::Display for HttpRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.proxy {
            Some(proxy) if self.is_tunnelled() => write!(f, "{} -> tunnel -> {}", proxy, self.target),
            Some(proxy) => write!(f, "{} -> {}", proxy, self.target),
            None => write!(f, "{}", self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_default_by_scheme() {
        assert_eq!(HttpHost::new("https", "example.org", None).port(), 443);
        assert_eq!(HttpHost::new("http", "example.org", None).port(), 80);
        assert_eq!(HttpHost::new("http", "proxy", Some(0)).port(), 80);
        assert_eq!(HttpHost::new("HTTPS", "Example.ORG", Some(8443)).to_string(), "https://example.org:8443");
    }

    #[test]
    fn ipv6_literals_are_bare_until_formatted() {
        let url = Url::parse("https://[::1]:8443/api").expect("valid URL");
        let host = HttpHost::from_url(&url).expect("URL has a host");
        assert_eq!(host.host(), "::1");
        assert_eq!(host.authority(), "[::1]:8443");
        assert_eq!(host.to_string(), "https://[::1]:8443");
        assert_eq!(HttpHost::new("http", "[::1]", Some(3128)).host(), "::1");
        assert_eq!(HttpHost::new("http", "127.0.0.1", None).authority(), "127.0.0.1:80");
    }

    #[test]
    fn only_secure_proxied_routes_tunnel() {
        let proxy = HttpHost::new("http", "proxy", Some(3128));
        let secure = HttpRoute::plan(HttpHost::new("https", "a", None), Some(proxy.clone()));
        let plain = HttpRoute::plan(HttpHost::new("http", "a", None), Some(proxy.clone()));

        assert!(secure.is_tunnelled());
        assert!(!plain.is_tunnelled());
        assert_eq!(plain.first_hop(), &proxy);
        assert!(!HttpRoute::direct(HttpHost::new("https", "a", None)).is_tunnelled());
    }
}
