#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_map_or)]

//! Site-bound HTTP clients over shared, reference-counted connection pools
//!
//! [`HttpFactory`] creates clients for a [`SiteConfig`]. Clients of equal site
//! connections share one pool; closing a client only releases its reference.
//! Pools are torn down by the operator calls [`HttpFactory::shutdown_now`] and
//! [`HttpFactory::shutdown_gracefully`].
//!
//! TLS material (client key, certificate chain and trusted server
//! certificates) is read from PEM text on the site and turned into a rustls
//! socket factory once per site.

pub mod auth;
pub mod client;
pub mod conn;
pub mod factory;
pub mod model;
pub mod tls;

pub use auth::{
    AuthScope, BasicAuthenticator, ClientAuthenticator, Credentials, MemoryPasswordManager,
    PasswordKey, PasswordManager, PasswordType,
};
pub use client::{ClientBuilder, ClientContext, Header, HttpClient, PooledHttpClient, RequestConfig};
pub use conn::{
    ConnectionManager, ConnectionManagerCache, ConnectionManagerTracker, HttpHost,
    SiteConnectionConfig, TrackedHttpClient,
};
pub use factory::HttpFactory;
pub use model::{SiteConfig, SiteConfigBuilder, SiteTrustType};
pub use sitehttp_common::{Error, ErrorKind, Result};
pub use tls::{build_ssl_socket_factory, SslSocketFactory, TlsError};
