//! TLS socket factory pipeline
//!
//! Turns a site's PEM key, certificate and trust material into an immutable
//! rustls context, wrapped in a socket factory that the connection pool uses
//! to layer TLS over TCP. All key material stays in memory.

pub mod builder;
pub mod errors;
pub mod key_store;
pub mod key_strategy;
pub mod material;
pub mod socket_factory;
pub mod verifier;

pub use builder::build_ssl_socket_factory;
pub use errors::TlsError;
pub use key_store::{KeyEntry, KeyStore, TrustStore};
pub use key_strategy::FixedAliasKeyStrategy;
pub use material::{decode_pem_trust_store, read_key_and_cert};
pub use socket_factory::{SslContext, SslSocketFactory, TlsStream};
pub use verifier::{platform_root_store, HostnameVerification, SiteServerVerifier};
