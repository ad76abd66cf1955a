//! TLS context and the socket factory that layers it over TCP streams

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ClientConnection, StreamOwned};

use super::errors::TlsError;
use super::key_store::{KeyStore, TrustStore};
use super::key_strategy::{FixedAliasCertResolver, FixedAliasKeyStrategy};
use super::verifier::{platform_root_store, HostnameVerification, SiteServerVerifier};
use crate::model::SiteTrustType;

/// Client-side TLS stream produced by [`SslSocketFactory::create_layered`]
pub type TlsStream = StreamOwned<ClientConnection, TcpStream>;

static SYSTEM_DEFAULT: OnceCell<Arc<SslSocketFactory>> = OnceCell::new();

fn ring_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Immutable TLS client context assembled from a site's key and trust stores
pub struct SslContext {
    client_config: Arc<ClientConfig>,
    key_store: Option<KeyStore>,
    trust_store: Option<TrustStore>,
    trust_type: SiteTrustType,
    hostname_verification: HostnameVerification,
}

impl SslContext {
    /// Build a context
    ///
    /// Without a trust store the platform roots are used and `trust_type` is
    /// ignored: the trust strategy only ever applies to site-supplied trust
    /// material. The key store, when present, is consulted through
    /// [`FixedAliasKeyStrategy`].
    ///
    /// # Errors
    ///
    /// Returns a [`TlsError`] if a key cannot be loaded for signing or rustls
    /// rejects the configuration.
    pub fn build(
        key_store: Option<KeyStore>,
        trust_store: Option<TrustStore>,
        trust_type: SiteTrustType,
        hostname_verification: HostnameVerification,
    ) -> Result<Self, TlsError> {
        let provider = ring_provider();

        let (roots, trust_type) = match &trust_store {
            Some(store) => (Arc::new(store.roots().clone()), trust_type),
            None => (platform_root_store(), SiteTrustType::Default),
        };
        let verifier = Arc::new(SiteServerVerifier::new(
            roots,
            trust_type,
            hostname_verification,
            provider.clone(),
        )?);

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let client_config = match &key_store {
            Some(keys) => builder.with_client_cert_resolver(client_cert_resolver(keys)?),
            None => builder.with_no_client_auth(),
        };

        Ok(Self {
            client_config: Arc::new(client_config),
            key_store,
            trust_store,
            trust_type,
            hostname_verification,
        })
    }

    /// Client private keys, if the site has any
    #[must_use]
    pub fn key_store(&self) -> Option<&KeyStore> {
        self.key_store.as_ref()
    }

    /// Site-specific trusted certificates; `None` means platform roots
    #[must_use]
    pub fn trust_store(&self) -> Option<&TrustStore> {
        self.trust_store.as_ref()
    }

    /// Server trust policy in effect; always `Default` without a trust store
    #[must_use]
    pub fn trust_type(&self) -> SiteTrustType {
        self.trust_type
    }

    /// Host name verification policy
    #[must_use]
    pub fn hostname_verification(&self) -> HostnameVerification {
        self.hostname_verification
    }

    /// The rustls configuration
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }
}

impl fmt::Debug for SslContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SslContext")
            .field("key_store", &self.key_store)
            .field("trust_store_len", &self.trust_store.as_ref().map(TrustStore::len))
            .field("trust_type", &self.trust_type)
            .field("hostname_verification", &self.hostname_verification)
            .finish_non_exhaustive()
    }
}

fn client_cert_resolver(keys: &KeyStore) -> Result<Arc<dyn ResolvesClientCert>, TlsError> {
    let mut certified = BTreeMap::new();
    for (alias, entry) in keys.entries() {
        let signing_key = rustls::crypto::ring::sign::any_supported_type(entry.key())
            .map_err(|e| TlsError::UnsupportedKey(format!("{alias}: {e}")))?;
        certified.insert(
            alias.to_string(),
            Arc::new(CertifiedKey::new(entry.chain().to_vec(), signing_key)),
        );
    }
    Ok(Arc::new(FixedAliasCertResolver::new(
        FixedAliasKeyStrategy,
        certified,
    )))
}

/// Layers TLS over connected sockets using one [`SslContext`]
///
/// Factories are compared by identity when used in pool keys; share them
/// through `Arc`.
#[derive(Debug)]
pub struct SslSocketFactory {
    context: SslContext,
}

impl SslSocketFactory {
    /// Factory for `context`
    #[must_use]
    pub fn new(context: SslContext) -> Self {
        Self { context }
    }

    /// Process-wide factory trusting the platform roots with default host
    /// name verification and no client identity
    ///
    /// # Errors
    ///
    /// Returns a [`TlsError`] if the default context cannot be built.
    pub fn system_default() -> Result<Arc<Self>, TlsError> {
        SYSTEM_DEFAULT
            .get_or_try_init(|| {
                tracing::debug!("Creating system default SSL socket factory");
                let context = SslContext::build(
                    None,
                    None,
                    SiteTrustType::Default,
                    HostnameVerification::Default,
                )?;
                Ok(Arc::new(Self::new(context)))
            })
            .cloned()
    }

    /// The TLS context
    #[must_use]
    pub fn context(&self) -> &SslContext {
        &self.context
    }

    /// Client key store, if any
    #[must_use]
    pub fn key_store(&self) -> Option<&KeyStore> {
        self.context.key_store()
    }

    /// Trust store, if any
    #[must_use]
    pub fn trust_store(&self) -> Option<&TrustStore> {
        self.context.trust_store()
    }

    /// Server trust policy in effect; always `Default` without a trust store
    #[must_use]
    pub fn trust_type(&self) -> SiteTrustType {
        self.context.trust_type()
    }

    /// Host name verification policy
    #[must_use]
    pub fn hostname_verification(&self) -> HostnameVerification {
        self.context.hostname_verification()
    }

    /// Run a TLS client handshake for `host` over `stream`
    ///
    /// The handshake completes before this returns, so certificate problems
    /// surface here rather than on first use. Socket timeouts set on `stream`
    /// bound the handshake.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a host that is not a valid server name and
    /// `InvalidData` (wrapping the rustls error) for a failed handshake.
    pub fn create_layered(&self, mut stream: TcpStream, host: &str) -> io::Result<TlsStream> {
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid server name {host}: {e}"),
            )
        })?;
        let mut connection = ClientConnection::new(self.context.client_config(), server_name)
            .map_err(io::Error::other)?;

        while connection.is_handshaking() {
            connection.complete_io(&mut stream)?;
        }
        tracing::trace!(
            "TLS handshake with {} complete ({:?})",
            host,
            connection.protocol_version()
        );
        Ok(StreamOwned::new(connection, stream))
    }
}
