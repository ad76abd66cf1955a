//! Per-site construction of the SSL socket factory

use std::sync::Arc;

use sitehttp_common::{Error, ErrorKind, Result};

use super::errors::TlsError;
use super::material::{decode_pem_trust_store, read_key_and_cert};
use super::socket_factory::{SslContext, SslSocketFactory};
use super::verifier::HostnameVerification;
use crate::model::SiteConfig;

/// Build, or fetch the memoized, SSL socket factory for `site`
///
/// `key_password` decrypts the client key and is only consulted when the site
/// has client key material. Returns `Ok(None)` when the site has no key
/// material, no trust material and does not override host name verification;
/// callers then use [`SslSocketFactory::system_default`].
///
/// A successfully built factory is stored on the site's attributes so every
/// later call, from any thread, returns the same instance.
///
/// # Errors
///
/// Returns a configuration error naming the site if the key password is
/// missing, the PEM material cannot be decoded or the TLS context cannot be
/// built.
pub fn build_ssl_socket_factory(
    site: &SiteConfig,
    key_password: Option<&str>,
) -> Result<Option<Arc<SslSocketFactory>>> {
    if let Some(factory) = site.attributes().ssl_factory() {
        return Ok(Some(factory));
    }

    let key_store = match site.key_cert_pem() {
        Some(pem) => {
            tracing::debug!("Reading client key/certificate for site {}", site.id());
            let password = key_password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| misconfigured(site, "no key password", TlsError::EmptyKeyPassword))?;
            let keys = read_key_and_cert(pem, password)
                .map_err(|e| misconfigured(site, "invalid client key/certificate", e))?;
            tracing::trace!("Keystore contains the following certificates: {}", keys);
            Some(keys)
        }
        None => {
            tracing::debug!("No client key/certificate for site {}", site.id());
            None
        }
    };

    let trust_store = match site.server_cert_pem() {
        Some(pem) => {
            tracing::debug!("Reading server certificates for site {}", site.id());
            let trust = decode_pem_trust_store(pem, site.host())
                .map_err(|e| misconfigured(site, "invalid server certificate", e))?;
            tracing::trace!("Trust store contains the following certificates: {}", trust);
            Some(trust)
        }
        None => {
            tracing::debug!("No server certificates for site {}", site.id());
            None
        }
    };

    if key_store.is_none() && trust_store.is_none() && !site.is_ignore_hostname_verification() {
        tracing::debug!(
            "No SSL configuration present for site {}; using platform defaults",
            site.id()
        );
        return Ok(None);
    }

    let hostname_verification = HostnameVerification::for_site(site.is_ignore_hostname_verification());
    let context = SslContext::build(key_store, trust_store, site.trust_type(), hostname_verification)
        .map_err(|e| misconfigured(site, "cannot initialize TLS context", e))?;
    let factory = Arc::new(SslSocketFactory::new(context));

    tracing::debug!(
        "Created SSL socket factory for site {} (trust type {}, host name verification {})",
        site.id(),
        factory.trust_type(),
        hostname_verification
    );
    Ok(Some(site.attributes().memoize_ssl_factory(factory)))
}

fn misconfigured(site: &SiteConfig, what: &str, cause: TlsError) -> Error {
    tracing::error!(
        "Failed to initialize SSL connection for site {} ({}): {}: {}",
        site.id(),
        site.uri(),
        what,
        cause
    );
    Error::with_source(ErrorKind::Configuration, cause).context(format!(
        "Failed to initialize SSL connection for site {} ({}): {what}",
        site.id(),
        site.uri()
    ))
}
