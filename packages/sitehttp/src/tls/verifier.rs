//! Server certificate verification parameterized by site trust policy

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};

use super::errors::TlsError;
use crate::model::SiteTrustType;

static PLATFORM_ROOTS: Lazy<Arc<RootCertStore>> = Lazy::new(|| Arc::new(load_platform_roots()));

/// Whether server host names are checked against the certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostnameVerification {
    /// Standard RFC 6125 host name matching
    #[default]
    Default,
    /// Any host name is accepted for an otherwise valid certificate
    Disabled,
}

impl HostnameVerification {
    /// Policy for a site that does or does not ignore host name verification
    #[must_use]
    pub fn for_site(ignore_hostname_verification: bool) -> Self {
        if ignore_hostname_verification {
            Self::Disabled
        } else {
            Self::Default
        }
    }

    /// Whether host names are checked
    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Default)
    }
}

impl fmt::Display for HostnameVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// Platform trust anchors: native certificates, or the bundled Mozilla roots
/// when the platform store is unreadable or empty
#[must_use]
pub fn platform_root_store() -> Arc<RootCertStore> {
    PLATFORM_ROOTS.clone()
}

fn load_platform_roots() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        if let Err(e) = root_store.add(cert) {
            tracing::warn!("Failed to add system certificate: {}", e);
        }
    }
    for err in &native.errors {
        tracing::warn!("Certificate load error: {}", err);
    }

    if root_store.is_empty() || !native.errors.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    tracing::debug!("Loaded {} platform root certificates", root_store.len());
    root_store
}

/// Verifier applying a site's trust type and host name policy on top of
/// standard WebPKI validation
#[derive(Debug)]
pub struct SiteServerVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    trust_type: SiteTrustType,
    hostname_verification: HostnameVerification,
    provider: Arc<CryptoProvider>,
}

impl SiteServerVerifier {
    /// Build a verifier validating chains against `roots`
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Verifier`] if the WebPKI verifier rejects the roots.
    pub fn new(
        roots: Arc<RootCertStore>,
        trust_type: SiteTrustType,
        hostname_verification: HostnameVerification,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, TlsError> {
        let webpki = WebPkiServerVerifier::builder_with_provider(roots, provider.clone()).build()?;
        Ok(Self {
            webpki,
            trust_type,
            hostname_verification,
            provider,
        })
    }
}

impl ServerCertVerifier for SiteServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.trust_type.trusts_single_certificate_chains() && intermediates.is_empty() {
            if self.hostname_verification.is_enabled() {
                let parsed = ParsedCertificate::try_from(end_entity)?;
                rustls::client::verify_server_name(&parsed, server_name)?;
            }
            tracing::trace!("Trusting self-signed certificate presented by {:?}", server_name);
            return Ok(ServerCertVerified::assertion());
        }

        match self
            .webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(e) if !self.hostname_verification.is_enabled() && is_name_mismatch(&e) => {
                tracing::debug!(
                    "Ignoring host name mismatch for {:?}: verification disabled",
                    server_name
                );
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn is_name_mismatch(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}
