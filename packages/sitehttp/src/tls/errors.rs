//! TLS-specific error types for detailed error handling

/// Failures while turning PEM material into a TLS context
///
/// Callers outside this module see these wrapped in a configuration error that
/// names the site; the variant is kept as the error source.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// PEM text could not be decoded, or a required section is missing
    #[error("Malformed PEM: {0}")]
    MalformedPem(String),

    /// Client key material was supplied without a password
    #[error("Key password cannot be empty")]
    EmptyKeyPassword,

    /// The encrypted private key could not be decrypted with the password
    #[error("Failed to decrypt private key: {0}")]
    KeyDecryption(String),

    /// The private key encoding or algorithm is not supported
    #[error("Unsupported private key: {0}")]
    UnsupportedKey(String),

    /// A certificate could not be parsed as X.509
    #[error("Certificate parsing failed: {0}")]
    CertificateParsing(String),

    /// Certificates could not be loaded into a trust store
    #[error("Trust store construction failed: {0}")]
    TrustStore(String),

    /// The server certificate verifier could not be built
    #[error("Certificate verifier construction failed: {0}")]
    Verifier(#[from] rustls::client::VerifierBuilderError),

    /// rustls rejected the configuration
    #[error("TLS context initialization failed: {0}")]
    Context(#[from] rustls::Error),
}
