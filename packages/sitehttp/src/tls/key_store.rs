//! In-memory key and trust stores
//!
//! Both stores render through `Display` as a certificate listing (alias,
//! subject, key algorithm) for trace logging of what a site will present and
//! accept.

use std::collections::BTreeMap;
use std::fmt;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::errors::TlsError;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";
const OID_ED448: &str = "1.3.101.113";

/// A private key with its certificate chain, leaf first
pub struct KeyEntry {
    key: PrivateKeyDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    algorithm: &'static str,
}

impl KeyEntry {
    pub(crate) fn new(key: PrivateKeyDer<'static>, chain: Vec<CertificateDer<'static>>) -> Self {
        let algorithm = key_algorithm(&key);
        Self { key, chain, algorithm }
    }

    /// Private key
    #[must_use]
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Certificate chain, leaf first
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Key algorithm name (`RSA`, `EC`, `Ed25519`, ...)
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("algorithm", &self.algorithm)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Private-key entries by alias
#[derive(Debug, Default)]
pub struct KeyStore {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyStore {
    /// Store holding a single entry
    pub(crate) fn with_entry(alias: impl Into<String>, entry: KeyEntry) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(alias.into(), entry);
        Self { entries }
    }

    /// Entry stored under `alias`
    #[must_use]
    pub fn entry(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.get(alias)
    }

    /// Aliases in sorted order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over `(alias, entry)` pairs
    pub fn entries(&self) -> impl Iterator<Item = (&str, &KeyEntry)> {
        self.entries.iter().map(|(alias, entry)| (alias.as_str(), entry))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (alias, entry) in &self.entries {
            write!(f, "\nAlias: {alias}")?;
            for cert in &entry.chain {
                write!(f, "\n\t{}", subject_of(cert))?;
            }
            write!(f, "\n\t{} private key.", entry.algorithm)?;
        }
        Ok(())
    }
}

/// Trusted certificates by alias, plus the root store built from them
#[derive(Debug, Clone)]
pub struct TrustStore {
    entries: Vec<(String, CertificateDer<'static>)>,
    roots: RootCertStore,
}

impl TrustStore {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            roots: RootCertStore::empty(),
        }
    }

    /// Add a trusted certificate under `alias`
    pub(crate) fn add(&mut self, alias: String, cert: CertificateDer<'static>) -> Result<(), TlsError> {
        X509Certificate::from_der(cert.as_ref())
            .map_err(|e| TlsError::CertificateParsing(format!("{alias}: {e}")))?;
        self.roots
            .add(cert.clone())
            .map_err(|e| TlsError::TrustStore(format!("{alias}: {e}")))?;
        self.entries.push((alias, cert));
        Ok(())
    }

    /// Aliases in insertion order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(alias, _)| alias.as_str())
    }

    /// Certificate stored under `alias`
    #[must_use]
    pub fn certificate(&self, alias: &str) -> Option<&CertificateDer<'static>> {
        self.entries
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, cert)| cert)
    }

    /// Root store used for chain validation
    #[must_use]
    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    /// Number of trusted certificates
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for TrustStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (alias, cert) in &self.entries {
            write!(f, "\nAlias: {alias}\n\t{}", subject_of(cert))?;
        }
        Ok(())
    }
}

fn subject_of(cert: &CertificateDer<'_>) -> String {
    match X509Certificate::from_der(cert.as_ref()) {
        Ok((_, parsed)) => parsed.subject().to_string(),
        Err(e) => format!("<unparsable certificate: {e}>"),
    }
}

fn key_algorithm(key: &PrivateKeyDer<'_>) -> &'static str {
    match key {
        PrivateKeyDer::Pkcs1(_) => "RSA",
        PrivateKeyDer::Sec1(_) => "EC",
        PrivateKeyDer::Pkcs8(der) => {
            let Ok(info) = pkcs8::PrivateKeyInfo::try_from(der.secret_pkcs8_der()) else {
                return "unknown";
            };
            match info.algorithm.oid.to_string().as_str() {
                OID_RSA_ENCRYPTION => "RSA",
                OID_EC_PUBLIC_KEY => "EC",
                OID_ED25519 => "Ed25519",
                OID_ED448 => "Ed448",
                _ => "unknown",
            }
        }
        _ => "unknown",
    }
}
