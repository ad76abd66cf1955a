//! PEM decoding of site key and trust material

use std::io::BufReader;

use rustls::pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs1KeyDer, PrivatePkcs8KeyDer, PrivateSec1KeyDer,
};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::errors::TlsError;
use super::key_store::{KeyEntry, KeyStore, TrustStore};
use super::key_strategy::FixedAliasKeyStrategy;

/// Parse a private key and its certificate chain into a single-entry key store
///
/// The entry is stored under [`FixedAliasKeyStrategy::ALIAS`]. Encrypted
/// PKCS#8 keys are decrypted with `password`.
///
/// # Errors
///
/// - [`TlsError::EmptyKeyPassword`] if `password` is empty
/// - [`TlsError::MalformedPem`] if the text does not decode, holds no key,
///   holds more than one key or holds no certificate
/// - [`TlsError::KeyDecryption`] if the password does not decrypt the key
/// - [`TlsError::UnsupportedKey`] for legacy encrypted keys or algorithms
///   rustls cannot sign with
/// - [`TlsError::CertificateParsing`] for certificates that are not X.509
pub fn read_key_and_cert(pem_text: &str, password: &str) -> Result<KeyStore, TlsError> {
    if password.is_empty() {
        return Err(TlsError::EmptyKeyPassword);
    }

    let sections =
        pem::parse_many(pem_text).map_err(|e| TlsError::MalformedPem(e.to_string()))?;

    let mut key: Option<PrivateKeyDer<'static>> = None;
    let mut chain = Vec::new();
    for section in sections {
        let tag = section.tag().to_owned();
        let parsed = match tag.as_str() {
            "CERTIFICATE" => {
                chain.push(CertificateDer::from(section.into_contents()));
                continue;
            }
            "RSA PRIVATE KEY" | "EC PRIVATE KEY" if is_legacy_encrypted(&section) => {
                return Err(TlsError::UnsupportedKey(
                    "legacy OpenSSL-encrypted key; convert it to encrypted PKCS#8".into(),
                ));
            }
            "PRIVATE KEY" => PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(section.into_contents())),
            "RSA PRIVATE KEY" => PrivateKeyDer::Pkcs1(PrivatePkcs1KeyDer::from(section.into_contents())),
            "EC PRIVATE KEY" => PrivateKeyDer::Sec1(PrivateSec1KeyDer::from(section.into_contents())),
            "ENCRYPTED PRIVATE KEY" => decrypt_pkcs8(section.contents(), password)?,
            other => {
                tracing::debug!("Skipping unrecognized PEM section '{other}'");
                continue;
            }
        };
        if key.replace(parsed).is_some() {
            return Err(TlsError::MalformedPem(
                "more than one private key found".into(),
            ));
        }
    }

    let key = key.ok_or_else(|| TlsError::MalformedPem("no private key found".into()))?;
    if chain.is_empty() {
        return Err(TlsError::MalformedPem(
            "no certificate found for private key".into(),
        ));
    }
    for cert in &chain {
        X509Certificate::from_der(cert.as_ref())
            .map_err(|e| TlsError::CertificateParsing(e.to_string()))?;
    }
    rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| TlsError::UnsupportedKey(e.to_string()))?;

    Ok(KeyStore::with_entry(
        FixedAliasKeyStrategy::ALIAS,
        KeyEntry::new(key, chain),
    ))
}

/// Parse every certificate in `pem_text` into a trust store
///
/// Aliases are `"<alias_prefix>-<n>"`, numbered from zero in document order.
///
/// # Errors
///
/// Returns [`TlsError::MalformedPem`] if the text does not decode or holds no
/// certificate, and a parsing or trust-store error for an unusable certificate.
pub fn decode_pem_trust_store(pem_text: &str, alias_prefix: &str) -> Result<TrustStore, TlsError> {
    let mut reader = BufReader::new(pem_text.as_bytes());
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::MalformedPem(e.to_string()))?;
    if certs.is_empty() {
        return Err(TlsError::MalformedPem("no certificates found".into()));
    }

    let mut store = TrustStore::new();
    for (n, cert) in certs.into_iter().enumerate() {
        store.add(format!("{alias_prefix}-{n}"), cert)?;
    }
    Ok(store)
}

fn is_legacy_encrypted(section: &pem::Pem) -> bool {
    section
        .headers()
        .get("Proc-Type")
        .is_some_and(|v| v.contains("ENCRYPTED"))
}

fn decrypt_pkcs8(der: &[u8], password: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let encrypted = pkcs8::EncryptedPrivateKeyInfo::try_from(der)
        .map_err(|e| TlsError::MalformedPem(format!("invalid encrypted private key: {e}")))?;
    let document = encrypted
        .decrypt(password.as_bytes())
        .map_err(|e| TlsError::KeyDecryption(e.to_string()))?;
    Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        document.as_bytes().to_vec(),
    )))
}
