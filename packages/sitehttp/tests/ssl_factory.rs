//! Building per-site SSL socket factories from PEM material

mod common;

use std::error::Error as _;
use std::sync::{Arc, Barrier};
use std::thread;

use sitehttp::tls::{build_ssl_socket_factory, HostnameVerification, TlsError};
use sitehttp::{
    ErrorKind, HttpFactory, MemoryPasswordManager, PasswordKey, PasswordType, SiteConfig,
    SiteTrustType,
};
use sitehttp_common::LoggingTransformer;

use common::{self_signed, TestPki, KEY_PASSWORD};

fn tls_error(error: &sitehttp::Error) -> &TlsError {
    error
        .source()
        .and_then(|s| s.downcast_ref::<TlsError>())
        .expect("configuration error should carry the TLS cause")
}

#[test]
fn test_site_with_key_and_trust_material_builds_factory() {
    LoggingTransformer::init_test();
    let pki = TestPki::new();
    let client = pki.issue(&["client.example.org"]);
    let server = pki.issue(&["secure.example.org"]);

    let site = SiteConfig::builder("secure", "https://secure.example.org")
        .with_key_cert_pem(client.key_cert_pem())
        .with_server_cert_pem(format!("{}{}", pki.ca_pem, server.cert_pem))
        .build()
        .expect("valid site");

    let factory = build_ssl_socket_factory(&site, Some(KEY_PASSWORD))
        .expect("factory should build")
        .expect("site has TLS material");

    let keys = factory.key_store().expect("key store should be present");
    assert_eq!(keys.aliases().collect::<Vec<_>>(), vec!["key"]);
    let entry = keys.entry("key").expect("entry under the fixed alias");
    assert_eq!(entry.chain().len(), 1);
    assert_eq!(entry.algorithm(), "EC");

    let trust = factory.trust_store().expect("trust store should be present");
    assert_eq!(
        trust.aliases().collect::<Vec<_>>(),
        vec!["secure.example.org-0", "secure.example.org-1"]
    );
    assert_eq!(trust.len(), 2);
    assert_eq!(factory.trust_type(), SiteTrustType::Default);
    assert_eq!(factory.hostname_verification(), HostnameVerification::Default);

    let listing = keys.to_string();
    assert!(listing.contains("Alias: key"), "listing was: {listing}");
    assert!(listing.contains("EC private key."), "listing was: {listing}");
}

#[test]
fn test_empty_or_missing_key_password_is_rejected() {
    LoggingTransformer::init_test();
    let client = self_signed(&["client.example.org"]);
    let site = SiteConfig::builder("needs-password", "https://secure.example.org")
        .with_key_cert_pem(client.key_cert_pem())
        .build()
        .expect("valid site");

    for password in [None, Some("")] {
        let error = build_ssl_socket_factory(&site, password)
            .expect_err("key material without a password must fail");
        assert!(error.is(&ErrorKind::Configuration));
        assert!(matches!(tls_error(&error), TlsError::EmptyKeyPassword));
        let context = error.get_context().expect("error should name the site");
        assert!(context.contains("needs-password"), "context was: {context}");
        assert!(context.contains("https://secure.example.org"), "context was: {context}");
    }
    assert!(site.attributes().ssl_factory().is_none(), "failures are not memoized");
}

#[test]
fn test_factory_is_memoized_per_site() {
    LoggingTransformer::init_test();
    let pki = TestPki::new();
    let site = Arc::new(
        SiteConfig::builder("memo", "https://memo.example.org")
            .with_server_cert_pem(pki.ca_pem.clone())
            .build()
            .expect("valid site"),
    );

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let factories: Vec<_> = (0..threads)
        .map(|_| {
            let site = site.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                build_ssl_socket_factory(&site, None)
                    .expect("factory should build")
                    .expect("site has trust material")
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().expect("builder thread panicked"))
        .collect();

    assert!(factories.iter().all(|f| Arc::ptr_eq(f, &factories[0])));
    let memoized = site.attributes().ssl_factory().expect("factory should be memoized");
    assert!(Arc::ptr_eq(&memoized, &factories[0]));
}

#[test]
fn test_site_without_material_uses_platform_defaults() {
    LoggingTransformer::init_test();
    let plain = SiteConfig::builder("plain", "https://plain.example.org")
        .build()
        .expect("valid site");
    assert!(build_ssl_socket_factory(&plain, None)
        .expect("nothing to build")
        .is_none());

    let relaxed = SiteConfig::builder("relaxed", "https://relaxed.example.org")
        .with_ignore_hostname_verification(true)
        .build()
        .expect("valid site");
    let factory = build_ssl_socket_factory(&relaxed, None)
        .expect("factory should build")
        .expect("host name override needs a factory");
    assert_eq!(factory.hostname_verification(), HostnameVerification::Disabled);
    assert!(factory.key_store().is_none());
    assert!(factory.trust_store().is_none());

    let unanchored = SiteConfig::builder("unanchored", "https://unanchored.example.org")
        .with_ignore_hostname_verification(true)
        .with_trust_type(SiteTrustType::TrustSelfSigned)
        .build()
        .expect("valid site");
    let factory = build_ssl_socket_factory(&unanchored, None)
        .expect("factory should build")
        .expect("host name override needs a factory");
    assert_eq!(
        factory.trust_type(),
        SiteTrustType::Default,
        "self-signed trust needs site trust material"
    );
}

#[test]
fn test_malformed_pem_is_a_configuration_error() {
    LoggingTransformer::init_test();
    let site = SiteConfig::builder("broken", "https://broken.example.org")
        .with_server_cert_pem("this is not a certificate")
        .build()
        .expect("valid site");

    let error = build_ssl_socket_factory(&site, None).expect_err("garbage PEM must fail");
    assert!(error.is(&ErrorKind::Configuration));
    assert!(matches!(tls_error(&error), TlsError::MalformedPem(_)));
}

#[test]
fn test_key_without_certificate_is_rejected() {
    LoggingTransformer::init_test();
    let client = self_signed(&["client.example.org"]);
    let site = SiteConfig::builder("keyonly", "https://keyonly.example.org")
        .with_key_cert_pem(client.key_pem.clone())
        .build()
        .expect("valid site");

    let error = build_ssl_socket_factory(&site, Some(KEY_PASSWORD))
        .expect_err("a key needs its certificate");
    assert!(matches!(tls_error(&error), TlsError::MalformedPem(_)));
}

#[test]
fn test_encrypted_pkcs8_key_is_decrypted_with_password() {
    LoggingTransformer::init_test();
    let client = self_signed(&["client.example.org"]);
    let pem = client.encrypted_key_cert_pem(KEY_PASSWORD);

    let site = SiteConfig::builder("encrypted", "https://encrypted.example.org")
        .with_key_cert_pem(pem.clone())
        .build()
        .expect("valid site");
    let factory = build_ssl_socket_factory(&site, Some(KEY_PASSWORD))
        .expect("correct password should decrypt the key")
        .expect("site has key material");
    assert!(factory.key_store().is_some_and(|k| k.entry("key").is_some()));

    let wrong = SiteConfig::builder("encrypted-wrong", "https://encrypted.example.org")
        .with_key_cert_pem(pem)
        .build()
        .expect("valid site");
    let error = build_ssl_socket_factory(&wrong, Some("not-the-password"))
        .expect_err("wrong password must fail");
    assert!(matches!(tls_error(&error), TlsError::KeyDecryption(_)));
}

#[test]
fn test_trust_self_signed_is_carried_into_context() {
    LoggingTransformer::init_test();
    let server = self_signed(&["selfsigned.example.org"]);
    let site = SiteConfig::builder("selfsigned", "https://selfsigned.example.org")
        .with_server_cert_pem(server.cert_pem.clone())
        .with_trust_type(SiteTrustType::TrustSelfSigned)
        .build()
        .expect("valid site");

    let factory = build_ssl_socket_factory(&site, None)
        .expect("factory should build")
        .expect("site has trust material");
    assert_eq!(factory.trust_type(), SiteTrustType::TrustSelfSigned);
    assert!(factory
        .trust_store()
        .and_then(|t| t.certificate("selfsigned.example.org-0"))
        .is_some());
}

#[test]
fn test_misconfigured_site_leaves_pool_cache_untouched() {
    LoggingTransformer::init_test();
    let passwords = Arc::new(MemoryPasswordManager::new());
    let factory = HttpFactory::new(passwords.clone());
    let client = self_signed(&["client.example.org"]);
    let site = SiteConfig::builder("unbound", "https://unbound.example.org")
        .with_key_cert_pem(client.key_cert_pem())
        .build()
        .expect("valid site");

    let error = factory
        .create_client(&site)
        .expect_err("no key password is bound");
    assert!(error.is(&ErrorKind::Configuration));
    assert!(factory.connection_cache().is_empty());

    passwords.bind(PasswordKey::for_site(&site, PasswordType::Key), KEY_PASSWORD);
    let created = factory.create_client(&site).expect("password is now bound");
    assert_eq!(factory.connection_cache().len(), 1);
    assert_eq!(created.tracker().lease_count(), 1);
}
