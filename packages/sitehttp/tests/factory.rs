//! Site clients and contexts created through the factory, and the operator
//! shutdown surface

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sitehttp::auth::{AuthScope, CredentialsProvider};
use sitehttp::client::{ClientBuilder, ClientContext, Cookie, Header, RequestConfig};
use sitehttp::conn::{ConnectionManager, ConnectionManagerCache, HttpHost};
use sitehttp::{
    ClientAuthenticator, HttpClient, HttpFactory, MemoryPasswordManager, PasswordKey,
    PasswordType, SiteConfig,
};
use sitehttp_common::LoggingTransformer;

use common::{get, spawn_http_server, RecordingManager};

fn recording_factory() -> (HttpFactory, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let cache = ConnectionManagerCache::with_manager_factory(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RecordingManager::default()) as Arc<dyn ConnectionManager>)
    });
    let factory =
        HttpFactory::new(Arc::new(MemoryPasswordManager::new())).with_connection_cache(cache);
    (factory, created)
}

fn site(id: &str, uri: &str) -> SiteConfig {
    SiteConfig::builder(id, uri).build().expect("valid site")
}

#[test]
fn test_clients_of_one_site_share_a_tracker() {
    LoggingTransformer::init_test();
    let (factory, created) = recording_factory();
    let site = site("shared", "https://shared.example.org");

    let first = factory.create_client(&site).expect("client should be created");
    let second = factory.create_client(&site).expect("client should be created");

    assert!(Arc::ptr_eq(first.tracker(), second.tracker()));
    assert_eq!(first.tracker().lease_count(), 2);
    assert_eq!(created.load(Ordering::SeqCst), 1);

    first.close();
    first.close();
    assert!(first.is_closed());
    assert_eq!(second.tracker().lease_count(), 1, "close releases exactly once");
    assert!(!second.tracker().is_shutdown(), "closing one client keeps the pool");

    drop(second);
    assert_eq!(first.tracker().lease_count(), 0, "drop releases the reference");
    assert!(!first.tracker().is_shutdown(), "an unretired pool outlives its clients");
}

#[test]
fn test_sites_differing_in_connection_settings_get_separate_pools() {
    LoggingTransformer::init_test();
    let (factory, created) = recording_factory();

    let a = factory
        .create_client(&site("a", "https://pool.example.org"))
        .expect("client should be created");
    let b = factory
        .create_client(&site("b", "https://pool.example.org:8443"))
        .expect("client should be created");
    let c = factory
        .create_client(
            &SiteConfig::builder("c", "https://pool.example.org")
                .with_proxy("proxy.example.org", 3128)
                .build()
                .expect("valid site"),
        )
        .expect("client should be created");
    let a_again = factory
        .create_client(&site("a-again", "https://POOL.example.org"))
        .expect("client should be created");

    assert_eq!(created.load(Ordering::SeqCst), 3);
    assert!(!Arc::ptr_eq(a.tracker(), b.tracker()));
    assert!(!Arc::ptr_eq(a.tracker(), c.tracker()));
    assert!(Arc::ptr_eq(a.tracker(), a_again.tracker()), "site id is not part of the key");
}

#[test]
fn test_client_carries_site_timeouts_proxy_and_headers() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();
    let site = SiteConfig::builder("tuned", "http://tuned.example.org")
        .with_request_timeout_seconds(7)
        .with_proxy("proxy.example.org", 0)
        .build()
        .expect("valid site");

    let client = factory
        .create_client_with_headers(&site, vec![Header::new("Accept", "application/json")])
        .expect("client should be created");
    let inner = client.inner();

    assert_eq!(inner.default_request_config().connect_timeout(), Some(Duration::from_secs(7)));
    assert_eq!(inner.default_request_config().socket_timeout(), Some(Duration::from_secs(7)));
    let proxy = inner.proxy().expect("proxy should be configured");
    assert_eq!(proxy.host(), "proxy.example.org");
    assert_eq!(proxy.port(), 80, "unset proxy port means the scheme default");
    assert_eq!(inner.default_headers(), &[Header::new("Accept", "application/json")]);
}

#[test]
fn test_context_uses_site_cookie_store_and_pool_timeout() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();
    let site = SiteConfig::builder("cookies", "https://cookies.example.org")
        .with_connection_pool_timeout_seconds(42)
        .build()
        .expect("valid site");

    let first = factory.create_context(Some(&site)).expect("context should be created");
    let second = factory.create_context(Some(&site)).expect("context should be created");

    assert_eq!(
        first.request_config().connection_request_timeout(),
        Some(Duration::from_secs(42))
    );
    let store = first.cookie_store().expect("site cookie store");
    assert!(Arc::ptr_eq(store, second.cookie_store().expect("site cookie store")));
    store.add(Cookie::new("session", "abc").with_domain("cookies.example.org"));
    assert_eq!(
        second
            .cookie_store()
            .and_then(|s| s.cookie_header("cookies.example.org", "/")),
        Some("session=abc".to_string())
    );

    let bare = factory.create_context(None).expect("context should be created");
    assert!(bare.cookie_store().is_none());
    assert!(bare.preemptive_scopes().is_empty());
}

#[test]
fn test_context_starts_from_site_prototype() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();
    let site = site("prototype", "https://prototype.example.org");

    let mut prototype = ClientContext::new();
    prototype.set_request_config(
        RequestConfig::new().with_connection_request_timeout(Duration::from_secs(3)),
    );
    prototype.enable_preemptive_auth(AuthScope::any_port("sso.example.org"));
    site.attributes().set_context_prototype(Some(prototype));

    let context = factory.create_context(Some(&site)).expect("context should be created");
    assert_eq!(
        context.request_config().connection_request_timeout(),
        Some(Duration::from_secs(3)),
        "prototype timeout wins over the site pool timeout"
    );
    assert_eq!(context.preemptive_scopes(), &[AuthScope::any_port("sso.example.org")]);
}

#[test]
fn test_site_user_is_authenticated_preemptively() {
    LoggingTransformer::init_test();
    let server = spawn_http_server();
    let passwords = Arc::new(MemoryPasswordManager::new());
    let factory = HttpFactory::new(passwords.clone());
    let site = SiteConfig::builder("authenticated", format!("http://127.0.0.1:{}", server.port()))
        .with_user("alice")
        .build()
        .expect("valid site");
    passwords.bind(PasswordKey::for_site(&site, PasswordType::User), "wonderland");

    let client = factory.create_client(&site).expect("client should be created");
    let context = factory.create_context(Some(&site)).expect("context should be created");
    context
        .cookie_store()
        .expect("site cookie store")
        .add(Cookie::new("theme", "dark"));

    let target = HttpHost::from_url(site.uri()).expect("site URL has a host");
    let body = client
        .execute(&target, &context, |conn, head| get(conn, head, "/"))
        .expect("exchange should succeed");
    assert_eq!(body, "hello");

    let requests = server.requests();
    let request = requests.first().expect("server saw the request");
    let expected = format!("Authorization: Basic {}", BASE64.encode("alice:wonderland"));
    assert!(request.contains(&expected), "unexpected request: {request}");
    assert!(request.contains("Cookie: theme=dark"), "unexpected request: {request}");
}

#[test]
fn test_ipv6_literal_site_connects() {
    LoggingTransformer::init_test();
    let Some(server) = common::spawn_http_server_on("[::1]:0") else {
        eprintln!("IPv6 loopback unavailable; skipping");
        return;
    };
    let factory = HttpFactory::new(Arc::new(MemoryPasswordManager::new()));
    let site = SiteConfig::builder("ipv6", format!("http://[::1]:{}/", server.port()))
        .build()
        .expect("valid site");
    assert_eq!(site.host(), "::1");

    let client = factory.create_client(&site).expect("client should be created");
    let context = factory.create_context(Some(&site)).expect("context should be created");
    let target = HttpHost::from_url(site.uri()).expect("site URL has a host");
    let body = client
        .execute(&target, &context, |conn, head| get(conn, head, "/"))
        .expect("exchange over IPv6 should succeed");
    assert_eq!(body, "hello");

    let requests = server.requests();
    let request = requests.first().expect("server saw the request");
    assert!(
        request.contains(&format!("Host: [::1]:{}", server.port())),
        "unexpected request: {request}"
    );
}

#[test]
fn test_missing_user_password_still_yields_context() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();
    let site = SiteConfig::builder("nopassword", "https://nopassword.example.org")
        .with_user("bob")
        .build()
        .expect("valid site");

    let context = factory.create_context(Some(&site)).expect("context should be created");
    let credentials = context
        .credentials()
        .credentials_for("nopassword.example.org", 443)
        .expect("user credentials are installed");
    assert_eq!(credentials.user(), "bob");
    assert_eq!(context.preemptive_scopes(), &[AuthScope::new("nopassword.example.org", 443)]);
}

#[derive(Debug, Default)]
struct HeaderStampingAuthenticator {
    contexts: AtomicUsize,
}

impl ClientAuthenticator for HeaderStampingAuthenticator {
    fn decorate_client_builder(&self, builder: ClientBuilder) -> sitehttp::Result<ClientBuilder> {
        Ok(builder.default_headers(vec![Header::new("X-Stamped", "yes")]))
    }

    fn decorate_prototype_context(
        &self,
        _scope: &AuthScope,
        _site: &SiteConfig,
        _password_type: PasswordType,
        context: ClientContext,
    ) -> sitehttp::Result<ClientContext> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(context)
    }
}

#[test]
fn test_custom_authenticator_hooks_are_called() {
    LoggingTransformer::init_test();
    let authenticator = Arc::new(HeaderStampingAuthenticator::default());
    let factory = HttpFactory::with_authenticator(authenticator.clone(), None);
    let site = SiteConfig::builder("custom", "https://custom.example.org")
        .with_user("carol")
        .with_proxy("proxy.example.org", 8080)
        .with_proxy_user("dave")
        .build()
        .expect("valid site");

    factory.create_context(Some(&site)).expect("context should be created");
    assert_eq!(authenticator.contexts.load(Ordering::SeqCst), 2, "site and proxy scopes");

    let client = factory.create_client(&site).expect("client should be created");
    assert_eq!(client.inner().default_headers(), &[Header::new("X-Stamped", "yes")]);
    let client = factory
        .create_client_with_headers(&site, vec![Header::new("Accept", "text/plain")])
        .expect("client should be created");
    assert_eq!(
        client.inner().default_headers(),
        &[Header::new("Accept", "text/plain")],
        "explicit headers replace builder defaults"
    );
    assert!(factory.password_manager().is_none());
}

#[test]
fn test_shutdown_now_and_replacement() {
    LoggingTransformer::init_test();
    let (factory, created) = recording_factory();
    let site = site("operator", "https://operator.example.org");
    assert!(factory.is_shutdown(), "no pools means nothing is running");

    let client = factory.create_client(&site).expect("client should be created");
    assert!(!factory.is_shutdown());
    assert!(factory.shutdown_now());
    assert!(client.tracker().is_shutdown());

    let replacement = factory.create_client(&site).expect("a fresh pool should be created");
    assert!(!Arc::ptr_eq(client.tracker(), replacement.tracker()));
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_graceful_shutdown_waits_for_clients() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();
    let site = site("graceful", "https://graceful.example.org");
    let client = factory.create_client(&site).expect("client should be created");

    let drained = factory
        .shutdown_gracefully(Duration::from_millis(50))
        .expect("not interrupted");
    assert!(!drained, "open client keeps the pool alive");
    assert!(!factory.is_shutdown());

    let tracker = client.tracker().clone();
    drop(client);
    assert!(tracker.is_shutdown(), "the last close shuts the retired pool down");
    assert!(factory.is_shutdown());
}

#[test]
fn test_default_client_has_private_pool() {
    LoggingTransformer::init_test();
    let (factory, _) = recording_factory();

    let client = factory.create_default_client().expect("default client should build");
    assert!(client.proxy().is_none());
    assert!(factory.connection_cache().is_empty(), "default clients bypass the cache");
    client.close();
    assert!(client.connection_manager().is_shutdown());
}
