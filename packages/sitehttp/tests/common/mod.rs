//! Shared fixtures: generated certificates, local HTTP and TLS servers, a
//! CONNECT proxy and a recording connection manager

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

use sitehttp::client::RequestHead;
use sitehttp::conn::{
    ConnectionManager, HttpRoute, ManagedConnection, PoolError, PoolStats, SiteConnectionConfig,
};
use sitehttp::SiteConfig;

pub const KEY_PASSWORD: &str = "changeit";

/// Certificate and private key of one generated identity
pub struct Identity {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl Identity {
    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }

    /// Key followed by certificate, the shape sites carry as client material
    pub fn key_cert_pem(&self) -> String {
        format!("{}{}", self.key_pem, self.cert_pem)
    }

    /// Same material with the key as encrypted PKCS#8
    pub fn encrypted_key_cert_pem(&self, password: &str) -> String {
        let info = pkcs8::PrivateKeyInfo::try_from(self.key_der.as_slice())
            .expect("rcgen emits PKCS#8 keys");
        let params = pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(
            2048,
            &[7_u8; 16],
            &[9_u8; 16],
        )
        .expect("valid PBES2 parameters");
        let encrypted = info
            .encrypt_with_params(params, password)
            .expect("Failed to encrypt private key");
        let key_pem = encrypted
            .to_pem("ENCRYPTED PRIVATE KEY", pkcs8::LineEnding::LF)
            .expect("Failed to encode encrypted key");
        format!("{}{}", key_pem.as_str(), self.cert_pem)
    }
}

/// A throwaway certificate authority
pub struct TestPki {
    pub ca_pem: String,
    ca_key_pem: String,
}

impl TestPki {
    pub fn new() -> Self {
        let mut params =
            CertificateParams::new(Vec::<String>::new()).expect("Failed to create CA parameters");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "sitehttp test CA");
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().expect("Failed to generate CA key");
        let cert = params.self_signed(&key).expect("Failed to self-sign CA");
        Self {
            ca_pem: cert.pem(),
            ca_key_pem: key.serialize_pem(),
        }
    }

    /// Leaf certificate for `names`, signed by this CA
    pub fn issue(&self, names: &[&str]) -> Identity {
        let ca_key = KeyPair::from_pem(&self.ca_key_pem).expect("Failed to reload CA key");
        let issuer =
            Issuer::from_ca_cert_pem(&self.ca_pem, ca_key).expect("Failed to create CA issuer");

        let mut params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
            .expect("Failed to create leaf parameters");
        params
            .distinguished_name
            .push(DnType::CommonName, names.first().copied().unwrap_or("client"));
        let key = KeyPair::generate().expect("Failed to generate leaf key");
        let cert = params
            .signed_by(&key, &issuer)
            .expect("Failed to sign leaf certificate");
        Identity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            cert_der: cert.der().clone(),
            key_der: key.serialize_der(),
        }
    }
}

/// Self-signed certificate for `names`
pub fn self_signed(names: &[&str]) -> Identity {
    let mut params = CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
        .expect("Failed to create certificate parameters");
    params
        .distinguished_name
        .push(DnType::CommonName, names.first().copied().unwrap_or("self-signed"));
    let key = KeyPair::generate().expect("Failed to generate key pair");
    let cert = params
        .self_signed(&key)
        .expect("Failed to create self-signed certificate");
    Identity {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        cert_der: cert.der().clone(),
        key_der: key.serialize_der(),
    }
}

/// HTTP/1.1 server on an ephemeral local port answering every request with 200
pub struct TestServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Request heads received so far, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

/// Plain HTTP server; the response body is `hello`
pub fn spawn_http_server() -> TestServer {
    spawn_http_server_on("127.0.0.1:0").expect("Failed to bind test server")
}

/// Plain HTTP server bound to `bind`, or `None` when the address is unusable
/// on this host (no IPv6 loopback, for instance)
pub fn spawn_http_server_on(bind: &str) -> Option<TestServer> {
    let listener = TcpListener::bind(bind).ok()?;
    Some(serve_on(listener, |tcp, requests| {
        let mut tcp = tcp;
        serve(&mut tcp, &requests, |_| "hello".to_string());
    }))
}

/// TLS server presenting `identity`
///
/// With `client_ca_pem` the server demands a client certificate issued by that
/// CA. The response body says whether the peer presented a certificate.
pub fn spawn_tls_server(identity: &Identity, client_ca_pem: Option<&str>) -> TestServer {
    let config = Arc::new(server_config(identity, client_ca_pem));
    spawn_server(move |tcp, requests| {
        let Ok(conn) = ServerConnection::new(config.clone()) else {
            return;
        };
        let mut tls = StreamOwned::new(conn, tcp);
        serve(&mut tls, &requests, |tls: &StreamOwned<ServerConnection, TcpStream>| {
            if tls.conn.peer_certificates().is_some_and(|c| !c.is_empty()) {
                "client-cert".to_string()
            } else {
                "anonymous".to_string()
            }
        });
    })
}

fn server_config(identity: &Identity, client_ca_pem: Option<&str>) -> ServerConfig {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .expect("Failed to select protocol versions");
    let builder = match client_ca_pem {
        Some(pem) => {
            let mut roots = RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
                roots
                    .add(cert.expect("valid CA PEM"))
                    .expect("Failed to add client CA");
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .expect("Failed to build client verifier");
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    builder
        .with_single_cert(vec![identity.cert_der.clone()], identity.key_der())
        .expect("Failed to configure server certificate")
}

fn spawn_server<H>(handler: H) -> TestServer
where
    H: Fn(TcpStream, Arc<Mutex<Vec<String>>>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    serve_on(listener, handler)
}

fn serve_on<H>(listener: TcpListener, handler: H) -> TestServer
where
    H: Fn(TcpStream, Arc<Mutex<Vec<String>>>) + Send + Sync + 'static,
{
    let addr = listener.local_addr().expect("listener address");
    let accepted = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let handler = Arc::new(handler);
    let counter = accepted.clone();
    let log = requests.clone();
    thread::spawn(move || {
        for tcp in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            let log = log.clone();
            thread::spawn(move || handler(tcp, log));
        }
    });
    TestServer {
        addr,
        accepted,
        requests,
    }
}

fn serve<S, B>(stream: &mut S, requests: &Mutex<Vec<String>>, body: B)
where
    S: Read + Write,
    B: Fn(&S) -> String,
{
    while let Ok(Some(head)) = read_head(stream) {
        requests.lock().expect("request log poisoned").push(head);
        let body = body(stream);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        if stream.write_all(response.as_bytes()).and_then(|()| stream.flush()).is_err() {
            return;
        }
    }
}

// `Ok(None)` on a clean close before any byte of a new head.
fn read_head<R: Read>(stream: &mut R) -> io::Result<Option<String>> {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte)? == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated head"));
        }
        head.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(&head).into_owned()))
}

/// Send `GET path` with the prepared head and return the response body
pub fn get(conn: &mut ManagedConnection, head: &RequestHead, path: &str) -> io::Result<String> {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\n",
        head.request_target(path),
        head.target().authority()
    );
    for header in head.headers() {
        request.push_str(&format!("{}: {}\r\n", header.name(), header.value()));
    }
    request.push_str("\r\n");
    conn.write_all(request.as_bytes())?;
    conn.flush()?;

    let head = read_head(conn)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no response"))?;
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    conn.read_exact(&mut body)?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Forward proxy that only understands `CONNECT`
///
/// Accepted tunnels are spliced to the requested authority. With
/// `refuse_with` set, every request is answered with that status instead.
pub struct TestProxy {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestProxy {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Request heads received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log poisoned").clone()
    }
}

pub fn spawn_connect_proxy(refuse_with: Option<u16>) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test proxy");
    let addr = listener.local_addr().expect("listener address");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    thread::spawn(move || {
        for client in listener.incoming().flatten() {
            let log = log.clone();
            thread::spawn(move || {
                let _ = tunnel(client, &log, refuse_with);
            });
        }
    });
    TestProxy { addr, requests }
}

fn tunnel(mut client: TcpStream, log: &Mutex<Vec<String>>, refuse_with: Option<u16>) -> io::Result<()> {
    let Some(head) = read_head(&mut client)? else {
        return Ok(());
    };
    log.lock().expect("request log poisoned").push(head.clone());

    if let Some(status) = refuse_with {
        client.write_all(format!("HTTP/1.1 {status} Refused\r\nContent-Length: 0\r\n\r\n").as_bytes())?;
        return Ok(());
    }
    let authority = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no CONNECT authority"))?;
    let upstream = TcpStream::connect(authority)?;
    client.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")?;

    let mut client_read = client.try_clone()?;
    let mut upstream_write = upstream.try_clone()?;
    let upload = thread::spawn(move || {
        let _ = io::copy(&mut client_read, &mut upstream_write);
        let _ = upstream_write.shutdown(Shutdown::Write);
    });
    let mut upstream_read = upstream;
    let _ = io::copy(&mut upstream_read, &mut client);
    let _ = client.shutdown(Shutdown::Write);
    let _ = upload.join();
    Ok(())
}

/// Connection manager that records lifecycle calls and leases nothing
#[derive(Debug, Default)]
pub struct RecordingManager {
    shutdowns: AtomicUsize,
}

impl RecordingManager {
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl ConnectionManager for RecordingManager {
    fn request_connection(
        &self,
        _route: &HttpRoute,
        _timeout: Option<Duration>,
    ) -> Result<ManagedConnection, PoolError> {
        Err(PoolError::Shutdown)
    }

    fn release_connection(&self, _conn: ManagedConnection, _keep_alive: Option<Duration>) {}

    fn connect(
        &self,
        _conn: &mut ManagedConnection,
        _route: &HttpRoute,
        _connect_timeout: Option<Duration>,
    ) -> Result<(), PoolError> {
        Err(PoolError::NotOpen)
    }

    fn upgrade(&self, _conn: &mut ManagedConnection, _route: &HttpRoute) -> Result<(), PoolError> {
        Err(PoolError::NotOpen)
    }

    fn route_complete(&self, _conn: &mut ManagedConnection, _route: &HttpRoute) -> Result<(), PoolError> {
        Err(PoolError::NotOpen)
    }

    fn close_idle_connections(&self, _idle: Duration) {}

    fn close_expired_connections(&self) {}

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdowns() > 0
    }

    fn stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

/// Pool key for a plain site at `uri`
pub fn connection_config(uri: &str) -> SiteConnectionConfig {
    let site = SiteConfig::builder("test", uri)
        .build()
        .expect("valid site configuration");
    SiteConnectionConfig::from_site(&site)
}
