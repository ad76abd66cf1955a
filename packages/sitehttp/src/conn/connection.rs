//! Pooled connections

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::tls::TlsStream;

use super::route::HttpRoute;

/// Transport under a managed connection
pub(crate) enum ConnectionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl ConnectionStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(tls) => tls.get_ref(),
        }
    }

    fn close(self) {
        let tcp = match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(mut tls) => {
                tls.conn.send_close_notify();
                let _ = tls.conn.complete_io(&mut tls.sock);
                tls.sock
            }
        };
        let _ = tcp.shutdown(Shutdown::Both);
    }
}

/// A connection leased from a connection manager
///
/// Reads and writes fail with `NotConnected` once the owning pool has been
/// shut down, even while the connection is still leased.
pub struct ManagedConnection {
    id: u64,
    route: HttpRoute,
    stream: Option<ConnectionStream>,
    route_complete: bool,
    reusable: bool,
    pool_alive: Arc<AtomicBool>,
    created: Instant,
}

impl ManagedConnection {
    pub(crate) fn new(id: u64, route: HttpRoute, pool_alive: Arc<AtomicBool>) -> Self {
        Self {
            id,
            route,
            stream: None,
            route_complete: false,
            reusable: true,
            pool_alive,
            created: Instant::now(),
        }
    }

    /// Pool-unique connection id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Route the connection was leased for
    #[must_use]
    pub fn route(&self) -> &HttpRoute {
        &self.route
    }

    /// Whether a socket is attached
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Whether the connection is TLS protected
    #[must_use]
    pub fn is_secure(&self) -> bool {
        matches!(self.stream, Some(ConnectionStream::Tls(_)))
    }

    /// Whether the route, including any tunnel, has been established
    #[must_use]
    pub fn is_route_complete(&self) -> bool {
        self.route_complete
    }

    /// Whether the connection may go back to the pool after use
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Allow the connection to be pooled again after release
    pub fn mark_reusable(&mut self) {
        self.reusable = true;
    }

    /// Close the connection on release instead of pooling it
    pub fn mark_non_reusable(&mut self) {
        self.reusable = false;
    }

    /// Time since the connection was allocated
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Remote address of the first hop
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.tcp().peer_addr().ok())
    }

    /// Protocol version negotiated for a TLS connection
    #[must_use]
    pub fn tls_protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        match &self.stream {
            Some(ConnectionStream::Tls(tls)) => tls.conn.protocol_version(),
            _ => None,
        }
    }

    /// Set the read and write timeout; `None` or zero blocks indefinitely
    ///
    /// # Errors
    ///
    /// Returns the socket error, or `NotConnected` if the connection is not open.
    pub fn set_socket_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = timeout.filter(|t| !t.is_zero());
        let tcp = self.stream.as_ref().ok_or_else(not_open)?.tcp();
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)
    }

    /// Close the socket; the connection can be reconnected afterwards
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::trace!("Closing connection {} ({})", self.id, self.route);
            stream.close();
        }
        self.route_complete = false;
    }

    /// Whether the peer has closed an idle connection
    pub(crate) fn is_stale(&self) -> bool {
        let Some(stream) = &self.stream else {
            return true;
        };
        let tcp = stream.tcp();
        if tcp.set_nonblocking(true).is_err() {
            return true;
        }
        let mut probe = [0_u8; 1];
        let stale = match tcp.peek(&mut probe) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => e.kind() != io::ErrorKind::WouldBlock,
        };
        tcp.set_nonblocking(false).is_err() || stale
    }

    pub(crate) fn attach(&mut self, stream: ConnectionStream) {
        self.stream = Some(stream);
    }

    pub(crate) fn detach(&mut self) -> Option<ConnectionStream> {
        self.route_complete = false;
        self.stream.take()
    }

    pub(crate) fn mark_route_complete(&mut self) {
        self.route_complete = true;
    }

    pub(crate) fn try_clone_socket(&self) -> Option<TcpStream> {
        self.stream.as_ref().and_then(|s| s.tcp().try_clone().ok())
    }

    fn stream_mut(&mut self) -> io::Result<&mut ConnectionStream> {
        if !self.pool_alive.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection pool shut down",
            ));
        }
        self.stream.as_mut().ok_or_else(not_open)
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection not open")
}

impl Read for ManagedConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream_mut()? {
            ConnectionStream::Plain(tcp) => tcp.read(buf),
            ConnectionStream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for ManagedConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream_mut()? {
            ConnectionStream::Plain(tcp) => tcp.write(buf),
            ConnectionStream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream_mut()? {
            ConnectionStream::Plain(tcp) => tcp.flush(),
            ConnectionStream::Tls(tls) => tls.flush(),
        }
    }
}

impl fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("open", &self.is_open())
            .field("secure", &self.is_secure())
            .field("route_complete", &self.route_complete)
            .field("reusable", &self.reusable)
            .finish()
    }
}
