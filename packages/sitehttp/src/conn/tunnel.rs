//! `CONNECT` tunnelling through an HTTP proxy

use std::io::{Read, Write};

use super::connection::ManagedConnection;
use super::error::PoolError;
use super::route::HttpHost;

const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Ask the proxy at the other end of `conn` to open a tunnel to `target`
///
/// `proxy_authorization` is sent verbatim as the `Proxy-Authorization` header.
/// On success the connection carries raw bytes to `target` and is ready to be
/// upgraded to TLS.
///
/// # Errors
///
/// Returns [`PoolError::TunnelRefused`] for a non-2xx answer and an I/O error
/// if the proxy closes the connection or the response head is oversized.
pub fn establish_tunnel(
    conn: &mut ManagedConnection,
    target: &HttpHost,
    proxy_authorization: Option<&str>,
) -> Result<(), PoolError> {
    let authority = target.authority();
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(value) = proxy_authorization {
        request.push_str("Proxy-Authorization: ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    tracing::debug!("Tunnelling to {} through {}", authority, conn.route().first_hop());
    conn.write_all(request.as_bytes())?;
    conn.flush()?;

    let head = read_response_head(conn)?;
    let status_line = head.lines().next().unwrap_or_default().trim().to_string();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok());

    match status {
        Some(code) if (200..300).contains(&code) => {
            tracing::trace!("Tunnel to {} established: {}", authority, status_line);
            Ok(())
        }
        _ => {
            conn.mark_non_reusable();
            Err(PoolError::TunnelRefused {
                target: authority,
                status: status_line,
            })
        }
    }
}

// Reads byte-wise so nothing past the blank line is consumed; the bytes after
// it belong to the TLS handshake.
fn read_response_head(conn: &mut ManagedConnection) -> Result<String, PoolError> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "proxy response head too large",
            )));
        }
        if conn.read(&mut byte)? == 0 {
            return Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "proxy closed connection during CONNECT",
            )));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
