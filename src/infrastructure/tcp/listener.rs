use crate::domain::error::{MuxError, MuxResult};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrStorage,
};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::unix::io::FromRawFd;
use tracing::debug;

/// Bind a non-blocking listener on `host:port` with an explicit accept backlog.
///
/// Every address `host` resolves to is tried in order; the first that binds wins.
pub fn bind_listener(host: &str, port: u16, backlog: usize) -> MuxResult<TcpListener> {
    let addrs = (host, port).to_socket_addrs().map_err(|e| {
        MuxError::listener(format!("Failed to resolve {}:{}: {}", host, port, e))
    })?;

    let mut last_error = None;
    for addr in addrs {
        match bind_addr(addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Bind to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        MuxError::listener(format!("{}:{} resolved to no addresses", host, port))
    }))
}

fn bind_addr(addr: SocketAddr, backlog: usize) -> MuxResult<TcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };

    let fd = socket(family, SockType::Stream, SockFlag::empty(), None)
        .map_err(|e| MuxError::listener(format!("Failed to create socket: {}", e)))?;

    // SAFETY: `fd` was just returned by `socket` and nothing else owns it.
    // The listener closes it on every early return below.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };

    setsockopt(fd, sockopt::ReuseAddr, &true)
        .map_err(|e| MuxError::listener(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    bind(fd, &SockaddrStorage::from(addr))
        .map_err(|e| MuxError::listener(format!("Failed to bind to {}: {}", addr, e)))?;
    listen(fd, backlog)
        .map_err(|e| MuxError::listener(format!("Failed to listen on {}: {}", addr, e)))?;
    listener.set_nonblocking(true)?;

    Ok(listener)
}
