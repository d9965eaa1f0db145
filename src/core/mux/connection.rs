use crate::core::mux::buffer::{Enqueue, OutboundBuffer};
use crate::domain::config::OverflowPolicy;
use crate::infrastructure::poll::Handle;
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};

/// Identifier assigned to each accepted client, in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Removed,
}

/// Outcome of one read from a client socket
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    /// Empty read: the peer closed its side
    Closed,
    /// Spurious wakeup
    Nothing,
}

/// One accepted client socket and its outbound queue.
#[derive(Debug)]
pub struct ClientConnection {
    id: ClientId,
    stream: TcpStream,
    peer: Option<SocketAddr>,
    liveness: Liveness,
    outbound: OutboundBuffer,
    write_armed: bool,
    connected_at: Instant,
    bytes_received: u64,
    bytes_sent: u64,
}

impl ClientConnection {
    /// Wrap an accepted socket, switching it to non-blocking mode.
    pub fn new(id: ClientId, stream: TcpStream, outbound_capacity: usize) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr().ok();

        Ok(Self {
            id,
            stream,
            peer,
            liveness: Liveness::Active,
            outbound: OutboundBuffer::new(outbound_capacity),
            write_armed: false,
            connected_at: Instant::now(),
            bytes_received: 0,
            bytes_sent: 0,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn handle(&self) -> Handle {
        self.stream.as_raw_fd()
    }

    /// Peer address at accept time.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Name for log lines: the peer address, or the client id if it was
    /// never known.
    pub fn label(&self) -> String {
        match self.stream.peer_addr().ok().or(self.peer) {
            Some(addr) => addr.to_string(),
            None => self.id.to_string(),
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn read_chunk(&mut self, max_bytes: usize) -> io::Result<ReadOutcome> {
        let mut buffer = vec![0u8; max_bytes];
        loop {
            match self.stream.read(&mut buffer) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => {
                    buffer.truncate(n);
                    self.bytes_received += n as u64;
                    return Ok(ReadOutcome::Data(buffer));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadOutcome::Nothing),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn queue(&mut self, data: &[u8], policy: OverflowPolicy) -> Enqueue {
        self.outbound.push(data, policy)
    }

    /// Send queued bytes without blocking.
    pub fn flush(&mut self) -> io::Result<usize> {
        let written = self.outbound.write_to(&mut self.stream)?;
        self.bytes_sent += written as u64;
        Ok(written)
    }

    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    pub(crate) fn write_armed(&self) -> bool {
        self.write_armed
    }

    pub(crate) fn set_write_armed(&mut self, armed: bool) {
        self.write_armed = armed;
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Shut the socket down. The descriptor itself closes on drop.
    pub fn close(&mut self) {
        if self.liveness == Liveness::Removed {
            return;
        }
        // The peer may already be gone.
        let _ = self.stream.shutdown(Shutdown::Both);
        self.liveness = Liveness::Removed;
    }
}
