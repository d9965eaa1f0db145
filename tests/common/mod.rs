//! Helpers shared by the integration tests: a server on an ephemeral port
//! backed by a simulated serial line, driven one iteration at a time.

#![allow(dead_code)]

use serial_mux::core::mux::MuxServer;
use serial_mux::{MuxConfig, SimulatedDevice, SimulatedLine};
use std::io::{ErrorKind, Read};
use std::net::TcpStream;
use std::time::{Duration, Instant};

pub const TICK: Duration = Duration::from_millis(50);
pub const PATIENCE: Duration = Duration::from_secs(5);

pub type TestServer = MuxServer<SimulatedLine>;

pub fn test_config() -> MuxConfig {
    let mut config = MuxConfig::default();
    config.listen.host = "127.0.0.1".to_string();
    config.listen.port = 0;
    config
}

pub fn start() -> (TestServer, SimulatedDevice) {
    start_with(&test_config())
}

pub fn start_with(config: &MuxConfig) -> (TestServer, SimulatedDevice) {
    let (line, device) = SimulatedLine::pair("sim0").expect("simulated line");
    let server = MuxServer::bind(config, line).expect("server bind");
    (server, device)
}

/// Run loop iterations until `done` holds, failing after [`PATIENCE`].
pub fn turn_until<F>(server: &mut TestServer, mut done: F)
where
    F: FnMut(&TestServer) -> bool,
{
    let deadline = Instant::now() + PATIENCE;
    while !done(server) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        server.turn(TICK).expect("loop iteration");
    }
}

/// Connect a blocking client and wait until the server has accepted it.
pub fn connect(server: &mut TestServer) -> TcpStream {
    let expected = server.client_count() + 1;
    let stream = TcpStream::connect(server.local_addr()).expect("connect");
    stream.set_read_timeout(Some(PATIENCE)).expect("read timeout");
    turn_until(server, |s| s.client_count() == expected);
    stream
}

/// Read exactly `len` bytes, turning the server while waiting.
pub fn read_exact_while_turning(server: &mut TestServer, client: &mut TcpStream, len: usize) -> Vec<u8> {
    client.set_nonblocking(true).expect("nonblocking");
    let deadline = Instant::now() + PATIENCE;
    let mut received = Vec::with_capacity(len);
    let mut buffer = [0u8; 4096];

    while received.len() < len {
        assert!(Instant::now() < deadline, "only received {} of {} bytes", received.len(), len);
        let want = (len - received.len()).min(buffer.len());
        match client.read(&mut buffer[..want]) {
            Ok(0) => panic!("server closed the connection early"),
            Ok(n) => received.extend_from_slice(&buffer[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                server.turn(Duration::from_millis(1)).expect("loop iteration");
            }
            Err(e) => panic!("read failed: {}", e),
        }
    }

    client.set_nonblocking(false).expect("blocking");
    received
}

/// True when nothing arrives on `client` within `wait`.
pub fn is_silent(client: &mut TcpStream, wait: Duration) -> bool {
    client.set_read_timeout(Some(wait)).expect("read timeout");
    let mut buffer = [0u8; 64];
    let silent = matches!(
        client.read(&mut buffer),
        Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    );
    client.set_read_timeout(Some(PATIENCE)).expect("read timeout");
    silent
}

/// True when the server has closed `client` (end of file or reset).
pub fn sees_eof(client: &mut TcpStream) -> bool {
    client.set_read_timeout(Some(PATIENCE)).expect("read timeout");
    let mut buffer = [0u8; 64];
    loop {
        match client.read(&mut buffer) {
            Ok(0) => return true,
            Ok(_) => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return true,
            Err(_) => return false,
        }
    }
}
