//! An in-process stand-in for a serial device.
//!
//! [`SimulatedLine`] is the server side and implements [`SerialLine`];
//! [`SimulatedDevice`] is the far end, used to emit bytes "from the
//! device", observe what the server wrote, and inject hardware faults.

use crate::domain::error::{MuxError, MuxResult};
use crate::infrastructure::poll::Handle;
use crate::infrastructure::serial::port::SerialLine;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct LineState {
    fault: Mutex<Option<String>>,
    faulted: AtomicBool,
    flushes: AtomicUsize,
    closes: AtomicUsize,
}

impl LineState {
    fn take_fault(&self) -> Option<String> {
        if !self.faulted.load(Ordering::SeqCst) {
            return None;
        }
        let message = self
            .fault
            .lock()
            .map(|fault| fault.clone())
            .unwrap_or_default();
        Some(message.unwrap_or_else(|| "simulated fault".to_string()))
    }
}

/// Server side of a simulated serial device.
#[derive(Debug)]
pub struct SimulatedLine {
    stream: UnixStream,
    name: String,
    state: Arc<LineState>,
}

/// Device side of a simulated serial device.
#[derive(Debug)]
pub struct SimulatedDevice {
    stream: UnixStream,
    state: Arc<LineState>,
}

impl SimulatedLine {
    /// Create a connected line and device.
    pub fn pair(name: impl Into<String>) -> MuxResult<(SimulatedLine, SimulatedDevice)> {
        let (line_end, device_end) = UnixStream::pair()?;
        line_end.set_nonblocking(true)?;

        let state = Arc::new(LineState::default());
        let line = SimulatedLine {
            stream: line_end,
            name: name.into(),
            state: Arc::clone(&state),
        };
        let device = SimulatedDevice {
            stream: device_end,
            state,
        };
        Ok((line, device))
    }

    fn check_fault(&self) -> MuxResult<()> {
        match self.state.take_fault() {
            Some(message) => Err(MuxError::transport(format!("{}: {}", self.name, message))),
            None => Ok(()),
        }
    }
}

impl SerialLine for SimulatedLine {
    fn handle(&self) -> Handle {
        self.stream.as_raw_fd()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, max_bytes: usize) -> MuxResult<Vec<u8>> {
        self.check_fault()?;

        let mut buffer = vec![0u8; max_bytes];
        match self.stream.read(&mut buffer) {
            Ok(0) => Err(MuxError::transport(format!("{}: device went away", self.name))),
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(MuxError::transport(format!("{}: {}", self.name, e))),
        }
    }

    fn write(&mut self, data: &[u8]) -> MuxResult<usize> {
        self.check_fault()?;

        self.stream
            .write_all(data)
            .map_err(|e| MuxError::transport(format!("{}: {}", self.name, e)))?;
        Ok(data.len())
    }

    fn flush_input_and_output(&mut self) -> MuxResult<()> {
        self.check_fault()?;

        let mut scratch = [0u8; 256];
        let mut discarded = 0;
        loop {
            match self.stream.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(MuxError::transport(format!("{}: {}", self.name, e))),
            }
        }
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
        debug!("Discarded {} stale bytes on {}", discarded, self.name);
        Ok(())
    }
}

impl Drop for SimulatedLine {
    fn drop(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl SimulatedDevice {
    /// Send bytes towards the server, as if the device printed them.
    pub fn emit(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data)
    }

    /// Collect exactly `len` bytes the server wrote to the line.
    pub fn receive(&mut self, len: usize, timeout: Duration) -> std::io::Result<Vec<u8>> {
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buffer = vec![0u8; len];
        self.stream.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Collect whatever the server wrote within `timeout`.
    pub fn drain(&mut self, timeout: Duration) -> std::io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(collected)
    }

    /// Make the next line operation fail. A wake byte is emitted so the
    /// line becomes readable and the loop notices promptly.
    pub fn inject_fault(&mut self, message: impl Into<String>) -> std::io::Result<()> {
        if let Ok(mut fault) = self.state.fault.lock() {
            *fault = Some(message.into());
        }
        self.state.faulted.store(true, Ordering::SeqCst);
        self.stream.write_all(&[0])
    }

    pub fn flush_count(&self) -> usize {
        self.state.flushes.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}
