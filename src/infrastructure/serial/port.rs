use crate::domain::config::{FlowControlConfig, ParityConfig, SerialConfig};
use crate::domain::error::{MuxError, MuxResult};
use crate::infrastructure::poll::Handle;
use serialport::{ClearBuffer, SerialPort, TTYPort};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{debug, info};

/// Bound on a single wait for the line. A write that hits it is retried.
const IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Byte-level access to the shared line.
///
/// Implementations are owned by the event loop alone. Every hardware-level
/// failure comes back as [`MuxError::Transport`], which the loop treats as
/// fatal. Dropping the line closes it.
pub trait SerialLine {
    /// Pollable identity of the line.
    fn handle(&self) -> Handle;

    /// Human readable name for diagnostics.
    fn name(&self) -> &str;

    /// Read at most `max_bytes`. An empty result means nothing was pending.
    fn read(&mut self, max_bytes: usize) -> MuxResult<Vec<u8>>;

    /// Write all of `data`, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> MuxResult<usize>;

    /// Discard bytes buffered in either direction.
    fn flush_input_and_output(&mut self) -> MuxResult<()>;
}

/// A physical (or kernel-provided virtual) serial port.
pub struct SerialTransport {
    port: TTYPort,
    device: String,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> MuxResult<Self> {
        let mut builder = serialport::new(&config.device, config.baud_rate);

        builder = builder.data_bits(match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(MuxError::config(format!("Invalid data bits: {}", other)));
            }
        });

        builder = builder.stop_bits(match config.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(MuxError::config(format!("Invalid stop bits: {}", other)));
            }
        });

        builder = builder.parity(match config.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        });

        builder = builder.flow_control(match config.flow_control {
            FlowControlConfig::None => serialport::FlowControl::None,
            FlowControlConfig::Software => serialport::FlowControl::Software,
            FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
        });

        let port = builder.timeout(IO_TIMEOUT).open_native()?;

        info!("Serial port opened: {} @ {}", config.device, config.baud_rate);

        Ok(Self::from_port(port, config.device.clone()))
    }

    /// Wrap an already opened port.
    pub fn from_port(port: TTYPort, device: impl Into<String>) -> Self {
        Self {
            port,
            device: device.into(),
        }
    }
}

impl SerialLine for SerialTransport {
    fn handle(&self) -> Handle {
        self.port.as_raw_fd()
    }

    fn name(&self) -> &str {
        &self.device
    }

    fn read(&mut self, max_bytes: usize) -> MuxResult<Vec<u8>> {
        let mut buffer = vec![0u8; max_bytes];
        match self.port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            }
            Err(e) => Err(MuxError::transport(format!(
                "read from {} failed: {}",
                self.device, e
            ))),
        }
    }

    /// Waits for as long as the line needs to drain. A full output buffer is
    /// the baud rate at work; only real I/O errors become `Transport`.
    fn write(&mut self, data: &[u8]) -> MuxResult<usize> {
        let mut written = 0;
        let mut congested = false;

        while written < data.len() {
            match self.port.write(&data[written..]) {
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    if !congested {
                        debug!("{} output buffer full, waiting for it to drain", self.device);
                        congested = true;
                    }
                }
                Err(e) => {
                    return Err(MuxError::transport(format!(
                        "write to {} failed: {}",
                        self.device, e
                    )))
                }
            }
        }
        Ok(written)
    }

    fn flush_input_and_output(&mut self) -> MuxResult<()> {
        self.port.clear(ClearBuffer::All).map_err(|e| {
            MuxError::transport(format!("flush of {} failed: {}", self.device, e))
        })?;
        debug!("Flushed input and output buffers of {}", self.device);
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        info!("Serial port closed: {}", self.device);
    }
}
