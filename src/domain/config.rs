use crate::domain::error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes read from the line or from a client in one go.
pub const CHUNK_SIZE: usize = 80;

/// Pending connections the kernel may queue before `accept`.
pub const LISTEN_BACKLOG: usize = 5;

/// Upper bound on a single poller wait.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(500);

pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 23200;

/// Serial mux configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MuxConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Listening socket settings
    #[serde(default)]
    pub listen: ListenConfig,
    /// Per-client outbound buffering
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

/// Serial line configuration.
///
/// Framing is fixed at 8N1 without flow control; those fields are never
/// read from a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(skip, default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(skip, default = "default_parity")]
    pub parity: ParityConfig,
    #[serde(skip, default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(skip, default = "default_flow_control")]
    pub flow_control: FlowControlConfig,
}

/// Listening socket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// How serial output is queued towards each client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    /// Maximum bytes queued per client
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// What to do when a client cannot keep up
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    None,
    Hardware,
    Software,
}

/// Policy applied when a client's outbound buffer is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued bytes to make room
    #[default]
    DropOldest,
    /// Remove the client
    Disconnect,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> ParityConfig {
    ParityConfig::None
}

fn default_stop_bits() -> u8 {
    1
}

fn default_flow_control() -> FlowControlConfig {
    FlowControlConfig::None
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_outbound_capacity() -> usize {
    64 * 1024
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            serial: SerialConfig::default(),
            listen: ListenConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            flow_control: default_flow_control(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl SerialConfig {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            ..Self::default()
        }
    }
}

impl MuxConfig {
    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> MuxResult<()> {
        if self.serial.device.trim().is_empty() {
            return Err(MuxError::config("serial device path is empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(MuxError::config("baud rate must be greater than zero"));
        }
        if self.listen.host.trim().is_empty() {
            return Err(MuxError::config("listen host is empty"));
        }
        if self.broadcast.outbound_capacity < CHUNK_SIZE {
            return Err(MuxError::config(format!(
                "outbound capacity must be at least {} bytes, got {}",
                CHUNK_SIZE, self.broadcast.outbound_capacity
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ParityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParityConfig::None => write!(f, "none"),
            ParityConfig::Odd => write!(f, "odd"),
            ParityConfig::Even => write!(f, "even"),
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
            OverflowPolicy::Disconnect => write!(f, "disconnect"),
        }
    }
}
