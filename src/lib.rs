//! Serial Mux Library
//!
//! Shares one serial line between any number of TCP clients: bytes from the
//! line are broadcast to every client, bytes from any client are written to
//! the line.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use domain::error::{MuxError, MuxResult};
pub use domain::config::MuxConfig;
pub use crate::core::mux::{ClientId, MuxServer, ShutdownReport, ShutdownStep};
pub use infrastructure::serial::{SerialLine, SerialTransport, SimulatedDevice, SimulatedLine};
pub use infrastructure::tcp::MuxClient;
