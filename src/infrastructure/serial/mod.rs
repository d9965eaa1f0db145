// Serial module - The shared serial line
pub mod port;
pub mod simulated;

pub use port::{SerialLine, SerialTransport};
pub use simulated::{SimulatedDevice, SimulatedLine};
