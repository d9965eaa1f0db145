//! The multiplexer: one serial line fanned out to many TCP clients.

pub mod buffer;
pub mod connection;
pub mod registry;
pub mod server;
pub mod state;

pub use buffer::{Enqueue, OutboundBuffer};
pub use connection::{ClientConnection, ClientId, Liveness, ReadOutcome};
pub use registry::{HandleRegistry, Owner};
pub use server::MuxServer;
pub use state::{LoopState, RemovalReason, ServerStats, ShutdownReport, ShutdownStep};
