use crate::core::mux::connection::ClientId;
use serde::Serialize;

/// Event loop lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LoopState {
    Running,
    Closing,
    Closed,
}

/// Why a client was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Hangup reported by the poller
    Hangup,
    /// Error reported by the poller, or a hard read error
    Error,
    /// Empty read: the peer closed its side
    NoData,
    /// A send to the client failed
    SendFailed,
    /// Outbound buffer full under the disconnect policy
    Overflow,
    /// Server shutdown
    Shutdown,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalReason::Hangup => write!(f, "HUP"),
            RemovalReason::Error => write!(f, "error"),
            RemovalReason::NoData => write!(f, "no data"),
            RemovalReason::SendFailed => write!(f, "send failed"),
            RemovalReason::Overflow => write!(f, "overflow"),
            RemovalReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// One resource released during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShutdownStep {
    Client(u64),
    Serial,
    Listener,
}

impl From<ClientId> for ShutdownStep {
    fn from(id: ClientId) -> Self {
        ShutdownStep::Client(id.0)
    }
}

/// Resources released by one shutdown pass, in release order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub steps: Vec<ShutdownStep>,
}

impl ShutdownReport {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Server counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub clients_accepted: u64,
    pub clients_removed: u64,
    pub clients_active: usize,
    pub bytes_from_serial: u64,
    pub bytes_to_serial: u64,
    pub bytes_to_clients: u64,
    pub bytes_dropped: u64,
}
