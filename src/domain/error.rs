use std::os::unix::io::RawFd;
use thiserror::Error;

/// Serial mux unified error type
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serial transport error: {message}")]
    Transport { message: String },

    #[error("Listener error: {message}")]
    Listener { message: String },

    #[error("Poll error: {message}")]
    Poll { message: String },

    #[error("No registry entry for handle {0}")]
    Lookup(RawFd),

    #[error("Handle {0} is already registered")]
    DuplicateHandle(RawFd),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl MuxError {
    /// Whether this error must stop the event loop and trigger a full shutdown.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::Serial(_)
                | MuxError::Network(_)
                | MuxError::Transport { .. }
                | MuxError::Listener { .. }
                | MuxError::Poll { .. }
                | MuxError::Lookup(_)
        )
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        MuxError::Transport { message: message.into() }
    }

    pub(crate) fn listener(message: impl Into<String>) -> Self {
        MuxError::Listener { message: message.into() }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        MuxError::Config { message: message.into() }
    }
}

pub type MuxResult<T> = Result<T, MuxError>;
