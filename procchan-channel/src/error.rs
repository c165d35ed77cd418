//! Channel error types

use procchan_ipc::IpcError;
use thiserror::Error;

/// Errors surfaced through [`crate::ChannelEvent::Error`].
///
/// Cloneable so they can be handed to the consumer by value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    /// A process-level IO failure (waiting on the child, broken pipe)
    #[error("Worker IO error: {0}")]
    IoError(String),

    /// Framing or decoding failure on the control channel
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// Delivering a signal to the worker failed
    #[error("Failed to signal worker: {0}")]
    SignalError(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::IoError(err.to_string())
    }
}
