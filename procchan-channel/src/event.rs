//! Events delivered to the owner of a channel

use std::process::ExitStatus;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::ChannelError;

/// Receiving end of a channel's event stream
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Everything a worker channel reports, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A payload from the worker, decoded back to its original bytes
    Message(Bytes),

    /// A process-level or transport error; does not end the channel by itself
    Error(ChannelError),

    /// The worker process exited. Always the last event, and emitted once.
    Exit(ExitInfo),
}

/// How the worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal number, if killed by one (Unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Whether the worker exited cleanly with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}
