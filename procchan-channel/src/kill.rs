//! Forced termination of a worker that ignored the terminate directive

use tokio::process::Child;

use crate::error::ChannelError;

/// Interrupt the worker (SIGINT on Unix).
///
/// A child that has already been reaped has no pid and is left alone.
#[cfg(unix)]
pub(crate) fn interrupt(child: &mut Child) -> Result<(), ChannelError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(id) = child.id() else {
        return Ok(());
    };

    signal::kill(Pid::from_raw(id as i32), Signal::SIGINT)
        .map_err(|e| ChannelError::SignalError(format!("SIGINT to {}: {}", id, e)))
}

/// Windows has no interrupt signal for arbitrary processes; terminate instead.
#[cfg(not(unix))]
pub(crate) fn interrupt(child: &mut Child) -> Result<(), ChannelError> {
    child
        .start_kill()
        .map_err(|e| ChannelError::SignalError(e.to_string()))
}

/// Kill the worker outright
pub(crate) fn kill(child: &mut Child) -> Result<(), ChannelError> {
    match child.start_kill() {
        Ok(()) => Ok(()),
        // Already exited and reaped
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(e) => Err(ChannelError::SignalError(e.to_string())),
    }
}
