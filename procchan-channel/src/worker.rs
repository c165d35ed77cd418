//! Worker side of the channel
//!
//! A worker binary reads frames from stdin, hands each decoded payload to a
//! [`PayloadHandler`], writes replies back to stdout and leaves the loop when
//! the host sends the terminate directive or closes stdin.

use async_trait::async_trait;
use bytes::Bytes;
use procchan_ipc::{IpcError, IpcTransport, WireMessage};
use tracing::{debug, info, warn};

/// Application logic running inside a worker
#[async_trait]
pub trait PayloadHandler: Send {
    /// Handle one payload from the host; `Some` is sent back as a reply
    async fn handle(&mut self, payload: Bytes) -> Option<Bytes>;

    /// Whether to honour the terminate directive. Workers that return `false`
    /// keep running until the host interrupts them.
    fn accept_terminate(&mut self) -> bool {
        true
    }

    /// Checked after every payload; `true` ends the loop
    fn finished(&self) -> bool {
        false
    }
}

/// Why the worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The host sent the terminate directive
    Terminated,
    /// The host closed the control channel
    Disconnected,
    /// The handler reported it was done
    Finished,
}

/// Run the worker loop over `transport` until terminated or disconnected
pub async fn run_worker<T, H>(transport: &mut T, handler: &mut H) -> Result<WorkerExit, IpcError>
where
    T: IpcTransport + ?Sized,
    H: PayloadHandler + ?Sized,
{
    loop {
        let message = match transport.receive().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Control channel closed, shutting down");
                return Ok(WorkerExit::Disconnected);
            }
            Err(e) if e.is_transport_failure() => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable frame: {}", e);
                continue;
            }
        };

        let payload = match message {
            WireMessage::Terminate => {
                if handler.accept_terminate() {
                    info!("Received terminate directive");
                    return Ok(WorkerExit::Terminated);
                }
                debug!("Ignoring terminate directive");
                continue;
            }
            data => match data.decode_payload() {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping undecodable payload: {}", e);
                    continue;
                }
            },
        };

        if let Some(reply) = handler.handle(payload).await {
            transport.send(&WireMessage::data(&reply)).await?;
        }

        if handler.finished() {
            return Ok(WorkerExit::Finished);
        }
    }
}
