//! Child stdio plumbing: the writer and reader tasks behind a channel

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use procchan_ipc::{FrameReader, FrameWriter, IpcError, WireMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::queue::FrameSink;

/// Outcome of one data frame write, reported back to the driver
pub(crate) type WriteCompletion = Result<(), IpcError>;

/// Inbound payload or the reason one could not be read
pub(crate) type InboundFrame = Result<Bytes, IpcError>;

struct OutboundFrame {
    message: WireMessage,
    /// Data frames report a completion; control frames do not
    notify: bool,
}

/// Driver-side handle to the writer task.
///
/// Writes never block: frames are queued to the writer task and the number of
/// frames not yet flushed decides whether the transport counts as saturated.
pub(crate) struct StdinSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    in_flight: Arc<AtomicUsize>,
    high_water_mark: usize,
}

impl StdinSink {
    /// Send a control directive, bypassing backpressure accounting
    pub(crate) fn write_control(&mut self, message: WireMessage) -> bool {
        self.tx
            .send(OutboundFrame {
                message,
                notify: false,
            })
            .is_ok()
    }
}

impl FrameSink for StdinSink {
    fn write(&mut self, message: WireMessage) -> bool {
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

        if self
            .tx
            .send(OutboundFrame {
                message,
                notify: true,
            })
            .is_err()
        {
            // Writer is gone; the exit or error that killed it is reported separately
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            debug!("Dropping frame for closed worker stdin");
            return false;
        }

        depth < self.high_water_mark
    }
}

/// Spawn the writer task over the child's stdin
pub(crate) fn spawn_writer<W>(
    label: String,
    stdin: W,
    high_water_mark: usize,
    completions: mpsc::UnboundedSender<WriteCompletion>,
) -> StdinSink
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(AtomicUsize::new(0));

    tokio::spawn(write_frames(
        label,
        FrameWriter::new(stdin),
        rx,
        completions,
        in_flight.clone(),
    ));

    StdinSink {
        tx,
        in_flight,
        high_water_mark,
    }
}

async fn write_frames<W>(
    label: String,
    mut writer: FrameWriter<W>,
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    completions: mpsc::UnboundedSender<WriteCompletion>,
    in_flight: Arc<AtomicUsize>,
) where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(frame) = rx.recv().await {
        let result = writer.write_frame(&frame.message).await;

        if let Err(e) = &result {
            // During shutdown, a closed pipe is expected - don't log as error
            if matches!(e, IpcError::ConnectionClosed) {
                debug!("Worker {} stdin closed (worker likely terminated)", label);
            } else {
                error!("Failed to write to worker {} stdin: {}", label, e);
            }
        }

        let failed = result.is_err();
        if frame.notify {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let _ = completions.send(result);
        }

        if failed {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Worker {} stdin shutdown: {}", label, e);
    }
}

/// Spawn the reader task over the child's stdout
pub(crate) fn spawn_reader<R>(label: String, stdout: R) -> mpsc::UnboundedReceiver<InboundFrame>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_frames(label, FrameReader::new(stdout), tx));
    rx
}

async fn read_frames<R>(
    label: String,
    mut reader: FrameReader<R>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
) where
    R: AsyncRead + Unpin + Send,
{
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(message @ WireMessage::Data { .. })) => match message.decode_payload() {
                Ok(Some(payload)) => Ok(payload),
                Ok(None) => continue,
                Err(e) => Err(e),
            },
            Ok(Some(WireMessage::Terminate)) => {
                warn!("Worker {} sent a terminate directive upstream, ignoring", label);
                continue;
            }
            Ok(None) => {
                debug!("Worker {} stdout closed", label);
                break;
            }
            Err(e) if e.is_transport_failure() => {
                let _ = inbound.send(Err(e));
                break;
            }
            Err(e) => {
                warn!("Failed to parse message from worker {}: {}", label, e);
                Err(e)
            }
        };

        if inbound.send(frame).is_err() {
            break;
        }
    }
}
