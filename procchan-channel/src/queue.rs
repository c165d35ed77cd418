//! Outbound send queue with backpressure
//!
//! While the transport keeps up, payloads are written straight through. Once a
//! write reports saturation (or the throttle policy says so) the queue stops
//! writing and buffers payloads in order until a write completes successfully,
//! then replays the buffer through the same path.

use std::collections::VecDeque;

use bytes::Bytes;
use procchan_config::ThrottlePolicy;
use procchan_ipc::{IpcError, WireMessage};
use tracing::{debug, trace};

/// Something that accepts frames for delivery to the worker
pub trait FrameSink {
    /// Hand a frame to the transport.
    ///
    /// Returns `false` when the transport's buffer is saturated. The frame is
    /// still accepted either way.
    fn write(&mut self, message: WireMessage) -> bool;
}

/// Whether the queue currently writes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Flowing,
    Throttled,
}

/// FIFO send queue; owned by the channel driver, never shared
#[derive(Debug)]
pub struct SendQueue {
    accepting_writes: bool,
    pending: VecDeque<Bytes>,
    policy: ThrottlePolicy,
}

impl SendQueue {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            accepting_writes: true,
            pending: VecDeque::new(),
            policy,
        }
    }

    pub fn flow(&self) -> Flow {
        if self.accepting_writes {
            Flow::Flowing
        } else {
            Flow::Throttled
        }
    }

    /// Payloads waiting for the transport to drain
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write `payload` now, or queue it behind earlier payloads when throttled
    pub fn send<S: FrameSink + ?Sized>(&mut self, payload: Bytes, sink: &mut S) {
        if !self.accepting_writes {
            self.pending.push_back(payload);
            return;
        }

        let below_high_water = sink.write(WireMessage::data(&payload));

        if !below_high_water || self.policy == ThrottlePolicy::AlwaysAfterWrite {
            trace!("Send queue throttled");
            self.accepting_writes = false;
        }
    }

    /// Drop every queued payload, returning how many were dropped.
    ///
    /// Used when the worker is asked to terminate: nothing queued behind the
    /// directive will be read.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// React to a write completion reported by the transport.
    ///
    /// Failed writes are dropped here: a dead transport also shows up as a
    /// process error or exit, which is what the owner acts on.
    pub fn on_write_complete<S: FrameSink + ?Sized>(
        &mut self,
        result: Result<(), IpcError>,
        sink: &mut S,
    ) {
        if let Err(e) = result {
            debug!("Ignoring failed write to worker: {}", e);
            return;
        }

        self.accepting_writes = true;

        if self.pending.is_empty() {
            return;
        }

        // Replay through `send` so a saturated transport re-queues the tail in order
        let replay = std::mem::take(&mut self.pending);
        trace!("Replaying {} queued payloads", replay.len());
        for payload in replay {
            self.send(payload, sink);
        }
    }
}
