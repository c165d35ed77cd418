//! Worker process channels for procchan
//!
//! A [`WorkerChannel`] spawns one out-of-process worker, moves opaque binary
//! payloads to and from it over the child's stdio, queues outbound payloads
//! while the transport is saturated, and shuts the worker down within a bounded
//! time even when it stops responding. The [`worker`] module is the matching
//! runtime for the child side.

pub mod channel;
pub mod error;
pub mod event;
pub mod launch;
pub mod queue;
pub mod worker;

mod kill;
mod pipe;

// Re-export main types
pub use channel::{ChannelState, WorkerChannel};
pub use error::ChannelError;
pub use event::{ChannelEvent, ChannelEvents, ExitInfo};
pub use launch::LaunchOptions;
pub use queue::{Flow, FrameSink, SendQueue};
pub use worker::{run_worker, PayloadHandler, WorkerExit};

// Configuration types callers need to build a channel
pub use procchan_config::{ChannelConfig, ThrottlePolicy};
