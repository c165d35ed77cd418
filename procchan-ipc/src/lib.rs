//! Inter-process communication for procchan
//!
//! This crate provides the wire protocol spoken between a host process and its
//! workers: a tagged envelope that separates control directives from data, a
//! base64 codec that keeps opaque binary payloads text-safe, and line-delimited
//! JSON framing over any async byte stream (usually the child's stdio).

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{MessageEnvelope, WireMessage, IPC_PROTOCOL_VERSION};
pub use transport::{FrameReader, FrameWriter, IpcTransport, LineTransport, StdioTransport};
