//! IPC protocol definitions and message types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::IpcError;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// A single message on the control channel, in either direction.
///
/// Control directives and data live in separate variants, so no payload value
/// can ever be mistaken for a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Opaque payload, base64 encoded
    Data { payload: String },

    /// Ask the worker to exit voluntarily
    Terminate,
}

impl WireMessage {
    /// Wrap raw bytes in a data message
    pub fn data(payload: &[u8]) -> Self {
        WireMessage::Data {
            payload: codec::encode(payload),
        }
    }

    /// Whether this is a control directive rather than data
    pub fn is_control(&self) -> bool {
        matches!(self, WireMessage::Terminate)
    }

    /// Decode the carried payload; `None` for control directives
    pub fn decode_payload(&self) -> Result<Option<Bytes>, IpcError> {
        match self {
            WireMessage::Data { payload } => codec::decode(payload).map(Some),
            WireMessage::Terminate => Ok(None),
        }
    }
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }

    /// Unwrap the message, rejecting envelopes from another protocol version
    pub fn into_message(self) -> Result<T, IpcError> {
        if !self.is_compatible() {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: self.protocol_version,
            });
        }
        Ok(self.message)
    }
}
