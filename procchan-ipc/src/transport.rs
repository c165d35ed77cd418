//! IPC transport implementations
//!
//! Frames are JSON-encoded [`MessageEnvelope`]s terminated by a newline. The
//! reader and writer halves are separate types so that a host can drive them
//! from different tasks.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, WireMessage};

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send(&mut self, message: &WireMessage) -> Result<(), IpcError>;

    /// Receive a message from the other end; `None` once the peer hung up
    async fn receive(&mut self) -> Result<Option<WireMessage>, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Writing half: one envelope per line, flushed per frame
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a single frame and flush it
    pub async fn write_frame(&mut self, message: &WireMessage) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(message);
        let mut line = serde_json::to_vec(&envelope)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        line.push(b'\n');

        self.inner.write_all(&line).await?;
        self.inner.flush().await?;

        trace!("Wrote {} byte frame", line.len());
        Ok(())
    }

    /// Flush and shut the stream down
    pub async fn shutdown(&mut self) -> Result<(), IpcError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Reading half: buffers across calls so no partial line is lost
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: Vec::new(),
        }
    }

    /// Read the next frame; `Ok(None)` at end of stream.
    ///
    /// Blank lines are skipped. A malformed line, including one that is not
    /// UTF-8, yields an error but leaves the reader positioned at the
    /// following line.
    pub async fn read_frame(&mut self) -> Result<Option<WireMessage>, IpcError> {
        loop {
            self.line.clear();
            let read = self.inner.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                return Ok(None);
            }

            let text = std::str::from_utf8(&self.line).map_err(|e| {
                IpcError::DeserializationError(format!("Frame is not valid UTF-8: {}", e))
            })?;

            let trimmed = text.trim_end();
            if trimmed.is_empty() {
                continue;
            }

            let envelope: MessageEnvelope<WireMessage> = serde_json::from_str(trimmed)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

            return envelope.into_message().map(Some);
        }
    }
}

/// Duplex transport built from a reader and a writer
pub struct LineTransport<R, W> {
    reader: FrameReader<R>,
    writer: Option<FrameWriter<W>>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a new transport over the given halves
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: Some(FrameWriter::new(writer)),
        }
    }
}

/// Stdin/Stdout IPC transport, used on the worker side
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    /// Create a new stdio transport
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> IpcTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &WireMessage) -> Result<(), IpcError> {
        let writer = self.writer.as_mut().ok_or(IpcError::ConnectionClosed)?;
        writer.write_frame(message).await
    }

    async fn receive(&mut self) -> Result<Option<WireMessage>, IpcError> {
        self.reader.read_frame().await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}
