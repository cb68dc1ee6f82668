//! Byte-stream transport abstraction.
//!
//! Defines the `Transport` trait the command channel talks through,
//! allowing a serial backend in production and an in-memory fake in tests.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open transport: {0}")]
    OpenFailed(String),

    #[error("Transport is not open")]
    NotOpen,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unframed byte stream to the target.
///
/// `read` returns whatever arrived within the transport's own silence
/// window; it never blocks indefinitely.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Write raw bytes, returning how many were written.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    fn is_open(&self) -> bool;
}
