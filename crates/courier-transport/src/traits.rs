//! Transport abstraction traits for Courier.
//!
//! The protocol engine never touches sockets. It addresses connections by
//! id through [`Outbound`], which keeps the engine testable without a
//! network.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No open connection with this id.
    #[error("Connection {0} no longer open")]
    NotFound(ConnectionId),

    /// Unterminated frame grew past the configured limit.
    #[error("Frame size {0} exceeds maximum")]
    FrameTooLarge(usize),

    /// A read or write deadline expired.
    #[error("Timed out")]
    Timeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Id-addressed writes to open connections.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Write raw bytes to a connection.
    ///
    /// Writes to the same connection are serialized; bytes of two writes
    /// never interleave.
    async fn write(&self, id: &ConnectionId, data: Bytes) -> Result<(), TransportError>;

    /// Close a connection after the configured shutdown delay.
    ///
    /// Returns once the close is scheduled, not once it happened.
    async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError>;
}
