//! Events the connection layer reports to the engine.

use bytes::Bytes;

use crate::traits::ConnectionId;

/// Lifecycle and data events, delivered over one channel in the order they
/// happened for any single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A client connected.
    NewConnection(ConnectionId),
    /// A client sent one frame. `data` ends with the null terminator.
    Frame {
        /// Sending connection.
        id: ConnectionId,
        /// Raw frame bytes.
        data: Bytes,
    },
    /// A connection went away and was removed from the connection table.
    ConnectionClosed(ConnectionId),
}

impl ConnectionEvent {
    /// The connection the event is about.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            ConnectionEvent::NewConnection(id)
            | ConnectionEvent::Frame { id, .. }
            | ConnectionEvent::ConnectionClosed(id) => id,
        }
    }
}
