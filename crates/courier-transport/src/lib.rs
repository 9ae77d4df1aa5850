//! # courier-transport
//!
//! Connection layer for the Courier message broker.
//!
//! The [`ConnectionManager`] accepts TCP clients, reads null-terminated
//! frames off each socket and reports everything that happens as a
//! [`ConnectionEvent`] on one channel. Writes go the other way through the
//! [`Outbound`] trait, addressed by [`ConnectionId`].
//!
//! ```rust,ignore
//! use courier_transport::{ConnectionEvent, ConnectionManager, Outbound, TcpConfig};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//! let manager = ConnectionManager::bind(TcpConfig::default(), tx).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let ConnectionEvent::Frame { id, data } = event {
//!         manager.write(&id, data).await?;
//!     }
//! }
//! ```

pub mod event;
pub mod framer;
pub mod tcp;
pub mod traits;

pub use event::ConnectionEvent;
pub use framer::{NullTermCodec, Token, DEFAULT_MAX_FRAME_SIZE};
pub use tcp::{ConnectionManager, TcpConfig, READ_GRACE};
pub use traits::{ConnectionId, Outbound, TransportError};
