//! # courier-protocol
//!
//! Wire protocol definitions for the Courier message broker.
//!
//! Courier speaks a text, null-terminated, STOMP-style protocol. This crate
//! defines the frame model, the text codec and version negotiation. It does
//! no I/O.
//!
//! ## Commands
//!
//! - `CONNECT` / `STOMP` / `CONNECTED` - Session handshake
//! - `SUBSCRIBE` / `UNSUBSCRIBE` - Destination membership
//! - `SEND` / `MESSAGE` - Publishing and delivery
//! - `BEGIN` / `COMMIT` / `ABORT` - Client-side transactions
//! - `RECEIPT` / `ERROR` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Command, Frame};
//!
//! let frame = Frame::new(Command::Send)
//!     .with_header("destination", "/queue/a")
//!     .with_body("hello");
//!
//! let encoded = codec::serialize(&frame);
//! let decoded = codec::parse(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{parse, serialize, ProtocolError};
pub use frames::{header, Command, Frame, Headers};
pub use version::{negotiate, Version, PROTOCOL_VERSION};
