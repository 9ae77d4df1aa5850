//! Null-byte stream framing.
//!
//! Splits an inbound byte stream into frame tokens on the null terminator.
//! The heartbeat variant also yields a bare newline between frames as its
//! own token.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::traits::TransportError;

/// Default cap on an unterminated token (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Frame bytes, without the null terminator.
    Frame(Bytes),
    /// A bare newline between frames.
    Heartbeat,
}

/// Null-terminated framing codec.
#[derive(Debug, Clone)]
pub struct NullTermCodec {
    heartbeats: bool,
    max_frame_size: usize,
}

impl NullTermCodec {
    /// Frame on null bytes only.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            heartbeats: false,
            max_frame_size,
        }
    }

    /// Frame on null bytes and report newlines between frames as heartbeats.
    #[must_use]
    pub fn with_heartbeats(max_frame_size: usize) -> Self {
        Self {
            heartbeats: true,
            max_frame_size,
        }
    }
}

impl Default for NullTermCodec {
    fn default() -> Self {
        Self::with_heartbeats(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for NullTermCodec {
    type Item = Token;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Token>, TransportError> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.heartbeats && src[0] == b'\n' {
            src.advance(1);
            return Ok(Some(Token::Heartbeat));
        }

        match src.iter().position(|&b| b == 0) {
            Some(end) => {
                let token = src.split_to(end).freeze();
                src.advance(1);
                Ok(Some(Token::Frame(token)))
            }
            None if src.len() > self.max_frame_size => Err(TransportError::FrameTooLarge(src.len())),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Token>, TransportError> {
        if let Some(token) = self.decode(src)? {
            return Ok(Some(token));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated tail: hand it on so the parser can report what it was
        Ok(Some(Token::Frame(src.split().freeze())))
    }
}

impl Encoder<Bytes> for NullTermCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), TransportError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
