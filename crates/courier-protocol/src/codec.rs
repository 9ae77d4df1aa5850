//! Text codec for Courier frames.
//!
//! ```text
//! COMMAND\n
//! key:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Parsing works on one complete frame at a time; splitting the byte stream
//! into frames is the connection layer's job.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::{header, Command, Frame, Headers};

/// The frame terminator.
pub const NULL: u8 = 0;

/// Line separator.
pub const NEWLINE: u8 = b'\n';

/// Protocol errors that can occur while parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer than the three lines every frame needs.
    #[error("Invalid frame, too few newlines")]
    TooFewLines,

    /// Command line is not a known command.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Header line without a colon, or not valid UTF-8.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Header block ran to the end of the input without a blank line.
    #[error("Unterminated header block")]
    UnterminatedHeaders,

    /// `content-length` is not an integer.
    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    /// Body shorter than `content-length` announced.
    #[error("Incomplete frame: expected {expected} body bytes, got {actual}")]
    Incomplete {
        /// Announced body length.
        expected: usize,
        /// Bytes available before the terminator.
        actual: usize,
    },

    /// Body not followed by the null terminator.
    #[error("Termination error")]
    Termination,
}

/// Parse one frame.
///
/// `data` must hold the whole frame including its null terminator.
///
/// # Errors
///
/// Returns an error if the command is unknown, a header is malformed, or the
/// body does not match its termination rule.
pub fn parse(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.iter().filter(|&&b| b == NEWLINE).count() < 2 {
        return Err(ProtocolError::TooFewLines);
    }

    let (command_line, mut rest) = split_line(data);
    let command = std::str::from_utf8(command_line)
        .ok()
        .and_then(|s| s.parse::<Command>().ok())
        .ok_or_else(|| {
            ProtocolError::InvalidCommand(String::from_utf8_lossy(command_line).into_owned())
        })?;

    let mut headers = Headers::new();
    let body = loop {
        let Some(rest_bytes) = rest else {
            return Err(ProtocolError::UnterminatedHeaders);
        };
        let (line, next) = split_line(rest_bytes);
        if line.is_empty() {
            break next.unwrap_or_default();
        }
        let (key, value) = parse_header(line)?;
        headers.insert_if_absent(key, value);
        rest = next;
    };

    let content_length = match headers.get(header::CONTENT_LENGTH) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?,
        ),
        None => None,
    };

    let body = match content_length.and_then(|n| usize::try_from(n).ok()) {
        Some(len) => {
            if body.len() < len + 1 {
                return Err(ProtocolError::Incomplete {
                    expected: len,
                    actual: body.len().saturating_sub(1),
                });
            }
            if body[len] != NULL {
                return Err(ProtocolError::Termination);
            }
            &body[..len]
        }
        None => {
            let end = body
                .iter()
                .position(|&b| b == NULL)
                .ok_or(ProtocolError::Termination)?;
            &body[..end]
        }
    };

    Ok(Frame {
        command,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

/// Split off the first line. The second half is `None` when there is no
/// newline left.
fn split_line(data: &[u8]) -> (&[u8], Option<&[u8]>) {
    match data.iter().position(|&b| b == NEWLINE) {
        Some(i) => (&data[..i], Some(&data[i + 1..])),
        None => (data, None),
    }
}

fn parse_header(line: &[u8]) -> Result<(&str, &str), ProtocolError> {
    let malformed = || ProtocolError::MalformedHeader(String::from_utf8_lossy(line).into_owned());
    let text = std::str::from_utf8(line).map_err(|_| malformed())?;
    text.split_once(':').ok_or_else(malformed)
}

/// Serialize a frame, terminator included.
#[must_use]
pub fn serialize(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(frame));
    encode_into(frame, &mut buf);
    buf.freeze()
}

/// Serialize a frame into an existing buffer.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) {
    buf.reserve(encoded_len(frame));
    buf.put_slice(frame.command.as_str().as_bytes());
    buf.put_u8(NEWLINE);
    for (key, value) in frame.headers.iter() {
        buf.put_slice(key.as_bytes());
        buf.put_u8(b':');
        buf.put_slice(value.as_bytes());
        buf.put_u8(NEWLINE);
    }
    buf.put_u8(NEWLINE);
    buf.put_slice(&frame.body);
    buf.put_u8(NULL);
}

fn encoded_len(frame: &Frame) -> usize {
    let headers: usize = frame.headers.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
    frame.command.as_str().len() + 1 + headers + 1 + frame.body.len() + 1
}
