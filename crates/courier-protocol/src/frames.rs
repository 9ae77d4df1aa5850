//! Frame types for the Courier protocol.
//!
//! A frame is a command line, a block of `key:value` headers, a blank line
//! and a body terminated by a single null byte.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Well-known header names.
pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CREATE: &str = "create";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const TRANSACTION: &str = "transaction";
    pub const VERSION: &str = "version";
}

/// Frame commands.
///
/// The set is closed: anything else on the command line is a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Every command, in declaration order.
    pub const ALL: [Command; 15] = [
        Command::Connect,
        Command::Stomp,
        Command::Connected,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Ack,
        Command::Nack,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Disconnect,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ];

    /// The command as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Frame headers.
///
/// Insertion order is kept so serialized output is stable, but equality
/// ignores order.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Check whether a header is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Add a header unless the key is already present.
    ///
    /// Returns `false` if the key existed; the existing value is kept.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    /// Set a header, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Headers {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for Headers {}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert_if_absent(k, v);
        }
        headers
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Frame headers.
    pub headers: Headers,
    /// Frame body, without the null terminator.
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header, replacing any existing value.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Create a CONNECTED frame.
    ///
    /// `heartbeat_ms` is the interval at which the server expects to hear
    /// from the client; the server itself never sends heartbeats.
    #[must_use]
    pub fn connected(version: impl Into<String>, host: impl Into<String>, heartbeat_ms: u64) -> Self {
        Frame::new(Command::Connected)
            .with_header(header::VERSION, version)
            .with_header(header::HOST, host)
            .with_header(header::HEART_BEAT, format!("0,{heartbeat_ms}"))
    }

    /// Create a RECEIPT frame.
    #[must_use]
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        Frame::new(Command::Receipt).with_header(header::RECEIPT_ID, receipt_id)
    }

    /// Create an ERROR frame that quotes the offending frame in its body.
    ///
    /// Trailing null bytes of `original` are dropped so the quote cannot
    /// terminate the ERROR frame early.
    #[must_use]
    pub fn error(message: impl Into<String>, original: &[u8]) -> Self {
        let end = original
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let body = format!("Original frame: {}", String::from_utf8_lossy(&original[..end]));
        Frame::new(Command::Error)
            .with_header(header::MESSAGE, message)
            .with_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        for command in Command::ALL {
            assert_eq!(command.as_str().parse::<Command>(), Ok(command));
        }
        assert!("BOOGIE".parse::<Command>().is_err());
        assert!("send".parse::<Command>().is_err());
    }

    #[test]
    fn test_headers_first_wins() {
        let headers: Headers = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("a"), Some("1"));
    }

    #[test]
    fn test_headers_set_replaces() {
        let mut headers = Headers::new();
        headers.set("subscription", "1");
        headers.set("subscription", "2");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("subscription"), Some("2"));
        assert_eq!(headers.remove("subscription"), Some("2".to_string()));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_equality_ignores_order() {
        let a: Headers = [("x", "1"), ("y", "2")].into_iter().collect();
        let b: Headers = [("y", "2"), ("x", "1")].into_iter().collect();
        let c: Headers = [("y", "2"), ("x", "9")].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_connected_frame() {
        let frame = Frame::connected("1.2", "localhost", 30000);
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.header(header::HEART_BEAT), Some("0,30000"));
        let headers: Vec<_> = frame.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(headers, vec!["version", "host", "heart-beat"]);
    }

    #[test]
    fn test_error_frame_quotes_original() {
        let frame = Frame::error("Invalid command", b"BOOGIE\n\n\0");
        assert_eq!(frame.header(header::MESSAGE), Some("Invalid command"));
        assert_eq!(&frame.body[..], b"Original frame: BOOGIE\n\n");
    }
}
