//! Protocol versioning for Courier.
//!
//! The broker speaks exactly one dialect; negotiation only checks that the
//! client is willing to speak it.

use std::fmt;
use std::str::FromStr;

/// The protocol version this broker speaks.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 2 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.trim().split_once('.').ok_or(())?;
        Ok(Version::new(
            major.parse().map_err(|_| ())?,
            minor.parse().map_err(|_| ())?,
        ))
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

/// Pick a version from an `accept-version` header value.
///
/// Returns `None` when the client does not list the supported version.
#[must_use]
pub fn negotiate(accept_version: &str) -> Option<Version> {
    accept_version
        .split(',')
        .filter_map(|v| v.parse::<Version>().ok())
        .find(|v| *v == PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display() {
        assert_eq!(PROTOCOL_VERSION.to_string(), "1.2");
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("1.1".parse::<Version>(), Ok(Version::new(1, 1)));
        assert_eq!(" 1.2 ".parse::<Version>(), Ok(Version::new(1, 2)));
        assert!("1".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(negotiate("1.2"), Some(PROTOCOL_VERSION));
        assert_eq!(negotiate("1.0,1.1,1.2"), Some(PROTOCOL_VERSION));
        assert_eq!(negotiate("1.0,1.1"), None);
        assert_eq!(negotiate(""), None);
    }
}
