//! Remote peer address.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Endpoint
// ============================================================================

/// Immutable `{host, port}` identity of the peer a pool targets.
///
/// The host is kept unresolved; resolution happens on every dial so a
/// changed DNS record is picked up by replacement connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host name or address literal.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parses `host:port` or `[v6-addr]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("Endpoint '{s}' is missing a port")))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(Error::config(format!("Endpoint '{s}' is missing a host")));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| Error::config(format!("Endpoint '{s}' has invalid port: {e}")))?;

        Ok(Self::new(host, port))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let ep: Endpoint = "localhost:9000".parse().expect("parse");
        assert_eq!(ep.host(), "localhost");
        assert_eq!(ep.port(), 9000);
        assert_eq!(ep.to_string(), "localhost:9000");
    }

    #[test]
    fn test_parse_ipv6() {
        let ep: Endpoint = "[::1]:7000".parse().expect("parse");
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "[::1]:7000");
    }

    #[test]
    fn test_parse_errors() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }
}
