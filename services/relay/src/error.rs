//! Error types for the relay.
//!
//! Every [`SessionError`] is scoped to one connection: it ends that session
//! and nothing else. [`RouteSourceError`] is scoped to one reload attempt:
//! the previous routing table stays authoritative.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Direction of a relay copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to downstream (header + request stream).
    ToDownstream,
    /// Downstream to client (response stream).
    FromDownstream,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToDownstream => "to_downstream",
            Direction::FromDownstream => "from_downstream",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-scoped errors with standardized reason codes.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No blank line within the configured header bound.
    #[error("header_too_large: no blank line within {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// Client closed the stream before the header was complete.
    #[error("connection_closed: stream ended after {received} header bytes")]
    ConnectionClosed { received: usize },

    /// Reading the header failed.
    #[error("header_read_failed: {0}")]
    HeaderReadFailed(#[source] io::Error),

    /// Header region has no `Host: ` line.
    #[error("host_header_missing")]
    HostHeaderMissing,

    /// No routing entry for the extracted host.
    #[error("host_unknown: {host}")]
    HostUnknown { host: String },

    /// Could not open the outbound connection.
    #[error("downstream_dial_failed: {addr}: {source}")]
    DownstreamDialFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A relay copy direction failed.
    #[error("relay_io: {direction}: {source}")]
    RelayIo {
        direction: Direction,
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SessionError::HeaderTooLarge { .. } => "header_too_large",
            SessionError::ConnectionClosed { .. } => "connection_closed",
            SessionError::HeaderReadFailed(_) => "header_read_failed",
            SessionError::HostHeaderMissing => "host_header_missing",
            SessionError::HostUnknown { .. } => "host_unknown",
            SessionError::DownstreamDialFailed { .. } => "downstream_dial_failed",
            SessionError::RelayIo { .. } => "relay_io",
        }
    }
}

/// Errors produced while fetching routing entries from a source.
#[derive(Debug, Error)]
pub enum RouteSourceError {
    /// Routes file exists but could not be read.
    #[error("failed to read routes file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Routes file is not valid TOML or does not match the schema.
    #[error("failed to parse routes file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Two servers declare the same host.
    #[error("host '{host}' is declared by both '{first}' and '{second}'")]
    DuplicateHost {
        host: String,
        first: String,
        second: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_match_display_prefix() {
        let errors = vec![
            SessionError::HeaderTooLarge { limit: 16 },
            SessionError::ConnectionClosed { received: 3 },
            SessionError::HeaderReadFailed(io::Error::from(io::ErrorKind::ConnectionReset)),
            SessionError::HostHeaderMissing,
            SessionError::HostUnknown {
                host: "a.example".to_string(),
            },
            SessionError::DownstreamDialFailed {
                addr: "127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
            SessionError::RelayIo {
                direction: Direction::FromDownstream,
                source: io::Error::from(io::ErrorKind::BrokenPipe),
            },
        ];

        for err in errors {
            assert!(
                err.to_string().starts_with(err.reason_code()),
                "{} should start with {}",
                err,
                err.reason_code()
            );
        }
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::ToDownstream.to_string(), "to_downstream");
        assert_eq!(Direction::FromDownstream.to_string(), "from_downstream");
    }
}
