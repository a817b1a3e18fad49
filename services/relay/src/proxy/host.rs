//! Routing key extraction from a header region.
//!
//! This is deliberately not a header parser: the request line is skipped
//! without being interpreted, and the only line looked at is the first one
//! starting with the literal, case-sensitive prefix `Host: `.

use crate::error::SessionError;

use super::scanner::HeaderRegion;

/// The exact prefix of the routing header line.
pub const HOST_PREFIX: &[u8] = b"Host: ";

const LINE_SEPARATOR: &[u8] = b"\r\n";

/// Routing key extracted from one connection's header region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: String,
}

/// Extract the routing key from a header region.
///
/// The host is the remainder of the first `Host: ` line after the request
/// line, up to (not including) the line separator. No hostname validation
/// is performed.
pub fn extract_host(region: &HeaderRegion) -> Result<Route, SessionError> {
    lines(region.as_bytes())
        .skip(1)
        .find_map(|line| line.strip_prefix(HOST_PREFIX))
        .map(|value| Route {
            host: String::from_utf8_lossy(value).into_owned(),
        })
        .ok_or(SessionError::HostHeaderMissing)
}

/// Split on CR LF. A trailing fragment without a separator is yielded too.
fn lines(mut data: &[u8]) -> impl Iterator<Item = &[u8]> {
    std::iter::from_fn(move || {
        if data.is_empty() {
            return None;
        }
        match data
            .windows(LINE_SEPARATOR.len())
            .position(|w| w == LINE_SEPARATOR)
        {
            Some(pos) => {
                let line = &data[..pos];
                data = &data[pos + LINE_SEPARATOR.len()..];
                Some(line)
            }
            None => {
                let line = data;
                data = &[];
                Some(line)
            }
        }
    })
}
