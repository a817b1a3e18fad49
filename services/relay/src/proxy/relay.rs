//! Bidirectional relay between a client and its downstream.
//!
//! One outbound connection per session. The header region goes out first,
//! followed by whatever the client keeps sending; the downstream's bytes are
//! copied back untouched. Each direction runs in its own task so a request
//! body still in flight never holds back the response.
//!
//! The relay is done only when both directions have ended on their own,
//! by end-of-stream or error. An error in one direction is recorded and
//! does not cut the other one short. No retries, no timeouts.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Direction, SessionError};

use super::scanner::HeaderRegion;

/// How one copy direction ended.
#[derive(Debug)]
pub struct DirectionOutcome {
    /// Bytes written to the destination of this direction.
    pub bytes: u64,
    /// Set when the direction ended with an error instead of end-of-stream.
    pub error: Option<SessionError>,
}

/// Result of a finished relay.
#[derive(Debug)]
pub struct RelayReport {
    pub to_downstream: DirectionOutcome,
    pub from_downstream: DirectionOutcome,
}

impl RelayReport {
    /// True when both directions ended with end-of-stream.
    pub fn is_clean(&self) -> bool {
        self.to_downstream.error.is_none() && self.from_downstream.error.is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &SessionError> {
        self.to_downstream
            .error
            .iter()
            .chain(self.from_downstream.error.iter())
    }
}

/// Dial `downstream_addr` and relay until both directions are finished.
///
/// `client_reader` must be positioned right after the header region; bytes
/// it has already buffered are forwarded before anything read later.
///
/// Fails only if the outbound connection cannot be opened, in which case
/// nothing has been sent anywhere. Mid-relay errors are in the report.
pub async fn relay<R, W>(
    header: HeaderRegion,
    client_reader: R,
    client_writer: W,
    downstream_addr: &str,
) -> Result<RelayReport, SessionError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let downstream = TcpStream::connect(downstream_addr)
        .await
        .map_err(|source| SessionError::DownstreamDialFailed {
            addr: downstream_addr.to_string(),
            source,
        })?;

    debug!(downstream_addr = %downstream_addr, "Connected to downstream");

    let (downstream_reader, downstream_writer) = downstream.into_split();

    let to_downstream = tokio::spawn(pump(
        header.into_bytes(),
        client_reader,
        downstream_writer,
        Direction::ToDownstream,
    ));
    let from_downstream = tokio::spawn(pump(
        Bytes::new(),
        downstream_reader,
        client_writer,
        Direction::FromDownstream,
    ));

    // Both halves of the downstream socket are owned by the tasks, so the
    // connection is released only once both have finished.
    let (to_downstream, from_downstream) = tokio::join!(to_downstream, from_downstream);

    Ok(RelayReport {
        to_downstream: joined(to_downstream, Direction::ToDownstream),
        from_downstream: joined(from_downstream, Direction::FromDownstream),
    })
}

/// Write `preamble`, then copy `reader` into `writer` until end-of-stream,
/// then half-close `writer` so its peer sees end-of-stream too.
async fn pump<R, W>(
    preamble: Bytes,
    mut reader: R,
    mut writer: W,
    direction: Direction,
) -> DirectionOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;

    let result: io::Result<()> = async {
        if !preamble.is_empty() {
            writer.write_all(&preamble).await?;
            bytes += preamble.len() as u64;
        }
        bytes += tokio::io::copy(&mut reader, &mut writer).await?;
        writer.shutdown().await
    }
    .await;

    debug!(direction = %direction, bytes = bytes, ok = result.is_ok(), "Relay direction finished");

    DirectionOutcome {
        bytes,
        error: result
            .err()
            .map(|source| SessionError::RelayIo { direction, source }),
    }
}

fn joined(
    result: Result<DirectionOutcome, tokio::task::JoinError>,
    direction: Direction,
) -> DirectionOutcome {
    result.unwrap_or_else(|e| DirectionOutcome {
        bytes: 0,
        error: Some(SessionError::RelayIo {
            direction,
            source: io::Error::other(e),
        }),
    })
}
