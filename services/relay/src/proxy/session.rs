//! Per-connection session.
//!
//! A session owns one accepted client connection and drives it through
//!
//! ```text
//! Accepted -> ScanningHeader -> Routing -> Relaying -> Closed
//!     \______________\______________\__________________^
//!                   (any failure before Relaying)
//! ```
//!
//! Cleanup happens in one place whichever way the session ends: the client
//! socket is owned by the session and dropped once, and the registry entry
//! is held by a guard and removed once.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::debug;
use ulid::Ulid;

use crate::error::SessionError;

use super::host::extract_host;
use super::registry::{SessionInfo, SessionRegistry};
use super::relay::{relay, RelayReport};
use super::router::RoutingTable;
use super::scanner::HeaderScanner;

/// Unique session identifier, rendered as `sess_{ulid}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(Ulid);

impl SessionId {
    /// The prefix for session IDs.
    pub const PREFIX: &'static str = "sess";

    /// Creates a new ID with a fresh ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for SessionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, ulid)) = s.split_once('_') else {
            return Err(format!("session id missing separator: '{s}'"));
        };
        if prefix != Self::PREFIX {
            return Err(format!(
                "invalid session id prefix: expected '{}', got '{prefix}'",
                Self::PREFIX
            ));
        }
        ulid.parse::<Ulid>()
            .map(Self)
            .map_err(|e| format!("invalid session id ULID: {e}"))
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    ScanningHeader,
    Routing,
    Relaying,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Accepted => "accepted",
            SessionState::ScanningHeader => "scanning_header",
            SessionState::Routing => "routing",
            SessionState::Relaying => "relaying",
            SessionState::Closed => "closed",
        }
    }
}

/// Collaborators a session needs, shared by every session of a listener.
#[derive(Clone)]
pub struct SessionContext {
    pub scanner: HeaderScanner,
    pub routing_table: Arc<RoutingTable>,
    pub registry: Arc<SessionRegistry>,
}

/// How a session ended without a session error.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Host the session was routed by.
    pub host: String,
    /// Downstream address that was dialed.
    pub downstream_addr: String,
    /// Routing table generation the lookup was made against.
    pub generation: u64,
    pub report: RelayReport,
}

/// One accepted client connection.
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    created_at: SystemTime,
    client: TcpStream,
}

impl Session {
    pub fn new(client: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            id: SessionId::new(),
            peer_addr,
            created_at: SystemTime::now(),
            client,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Run the session to completion.
    ///
    /// Consumes the session: when this returns, the client connection has
    /// been closed and the session is no longer registered.
    pub async fn run(self, ctx: &SessionContext) -> Result<SessionOutcome, SessionError> {
        let Session {
            id,
            peer_addr,
            created_at,
            client,
        } = self;

        let _registration = ctx.registry.register(SessionInfo {
            id,
            peer_addr,
            created_at,
        });

        let mut lifecycle = Lifecycle::default();
        let result = drive(client, ctx, &mut lifecycle).await;
        lifecycle.enter(SessionState::Closed);
        result
    }
}

/// Tracks and logs state transitions of one session.
#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: SessionState::Accepted,
        }
    }
}

impl Lifecycle {
    fn enter(&mut self, next: SessionState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "Session state");
        self.state = next;
    }
}

async fn drive(
    client: TcpStream,
    ctx: &SessionContext,
    lifecycle: &mut Lifecycle,
) -> Result<SessionOutcome, SessionError> {
    let (client_reader, client_writer) = client.into_split();
    let mut client_reader = BufReader::new(client_reader);

    lifecycle.enter(SessionState::ScanningHeader);
    let header = ctx.scanner.scan(&mut client_reader).await?;
    debug!(header_bytes = header.len(), "Header region scanned");

    lifecycle.enter(SessionState::Routing);
    let route = extract_host(&header)?;

    // The table is consulted once, here; a reload after this point does not
    // affect this session.
    let snapshot = ctx.routing_table.snapshot();
    let entry = snapshot
        .lookup(&route.host)
        .ok_or_else(|| SessionError::HostUnknown {
            host: route.host.clone(),
        })?;
    debug!(
        host = %route.host,
        downstream_addr = %entry.downstream_addr(),
        generation = snapshot.generation(),
        "Route matched"
    );

    lifecycle.enter(SessionState::Relaying);
    let report = relay(header, client_reader, client_writer, entry.downstream_addr()).await?;

    Ok(SessionOutcome {
        host: route.host,
        downstream_addr: entry.downstream_addr().to_string(),
        generation: snapshot.generation(),
        report,
    })
}
