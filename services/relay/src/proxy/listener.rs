//! TCP listener and connection handling.
//!
//! This module manages the listening socket, accepts connections, and runs
//! one session task per connection:
//! - Header region scanning
//! - Host extraction and routing table lookup
//! - Bidirectional relay to the downstream
//!
//! There is no connection limit and no timeout; a session lives as long as
//! its own I/O does.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};

use crate::error::SessionError;

use super::registry::SessionRegistry;
use super::router::RoutingTable;
use super::scanner::{HeaderScanner, DEFAULT_MAX_HEADER_BYTES};
use super::session::{Session, SessionContext, SessionOutcome};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Upper bound for a connection's header region.
    pub max_header_bytes: usize,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Header scan failures (too large, truncated, read error).
    pub header_failed: AtomicU64,
    /// Header regions without a `Host: ` line.
    pub host_missing: AtomicU64,
    /// Hosts with no routing entry.
    pub host_unknown: AtomicU64,
    /// Downstream dial failures.
    pub downstream_dial_failed: AtomicU64,
    /// Relays that ran to completion.
    pub relays_completed: AtomicU64,
    /// Relays with at least one failed direction.
    pub relays_with_errors: AtomicU64,
    /// Bytes relayed to downstreams, header regions included.
    pub bytes_to_downstream: AtomicU64,
    /// Bytes relayed back to clients.
    pub bytes_from_downstream: AtomicU64,
}

impl ListenerStats {
    fn record(&self, result: &Result<SessionOutcome, SessionError>) {
        let counter = match result {
            Ok(outcome) => {
                self.bytes_to_downstream
                    .fetch_add(outcome.report.to_downstream.bytes, Ordering::Relaxed);
                self.bytes_from_downstream
                    .fetch_add(outcome.report.from_downstream.bytes, Ordering::Relaxed);
                if !outcome.report.is_clean() {
                    self.relays_with_errors.fetch_add(1, Ordering::Relaxed);
                }
                &self.relays_completed
            }
            Err(
                SessionError::HeaderTooLarge { .. }
                | SessionError::ConnectionClosed { .. }
                | SessionError::HeaderReadFailed(_),
            ) => &self.header_failed,
            Err(SessionError::HostHeaderMissing) => &self.host_missing,
            Err(SessionError::HostUnknown { .. }) => &self.host_unknown,
            Err(SessionError::DownstreamDialFailed { .. }) => &self.downstream_dial_failed,
            Err(SessionError::RelayIo { .. }) => &self.relays_with_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A TCP listener for the host-routed proxy.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Collaborators handed to every session.
    ctx: SessionContext,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(
        config: ListenerConfig,
        routing_table: Arc<RoutingTable>,
        registry: Arc<SessionRegistry>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_header_bytes = config.max_header_bytes,
            "Listener bound"
        );

        Ok(Self {
            listener,
            ctx: SessionContext {
                scanner: HeaderScanner::new(config.max_header_bytes),
                routing_table,
                registry,
            },
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let session = Session::new(stream, peer_addr);
                    let span = tracing::info_span!(
                        "session",
                        session_id = %session.id(),
                        peer = %peer_addr
                    );
                    let listener = Arc::clone(&self);

                    tokio::spawn(
                        async move {
                            listener.handle_session(session).await;
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Run one session and account for how it ended.
    async fn handle_session(&self, session: Session) {
        let result = session.run(&self.ctx).await;
        self.stats.record(&result);

        match &result {
            Ok(outcome) => {
                for err in outcome.report.errors() {
                    warn!(
                        reason = err.reason_code(),
                        error = %err,
                        host = %outcome.host,
                        "Relay direction failed"
                    );
                }
                info!(
                    host = %outcome.host,
                    downstream_addr = %outcome.downstream_addr,
                    generation = outcome.generation,
                    bytes_to_downstream = outcome.report.to_downstream.bytes,
                    bytes_from_downstream = outcome.report.from_downstream.bytes,
                    "Relay finished"
                );
            }
            Err(err @ SessionError::ConnectionClosed { received: 0 }) => {
                // Port probes and health checks connect and leave.
                debug!(reason = err.reason_code(), "Client closed before sending");
            }
            Err(err) => {
                warn!(reason = err.reason_code(), error = %err, "Session failed");
            }
        }

        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}
