//! Host-routed TCP proxy implementation.
//!
//! This module provides:
//! - TCP listener management
//! - Header region scanning and host extraction
//! - The hot-swappable routing table
//! - Session lifecycle and registry
//! - Bidirectional relay to downstreams
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Session -> HeaderScanner -> extract_host -> RoutingTable
//!                          |                                            |
//!                   SessionRegistry                         relay <-> Downstream
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use vhost_relay::proxy::{Listener, ListenerConfig, RoutingTable, SessionRegistry};
//!
//! let routing_table = Arc::new(RoutingTable::new());
//! let registry = Arc::new(SessionRegistry::new());
//!
//! let config = ListenerConfig::new("127.0.0.1:8080".parse()?);
//! let listener = Listener::bind(config, routing_table, registry).await?;
//! Arc::new(listener).run().await?;
//! ```

mod host;
mod listener;
mod registry;
mod relay;
mod router;
mod scanner;
mod session;

pub use host::{extract_host, Route, HOST_PREFIX};
pub use listener::{Listener, ListenerConfig, ListenerStats};
pub use registry::{Registration, SessionInfo, SessionRegistry};
pub use relay::{relay, DirectionOutcome, RelayReport};
pub use router::{RouteSnapshot, RoutingEntry, RoutingTable, SharedRoutingTable};
pub use scanner::{HeaderBoundary, HeaderRegion, HeaderScanner, DEFAULT_MAX_HEADER_BYTES};
pub use session::{Session, SessionContext, SessionId, SessionOutcome, SessionState};
