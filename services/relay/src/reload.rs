//! Routing table reload.
//!
//! The table is fed by a [`RouteSource`] and refreshed whenever a
//! [`ReloadSignal`] arrives. Nothing is assumed about where signals come
//! from or how often: none, one, or a burst are all fine, and a burst is
//! folded into a single reload.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::RouteSourceError;
use crate::proxy::{RoutingEntry, RoutingTable};

/// Provider of the current routing entries.
pub trait RouteSource: Send + Sync {
    /// Fetch a fresh, complete list of entries.
    fn current_entries(&self) -> Result<Vec<RoutingEntry>, RouteSourceError>;
}

/// Notification that the route source may have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal;

pub type ReloadSender = mpsc::UnboundedSender<ReloadSignal>;
pub type ReloadReceiver = mpsc::UnboundedReceiver<ReloadSignal>;

/// Create a reload signal channel.
pub fn reload_channel() -> (ReloadSender, ReloadReceiver) {
    mpsc::unbounded_channel()
}

/// Load the initial table from `source`.
///
/// A failing source leaves the table as it is (empty on startup); the
/// error is logged and returned so startup can decide what to do.
pub fn load_initial(
    table: &RoutingTable,
    source: &dyn RouteSource,
) -> Result<u64, RouteSourceError> {
    match table.reload_from(source) {
        Ok(generation) => {
            info!(
                generation = generation,
                hosts = ?table.hosts(),
                "Initial routing table loaded"
            );
            Ok(generation)
        }
        Err(e) => {
            warn!(error = %e, "Initial routing table load failed, starting with current table");
            Err(e)
        }
    }
}

/// Reload `table` from `source` on every signal until all senders are gone.
pub async fn run_reload_loop(
    source: Arc<dyn RouteSource>,
    table: Arc<RoutingTable>,
    mut signals: ReloadReceiver,
) {
    info!("Reload loop started");

    while signals.recv().await.is_some() {
        let mut coalesced = 0usize;
        while signals.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            debug!(coalesced = coalesced, "Coalesced reload signals");
        }

        match table.reload_from(source.as_ref()) {
            Ok(generation) => info!(
                generation = generation,
                entry_count = table.len(),
                "Routing table reloaded"
            ),
            Err(e) => warn!(
                error = %e,
                generation = table.generation(),
                "Routing table reload failed, keeping current table"
            ),
        }
    }

    info!("Reload signal channel closed, reload loop stopped");
}
