//! Routing table and hot reload.
//!
//! Maps a virtual host to the downstream address that serves it.
//!
//! - Exact, case-sensitive host match
//! - The whole table is replaced on reload, never edited in place
//! - A reload is one atomic pointer swap; lookups never take a lock
//! - A failed reload leaves the current table authoritative

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::error::RouteSourceError;
use crate::reload::RouteSource;

/// One host → downstream mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEntry {
    host: String,
    downstream_addr: String,
}

impl RoutingEntry {
    pub fn new(host: impl Into<String>, downstream_addr: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            downstream_addr: downstream_addr.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Address to dial, `host:port`.
    pub fn downstream_addr(&self) -> &str {
        &self.downstream_addr
    }
}

/// Immutable snapshot of the routing table.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    generation: u64,
    by_host: HashMap<String, Arc<RoutingEntry>>,
}

impl RouteSnapshot {
    fn from_entries(generation: u64, entries: Vec<RoutingEntry>) -> Self {
        let mut by_host = HashMap::with_capacity(entries.len());

        for entry in entries {
            let host = entry.host.clone();
            if let Some(previous) = by_host.insert(host, Arc::new(entry)) {
                warn!(
                    host = %previous.host,
                    replaced_addr = %previous.downstream_addr,
                    "Duplicate host in routing entries, later entry wins"
                );
            }
        }

        Self {
            generation,
            by_host,
        }
    }

    /// Look up the entry for `host`.
    pub fn lookup(&self, host: &str) -> Option<Arc<RoutingEntry>> {
        self.by_host.get(host).cloned()
    }

    /// Reload counter this snapshot was built at; 0 is the initial table.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Hosts in this snapshot, sorted.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.by_host.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

/// Routing table shared by every session.
///
/// Uses ArcSwap for lock-free atomic replacement.
/// Readers get consistent snapshots without blocking.
/// Writers atomically swap in new snapshots.
pub struct RoutingTable {
    /// Atomically swappable route snapshot.
    snapshot: ArcSwap<RouteSnapshot>,
    /// Serializes writers only; lookups never touch it.
    writer: Mutex<()>,
}

impl RoutingTable {
    /// Create a new empty routing table.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Create a table pre-populated with `entries`.
    pub fn with_entries(entries: Vec<RoutingEntry>) -> Self {
        let table = Self::new();
        table.replace(entries);
        table
    }

    /// Downstream entry for `host`, if routed.
    pub fn lookup(&self, host: &str) -> Option<Arc<RoutingEntry>> {
        self.snapshot.load().lookup(host)
    }

    /// Current snapshot, for several reads that must agree with each other.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the whole table.
    ///
    /// The new snapshot is fully built before a single pointer swap
    /// publishes it. Readers holding the old snapshot keep using it until
    /// they drop it. Returns the new generation.
    pub fn replace(&self, entries: Vec<RoutingEntry>) -> u64 {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let entry_count = entries.len();
        let generation = self.snapshot.load().generation + 1;
        let new_snapshot = Arc::new(RouteSnapshot::from_entries(generation, entries));

        // Atomic swap - readers get consistent snapshots
        self.snapshot.store(new_snapshot);

        info!(
            generation = generation,
            entry_count = entry_count,
            "Routing table replaced atomically"
        );
        generation
    }

    /// Fetch fresh entries from `source` and replace the table with them.
    ///
    /// On error the current table is left untouched.
    pub fn reload_from(&self, source: &dyn RouteSource) -> Result<u64, RouteSourceError> {
        let entries = source.current_entries()?;
        Ok(self.replace(entries))
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.load().generation
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.snapshot.load().hosts()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared routing table reference.
pub type SharedRoutingTable = Arc<RoutingTable>;
