//! Bookkeeping of live sessions.
//!
//! The registry is the only cross-session state besides the routing table.
//! Every insert and delete goes through one mutex; contention is low next to
//! the cost of per-connection I/O.
//!
//! Registration is tied to a guard: dropping the [`Registration`] removes the
//! entry, so a session is deregistered exactly once whichever way it ends.
//!
//! The registry holds no handle to a session's socket and cannot close one.
//! Shutdown is dropping the runtime: every session task is dropped with it,
//! which closes its sockets and releases its registration. Until then the
//! registry only reports what is still live.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use super::session::SessionId;

/// What the registry knows about a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer_addr: SocketAddr,
    pub created_at: SystemTime,
}

/// Registry of all active sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. The entry lives until the returned guard drops.
    pub fn register(self: &Arc<Self>, info: SessionInfo) -> Registration {
        let id = info.id;
        self.lock().insert(id, info);
        debug!(session_id = %id, "Session registered");

        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.lock().contains_key(id)
    }

    /// Copy of every live session, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        sessions
    }

    fn remove(&self, id: &SessionId) {
        if self.lock().remove(id).is_some() {
            debug!(session_id = %id, "Session deregistered");
        }
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a session registered while alive.
#[derive(Debug)]
#[must_use = "the session is deregistered as soon as the guard drops"]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
