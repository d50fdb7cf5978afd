//! The table of live connections, keyed by [`ConnectionId`].
//!
//! Entries are inserted when a handshake succeeds and removed when the
//! connection's transport is released.  Any task may look a connection up
//! concurrently; inserts and removes are atomic with respect to lookups.
//!
//! The directory is generic over the stored value so the bookkeeping can be
//! tested without a transport.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::ConnectionId;

/// A synchronized `id → Arc<C>` map.
#[derive(Debug)]
pub struct ConnectionDirectory<C> {
    entries: RwLock<HashMap<ConnectionId, Arc<C>>>,
}

impl<C> Default for ConnectionDirectory<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConnectionDirectory<C> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `connection` under `id`.
    ///
    /// Returns `false` (and leaves the existing entry untouched) if `id` is
    /// already registered.
    pub async fn insert(&self, id: ConnectionId, connection: Arc<C>) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, connection);
        true
    }

    /// Removes and returns the entry for `id`, if any.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<C>> {
        self.entries.write().await.remove(id)
    }

    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<C>> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// A snapshot of the registered ids.
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.entries.read().await.keys().copied().collect()
    }

    /// A snapshot of the registered connections.
    ///
    /// The lock is released before the caller touches any connection.
    pub async fn snapshot(&self) -> Vec<Arc<C>> {
        self.entries.read().await.values().cloned().collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
