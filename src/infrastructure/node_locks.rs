//! Per-node Exclusive Locks
//!
//! Push execution against a node is serialized by one lock per node,
//! independently of the scheduler's one-task-per-node rule.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard held while a push command runs against a node.
pub type NodeLockGuard = OwnedMutexGuard<()>;

/// Registry of per-node locks.
pub struct NodeLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NodeLocks {
    /// Create one lock per configured node.
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a str>) -> Self {
        let locks = DashMap::new();
        for node in nodes {
            locks.insert(node.to_string(), Arc::new(Mutex::new(())));
        }
        Self { locks }
    }

    fn lock_for(&self, node: &str) -> Option<Arc<Mutex<()>>> {
        self.locks.get(node).map(|entry| entry.value().clone())
    }

    /// Try to take a node's lock without waiting.
    #[cfg(test)]
    pub fn try_acquire(&self, node: &str) -> Option<NodeLockGuard> {
        self.lock_for(node)?.try_lock_owned().ok()
    }

    /// Wait up to `patience` for a node's lock.
    ///
    /// Returns `None` on timeout or for an unknown node. Callers retry in a
    /// loop so they stay responsive to reloads and shutdown.
    pub async fn acquire_within(&self, node: &str, patience: Duration) -> Option<NodeLockGuard> {
        let lock = self.lock_for(node)?;
        tokio::time::timeout(patience, lock.lock_owned()).await.ok()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.locks.contains_key(node)
    }

    /// Drop every lock. Guards already handed out stay valid.
    pub fn release_all(&self) {
        let count = self.locks.len();
        self.locks.clear();
        tracing::debug!("released {} node locks", count);
    }
}
