//! Tombstones for deleted keys.
//!
//! A live tombstone hides the key from reads and rejects writes whose version
//! is not newer than the delete. Expired tombstones are swept periodically.

use super::types::{Tombstone, now_millis};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone)]
pub struct TombstoneManager {
    tombstones: Arc<RwLock<HashMap<String, Tombstone>>>,
    ttl: Duration,
}

impl TombstoneManager {
    pub fn new(ttl: Duration) -> Self {
        info!("Initializing tombstone manager (ttl={:?})", ttl);
        Self {
            tombstones: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a delete of `key` by `node_id` at `version`
    pub fn record(&self, key: &str, node_id: &str, version: u64) -> Tombstone {
        let tombstone = Tombstone::new(key, node_id, version, self.ttl);
        self.insert(tombstone.clone());
        tombstone
    }

    /// Install a tombstone received from a peer, keeping the newer version
    pub fn insert(&self, tombstone: Tombstone) {
        let mut tombstones = self.tombstones.write();
        match tombstones.get(&tombstone.key) {
            Some(existing) if existing.version > tombstone.version => {
                debug!(
                    "Keeping newer tombstone for {} (v{} > v{})",
                    tombstone.key, existing.version, tombstone.version
                );
            }
            _ => {
                debug!("Tombstone recorded for {} (v{})", tombstone.key, tombstone.version);
                tombstones.insert(tombstone.key.clone(), tombstone);
            }
        }
    }

    /// Live tombstone for `key`, if any
    pub fn get(&self, key: &str) -> Option<Tombstone> {
        let now = now_millis();
        self.tombstones
            .read()
            .get(key)
            .filter(|t| t.is_live_at(now))
            .cloned()
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove the tombstone for `key` (a newer write superseded it)
    pub fn clear(&self, key: &str) -> bool {
        self.tombstones.write().remove(key).is_some()
    }

    /// Drop every expired tombstone, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = now_millis();
        let mut tombstones = self.tombstones.write();
        let before = tombstones.len();
        tombstones.retain(|_, t| t.is_live_at(now));
        let removed = before - tombstones.len();
        if removed > 0 {
            debug!("Swept {} expired tombstones", removed);
        }
        removed
    }

    /// Number of tracked tombstones (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.tombstones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live(&self) -> Vec<Tombstone> {
        let now = now_millis();
        self.tombstones
            .read()
            .values()
            .filter(|t| t.is_live_at(now))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let manager = TombstoneManager::new(Duration::from_secs(60));
        let tomb = manager.record("user:1", "node-a", 4);

        assert_eq!(tomb.version, 4);
        assert!(manager.is_live("user:1"));
        assert!(!manager.is_live("user:2"));
        assert_eq!(manager.get("user:1").unwrap().deleted_by, "node-a");
    }

    #[test]
    fn test_clear() {
        let manager = TombstoneManager::new(Duration::from_secs(60));
        manager.record("k", "node-a", 1);
        assert!(manager.clear("k"));
        assert!(!manager.is_live("k"));
        assert!(!manager.clear("k"));
    }

    #[test]
    fn test_insert_keeps_newer_version() {
        let manager = TombstoneManager::new(Duration::from_secs(60));
        manager.record("k", "node-a", 7);
        manager.insert(Tombstone::new("k", "node-b", 3, Duration::from_secs(60)));

        assert_eq!(manager.get("k").unwrap().version, 7);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let manager = TombstoneManager::new(Duration::from_millis(20));
        manager.record("k1", "node-a", 1);
        manager.record("k2", "node-a", 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!manager.is_live("k1"));
        assert_eq!(manager.len(), 2);

        assert_eq!(manager.sweep(), 2);
        assert!(manager.is_empty());
    }
}
