//! Local replica state: the store plus tombstones, with versioned writes
//!
//! Version assignment and the store/tombstone update happen under one
//! per-node mutex so same-key writes on a node are serialized.

use crate::core::{CacheEntry, LocalStore, Tombstone, TombstoneManager};
use crate::protocol::{KeyState, Mutation, MutationPayload};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How `apply` compares an incoming version with the local one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Only strictly newer versions apply
    Newer,
    /// Equal versions also apply (adopting a conflict winner)
    AtLeast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    /// Already held this exact mutation
    Duplicate,
    /// Local state is newer or conflicts at the same version
    Stale(KeyState),
}

#[derive(Clone)]
pub struct LocalReplica {
    node_id: String,
    store: LocalStore,
    tombstones: TombstoneManager,
    version_lock: Arc<Mutex<()>>,
}

impl LocalReplica {
    pub fn new(node_id: impl Into<String>, store: LocalStore, tombstones: TombstoneManager) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            tombstones,
            version_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn tombstones(&self) -> &TombstoneManager {
        &self.tombstones
    }

    /// Current entry and live tombstone for `key`
    pub fn key_state(&self, key: &str) -> KeyState {
        KeyState {
            entry: self.store.peek(key),
            tombstone: self.tombstones.get(key),
        }
    }

    /// Store a locally written value under the next version
    pub fn write(&self, key: &str, encoded: Vec<u8>, ttl: Option<Duration>) -> CacheEntry {
        let _guard = self.version_lock.lock();
        let version = self.key_state(key).version() + 1;
        let entry = CacheEntry::new(key, encoded, ttl, version, self.node_id.clone());
        self.install_entry(entry.clone());
        entry
    }

    /// Delete locally: drop the entry and record a tombstone at the next version
    pub fn delete(&self, key: &str) -> (bool, Tombstone) {
        let _guard = self.version_lock.lock();
        let version = self.key_state(key).version() + 1;
        let removed = self.store.delete(key);
        let tombstone = self.tombstones.record(key, &self.node_id, version);
        (removed, tombstone)
    }

    /// Apply a mutation received from a peer
    pub fn apply(&self, mutation: &Mutation, mode: ApplyMode) -> ApplyOutcome {
        let _guard = self.version_lock.lock();
        let current = self.key_state(&mutation.key);
        let local_version = current.version();

        let accept = match mode {
            ApplyMode::Newer => mutation.version > local_version,
            ApplyMode::AtLeast => mutation.version >= local_version,
        };

        if !accept {
            if mutation.version == local_version && Self::holds(&current, mutation) {
                return ApplyOutcome::Duplicate;
            }
            debug!(
                "Rejecting {} v{} from {} (local v{})",
                mutation.key, mutation.version, mutation.origin, local_version
            );
            return ApplyOutcome::Stale(current);
        }

        match &mutation.payload {
            MutationPayload::Set(entry) => self.install_entry(entry.clone()),
            MutationPayload::Delete(tombstone) => {
                self.store.delete(&mutation.key);
                self.tombstones.insert(tombstone.clone());
            }
        }
        ApplyOutcome::Applied
    }

    /// Re-apply `mutation` locally with a version above both the local state
    /// and `floor`, returning the re-stamped mutation
    pub fn restamp(&self, mutation: Mutation, floor: u64) -> Mutation {
        let _guard = self.version_lock.lock();
        let version = self.key_state(&mutation.key).version().max(floor) + 1;
        let mutation = mutation.with_version(version);
        match &mutation.payload {
            MutationPayload::Set(entry) => self.install_entry(entry.clone()),
            MutationPayload::Delete(tombstone) => {
                self.store.delete(&mutation.key);
                self.tombstones.insert(tombstone.clone());
            }
        }
        mutation
    }

    fn install_entry(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        let evicted = self.store.set(entry);
        self.tombstones.clear(&key);
        if !evicted.is_empty() {
            debug!("Evicted {} key(s) to make room for {}", evicted.len(), key);
        }
    }

    /// Whether `state` already reflects exactly this mutation
    fn holds(state: &KeyState, mutation: &Mutation) -> bool {
        match &mutation.payload {
            MutationPayload::Set(incoming) => state.entry.as_ref().is_some_and(|e| {
                e.version == incoming.version && e.owner == incoming.owner && e.value == incoming.value
            }),
            MutationPayload::Delete(incoming) => state.tombstone.as_ref().is_some_and(|t| {
                t.version == incoming.version && t.deleted_by == incoming.deleted_by
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreConfig;

    fn replica(node: &str) -> LocalReplica {
        LocalReplica::new(
            node,
            LocalStore::new(StoreConfig::default()),
            TombstoneManager::new(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_versions_increase_across_set_and_delete() {
        let r = replica("node-a");
        assert_eq!(r.write("k", b"1".to_vec(), None).version, 1);
        assert_eq!(r.write("k", b"2".to_vec(), None).version, 2);

        let (removed, tomb) = r.delete("k");
        assert!(removed);
        assert_eq!(tomb.version, 3);

        // write after delete supersedes the tombstone
        let entry = r.write("k", b"3".to_vec(), None);
        assert_eq!(entry.version, 4);
        assert!(r.tombstones().get("k").is_none());
    }

    #[test]
    fn test_stale_write_rejected_by_tombstone() {
        let a = replica("node-a");
        let b = replica("node-b");

        let entry = b.write("k", b"old".to_vec(), None);
        a.apply(&Mutation::set(entry.clone(), "node-b"), ApplyMode::Newer);
        let (_, tomb) = a.delete("k");
        assert_eq!(tomb.version, 2);

        // stale set (v1) arrives after the delete
        let outcome = a.apply(&Mutation::set(entry, "node-b"), ApplyMode::Newer);
        assert!(matches!(outcome, ApplyOutcome::Stale(_)));
        assert!(a.store().peek("k").is_none());
    }

    #[test]
    fn test_newer_write_supersedes_tombstone() {
        let a = replica("node-a");
        a.write("k", b"v1".to_vec(), None);
        a.delete("k");

        let newer = CacheEntry::new("k", b"v3".to_vec(), None, 3, "node-b");
        let outcome = a.apply(&Mutation::set(newer, "node-b"), ApplyMode::Newer);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(a.store().peek("k").unwrap().value, b"v3".to_vec());
        assert!(a.tombstones().get("k").is_none());
    }

    #[test]
    fn test_duplicate_is_acknowledged() {
        let a = replica("node-a");
        let b = replica("node-b");
        let entry = a.write("k", b"v".to_vec(), None);
        let m = Mutation::set(entry, "node-a");

        assert_eq!(b.apply(&m, ApplyMode::Newer), ApplyOutcome::Applied);
        assert_eq!(b.apply(&m, ApplyMode::Newer), ApplyOutcome::Duplicate);
    }

    #[test]
    fn test_same_version_different_value_conflicts() {
        let a = replica("node-a");
        let b = replica("node-b");
        let ea = a.write("k", b"from-a".to_vec(), None);
        b.write("k", b"from-b".to_vec(), None);

        let outcome = b.apply(&Mutation::set(ea.clone(), "node-a"), ApplyMode::Newer);
        match outcome {
            ApplyOutcome::Stale(state) => assert_eq!(state.version(), 1),
            other => panic!("expected stale, got {:?}", other),
        }

        // adopting accepts the equal version
        let outcome = b.apply(&Mutation::set(ea, "node-a"), ApplyMode::AtLeast);
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(b.store().peek("k").unwrap().value, b"from-a".to_vec());
    }

    #[test]
    fn test_restamp_exceeds_floor() {
        let a = replica("node-a");
        let entry = a.write("k", b"v".to_vec(), None);
        let restamped = a.restamp(Mutation::set(entry, "node-a"), 7);
        assert_eq!(restamped.version, 8);
        assert_eq!(a.store().peek("k").unwrap().version, 8);
    }
}
