use super::error::{CacheError, Result};
use super::types::{CacheEntry, StoreConfig, StoreStats, now_millis};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-node key/value storage with TTL expiry and LRU eviction
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<RwLock<StoreInner>>,
    stats: Arc<RwLock<StoreStats>>,
    config: StoreConfig,
}

struct StoreInner {
    entries: HashMap<String, Slot>,
    /// Access tick -> key, oldest first
    lru_order: BTreeMap<u64, String>,
    next_tick: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

impl StoreInner {
    fn bump(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(slot) = self.entries.get_mut(key) {
            self.lru_order.remove(&slot.tick);
            slot.tick = tick;
            self.lru_order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.lru_order.remove(&slot.tick);
        Some(slot.entry)
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, key) = self.lru_order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

impl LocalStore {
    /// Create a new store with the given configuration
    pub fn new(config: StoreConfig) -> Self {
        info!(
            "Initializing local store with max_entries={}, default_ttl={:?}",
            config.max_entries, config.default_ttl_secs
        );

        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: HashMap::new(),
                lru_order: BTreeMap::new(),
                next_tick: 0,
            })),
            stats: Arc::new(RwLock::new(StoreStats::default())),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Default TTL for writes that do not carry one
    pub fn default_ttl(&self) -> Option<Duration> {
        self.config.default_ttl_secs.map(Duration::from_secs)
    }

    /// Get an entry, updating LRU order and access metadata.
    ///
    /// Expired entries are purged and reported as absent. An entry whose
    /// checksum no longer matches its bytes is dropped and reported as
    /// `CorruptEntry`.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut inner = self.inner.write();
        let mut stats = self.stats.write();
        stats.gets += 1;

        let Some(slot) = inner.entries.get_mut(key) else {
            stats.misses += 1;
            return Ok(None);
        };

        if slot.entry.is_expired_at(now_millis()) {
            debug!("Key expired: {}", key);
            inner.remove(key);
            stats.misses += 1;
            stats.expirations += 1;
            stats.total_keys = inner.entries.len();
            return Ok(None);
        }

        if !slot.entry.verify_checksum() {
            warn!("Checksum mismatch for key {}, dropping entry", key);
            inner.remove(key);
            stats.misses += 1;
            stats.corrupt_entries += 1;
            stats.total_keys = inner.entries.len();
            return Err(CacheError::CorruptEntry {
                key: key.to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }

        slot.entry.touch();
        let entry = slot.entry.clone();
        inner.bump(key);
        stats.hits += 1;
        Ok(Some(entry))
    }

    /// Read an entry without touching LRU order or counters
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let inner = self.inner.read();
        inner
            .entries
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now_millis()))
            .map(|slot| slot.entry.clone())
    }

    /// Insert or replace an entry, evicting least-recently-used keys when
    /// capacity is exceeded. Returns the evicted keys.
    pub fn set(&self, entry: CacheEntry) -> Vec<String> {
        debug!(
            "SET key={}, size={}, version={}",
            entry.key,
            entry.value.len(),
            entry.version
        );

        let mut inner = self.inner.write();
        let key = entry.key.clone();
        let tick = inner.next_tick;
        inner.next_tick += 1;

        if let Some(old) = inner.entries.insert(key.clone(), Slot { entry, tick }) {
            inner.lru_order.remove(&old.tick);
        }
        inner.lru_order.insert(tick, key);

        let mut evicted = Vec::new();
        while inner.entries.len() > self.config.max_entries {
            match inner.pop_lru() {
                Some(victim) => evicted.push(victim),
                None => break,
            }
        }

        let mut stats = self.stats.write();
        stats.sets += 1;
        stats.evictions += evicted.len() as u64;
        stats.total_keys = inner.entries.len();

        if !evicted.is_empty() {
            debug!("Evicted {} keys (LRU)", evicted.len());
        }
        evicted
    }

    /// Delete a key
    pub fn delete(&self, key: &str) -> bool {
        debug!("DELETE key={}", key);

        let mut inner = self.inner.write();
        let removed = inner.remove(key);

        let mut stats = self.stats.write();
        stats.total_keys = inner.entries.len();
        match removed {
            Some(entry) if !entry.is_expired_at(now_millis()) => {
                stats.deletes += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop an entry whose bytes could not be decoded. Only the given version
    /// is removed; a newer write that raced in stays.
    pub fn drop_corrupt(&self, key: &str, version: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.get(key).is_none_or(|slot| slot.entry.version != version) {
            return false;
        }
        inner.remove(key);

        let mut stats = self.stats.write();
        stats.corrupt_entries += 1;
        stats.total_keys = inner.entries.len();
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Keys currently stored (expired entries excluded)
    pub fn keys(&self) -> Vec<String> {
        let now = now_millis();
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|(_, slot)| !slot.entry.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.read().clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.lru_order.clear();
        self.stats.write().total_keys = 0;
    }

    /// Remove every expired entry, returning how many were purged
    pub fn purge_expired(&self) -> usize {
        let now = now_millis();
        let mut inner = self.inner.write();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }

        if !expired.is_empty() {
            debug!("Purged {} expired keys", expired.len());
            let mut stats = self.stats.write();
            stats.expirations += expired.len() as u64;
            stats.total_keys = inner.entries.len();
        }
        expired.len()
    }

    /// Start the background expiry sweep; stops when `shutdown` flips to true
    pub fn start_ttl_cleanup(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let interval_ms = self.config.cleanup_interval_ms;
        info!("Starting TTL cleanup task (interval={}ms)", interval_ms);

        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        store.purge_expired();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("TTL cleanup task stopped");
        })
    }
}
