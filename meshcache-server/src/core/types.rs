use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Versioned cache entry owned by a node's local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Codec-encoded value bytes
    pub value: Vec<u8>,
    /// Creation time (ms since epoch)
    pub created_at: u64,
    /// Time to live in milliseconds
    pub ttl_ms: Option<u64>,
    /// Absolute expiry (ms since epoch)
    pub expires_at: Option<u64>,
    /// Per-key version, never decreases
    pub version: u64,
    /// Node that produced this version
    pub owner: String,
    /// CRC32 of `value`
    pub checksum: u32,
    pub last_access: u64,
    pub access_count: u64,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
        version: u64,
        owner: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        let ttl_ms = ttl.map(|t| t.as_millis() as u64);
        let checksum = crc32fast::hash(&value);
        Self {
            key: key.into(),
            value,
            created_at: now,
            ttl_ms,
            expires_at: ttl_ms.map(|ms| now + ms),
            version,
            owner: owner.into(),
            checksum,
            last_access: now,
            access_count: 0,
        }
    }

    /// Expired entries are treated as absent
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Verify the stored checksum against the value bytes
    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.value) == self.checksum
    }

    pub fn touch(&mut self) {
        self.last_access = now_millis();
        self.access_count += 1;
    }

    /// Remaining TTL in milliseconds (None = no expiry)
    pub fn remaining_ttl_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(now_millis()))
    }
}

/// Deletion marker preventing stale replicas from resurrecting a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub key: String,
    pub deleted_by: String,
    pub created_at: u64,
    pub expires_at: u64,
    /// Version assigned to the delete
    pub version: u64,
}

impl Tombstone {
    pub fn new(key: impl Into<String>, deleted_by: impl Into<String>, version: u64, ttl: Duration) -> Self {
        let now = now_millis();
        Self {
            key: key.into(),
            deleted_by: deleted_by.into(),
            created_at: now,
            expires_at: now + ttl.as_millis() as u64,
            version,
        }
    }

    pub fn is_live_at(&self, now: u64) -> bool {
        now <= self.expires_at
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(now_millis())
    }
}

/// Configuration for the per-node local store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of entries before LRU eviction
    pub max_entries: usize,
    /// TTL applied when a write does not specify one
    pub default_ttl_secs: Option<u64>,
    /// Expired-entry sweep interval in milliseconds
    pub cleanup_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            default_ttl_secs: None,
            cleanup_interval_ms: 1000,
        }
    }
}

/// Statistics for the local store
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_keys: usize,
    pub gets: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub corrupt_entries: u64,
}

impl StoreStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new("k", b"v".to_vec(), Some(Duration::from_millis(10)), 1, "node-a");
        let expires = entry.expires_at.unwrap();
        assert!(!entry.is_expired_at(expires));
        assert!(entry.is_expired_at(expires + 1));

        let forever = CacheEntry::new("k", b"v".to_vec(), None, 1, "node-a");
        assert!(!forever.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_entry_checksum() {
        let mut entry = CacheEntry::new("k", b"value".to_vec(), None, 1, "node-a");
        assert!(entry.verify_checksum());
        entry.value[0] ^= 0xff;
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_tombstone_liveness() {
        let tomb = Tombstone::new("k", "node-a", 3, Duration::from_secs(60));
        assert!(tomb.is_live());
        assert!(!tomb.is_live_at(tomb.expires_at + 1));
    }

    #[test]
    fn test_hit_rate() {
        let stats = StoreStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(StoreStats::default().hit_rate(), 0.0);
    }
}
