use super::types::SeedNode;
use crate::codec::CodecKind;
use crate::core::{CacheError, Result, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Read/replication consistency level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Await the replication fan-out; no replica reads when the owner is down
    Strong,
    /// Background replication; locally absent keys are looked up on peers
    #[default]
    Eventual,
    /// Background replication; never query peers on read
    Weak,
}

/// How divergent versions of a key are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
    Merge,
    Custom,
}

/// Key-to-node partitioning scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    #[default]
    Hash,
    ConsistentHash,
    Range,
}

/// What to do when the owning node cannot be reached for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardFailurePolicy {
    /// Return `NodeUnavailable` to the caller
    #[default]
    Fail,
    /// Apply the write locally and let sync reconcile it
    Local,
}

/// Cluster node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// This node's ID (auto-generated if not set)
    pub node_id: Option<String>,

    /// This node's cluster transport address
    pub node_address: String,

    /// Static cluster members (may include this node)
    pub cluster_nodes: Vec<SeedNode>,

    /// Number of peers receiving each mutation
    pub replication_factor: usize,

    pub consistency_level: ConsistencyLevel,

    pub conflict_resolution_strategy: ConflictStrategy,

    pub partition_strategy: PartitionStrategy,

    /// Heartbeat interval (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// Node timeout (milliseconds) before a silent node is marked inactive
    pub node_timeout_ms: u64,

    /// Tombstone lifetime (milliseconds), must exceed the sync lag
    pub tombstone_ttl_ms: u64,

    /// Sync queue drain interval (milliseconds)
    pub sync_interval_ms: u64,

    pub max_sync_retries: u32,

    /// Items drained per sync cycle
    pub sync_batch_size: usize,

    /// Outbound sync queue bound
    pub max_queue_size: usize,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Tombstone sweep interval (milliseconds)
    pub gc_interval_ms: u64,

    pub health_check_interval_ms: u64,

    /// Per-request timeout for peer calls (milliseconds)
    pub request_timeout_ms: u64,

    pub forward_failure_policy: ForwardFailurePolicy,

    pub store: StoreConfig,

    pub codec: CodecKind,

    /// Zstd compression level (1-22)
    pub zstd_level: i32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            node_address: "127.0.0.1:7100".to_string(),
            cluster_nodes: Vec::new(),
            replication_factor: 1,
            consistency_level: ConsistencyLevel::Eventual,
            conflict_resolution_strategy: ConflictStrategy::LastWriteWins,
            partition_strategy: PartitionStrategy::Hash,
            heartbeat_interval_ms: 1000,
            node_timeout_ms: 5000,
            tombstone_ttl_ms: 300_000,
            sync_interval_ms: 1000,
            max_sync_retries: 3,
            sync_batch_size: 100,
            max_queue_size: 10_000,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 10_000,
            gc_interval_ms: 30_000,
            health_check_interval_ms: 2000,
            request_timeout_ms: 2000,
            forward_failure_policy: ForwardFailurePolicy::Fail,
            store: StoreConfig::default(),
            codec: CodecKind::None,
            zstd_level: 3,
        }
    }
}

impl ClusterConfig {
    /// Node id from configuration, or a freshly generated one
    pub fn resolved_node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Validate ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(CacheError::InvalidConfig(msg.into()))
        }

        if self.node_id.as_deref().is_some_and(str::is_empty) {
            return invalid("node_id must not be empty");
        }
        if self.node_address.is_empty() {
            return invalid("node_address must not be empty");
        }
        if self.heartbeat_interval_ms == 0 {
            return invalid("heartbeat_interval_ms must be > 0");
        }
        if self.node_timeout_ms <= self.heartbeat_interval_ms {
            return invalid("node_timeout_ms must exceed heartbeat_interval_ms");
        }
        if self.sync_interval_ms == 0 {
            return invalid("sync_interval_ms must be > 0");
        }
        if self.sync_batch_size == 0 {
            return invalid("sync_batch_size must be > 0");
        }
        if self.max_queue_size == 0 {
            return invalid("max_queue_size must be > 0");
        }
        if self.gc_interval_ms == 0 || self.health_check_interval_ms == 0 {
            return invalid("gc_interval_ms and health_check_interval_ms must be > 0");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be > 0");
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return invalid("retry_base_delay_ms must not exceed retry_max_delay_ms");
        }
        let min_tombstone_ttl = self
            .sync_interval_ms
            .saturating_mul(u64::from(self.max_sync_retries) + 1);
        if self.tombstone_ttl_ms < min_tombstone_ttl {
            return invalid(format!(
                "tombstone_ttl_ms ({}) must be at least sync_interval_ms * (max_sync_retries + 1) = {}",
                self.tombstone_ttl_ms, min_tombstone_ttl
            ));
        }
        if self.store.max_entries == 0 {
            return invalid("store.max_entries must be > 0");
        }
        if self.store.cleanup_interval_ms == 0 {
            return invalid("store.cleanup_interval_ms must be > 0");
        }
        if !(1..=22).contains(&self.zstd_level) {
            return invalid("zstd_level must be within 1..=22");
        }

        let mut seen = HashSet::new();
        for node in &self.cluster_nodes {
            if node.id.is_empty() || node.address.is_empty() {
                return invalid("cluster node id and address must not be empty");
            }
            if !seen.insert(node.id.as_str()) {
                return invalid(format!("duplicate cluster node id: {}", node.id));
            }
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_millis(self.tombstone_ttl_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
