use crate::cluster::config::{ConsistencyLevel, PartitionStrategy};
use crate::cluster::types::NodeId;
use crate::core::StoreStats;
use crate::replication::{ReplicationOutcome, ReplicationStats};
use crate::sync::SyncStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-call read options
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Overrides the configured consistency level
    pub consistency: Option<ConsistencyLevel>,
}

impl GetOptions {
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }
}

/// Per-call write options
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Falls back to the store's default TTL
    pub ttl: Option<Duration>,
    pub consistency: Option<ConsistencyLevel>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }
}

/// Routing-level counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub forwarded: u64,
    pub forward_failures: u64,
    pub fallback_reads: u64,
    pub read_repairs: u64,
    pub local_fallback_writes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CoordinatorCounters {
    pub forwarded: AtomicU64,
    pub forward_failures: AtomicU64,
    pub fallback_reads: AtomicU64,
    pub read_repairs: AtomicU64,
    pub local_fallback_writes: AtomicU64,
}

impl CoordinatorCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            fallback_reads: self.fallback_reads.load(Ordering::Relaxed),
            read_repairs: self.read_repairs.load(Ordering::Relaxed),
            local_fallback_writes: self.local_fallback_writes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub leader: Option<NodeId>,
    pub is_leader: bool,
    pub consistency_level: ConsistencyLevel,
    pub partition_strategy: PartitionStrategy,
    pub codec: String,
    pub nodes_total: usize,
    pub nodes_active: usize,
    pub store: StoreStats,
    pub hit_rate: f64,
    pub tombstones: usize,
    pub replication: ReplicationStats,
    pub last_replication: Option<ReplicationOutcome>,
    pub sync: SyncStats,
    pub sync_queue_depth: usize,
    pub coordinator: CoordinatorStats,
}
