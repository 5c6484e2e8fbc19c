//! Partition Router - deterministic key → node mapping
//!
//! Three strategies:
//! - hash: `abs(string_hash(key)) mod N` over nodes ordered by id
//! - consistent-hash: 100 virtual points per node on a CRC32 ring
//! - range: first character code split into N contiguous ranges
//!
//! The node set is every registered node regardless of liveness, so an
//! unreachable owner is still the owner. Failover happens at read time.

use super::config::PartitionStrategy;
use super::registry::NodeRegistry;
use super::types::NodeId;
use crate::core::{CacheError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Virtual points per node on the consistent-hash ring
pub const VIRTUAL_NODES: usize = 100;

/// Character codes are clamped into this space for range partitioning
const RANGE_KEYSPACE: u32 = 256;

/// 32-bit polynomial string hash (`h = h * 31 + c`, wrapping, signed)
pub fn string_hash(key: &str) -> i32 {
    key.chars()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Owner under the hash strategy; `nodes` must be sorted
pub fn hash_owner<'a>(nodes: &'a [NodeId], key: &str) -> Option<&'a NodeId> {
    if nodes.is_empty() {
        return None;
    }
    let idx = string_hash(key).unsigned_abs() as usize % nodes.len();
    nodes.get(idx)
}

/// Owner under the range strategy; `nodes` must be sorted
pub fn range_owner<'a>(nodes: &'a [NodeId], key: &str) -> Option<&'a NodeId> {
    if nodes.is_empty() {
        return None;
    }
    nodes.get(range_index(nodes.len(), key))
}

fn range_index(node_count: usize, key: &str) -> usize {
    let code = key
        .chars()
        .next()
        .map(|c| (c as u32).min(RANGE_KEYSPACE - 1))
        .unwrap_or(0);
    (code as usize * node_count) / RANGE_KEYSPACE as usize
}

/// Consistent-hash ring with `VIRTUAL_NODES` points per node
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// (point, node) sorted by point
    points: Vec<(u32, NodeId)>,
}

impl HashRing {
    pub fn new(nodes: &[NodeId]) -> Self {
        let mut points = Vec::with_capacity(nodes.len() * VIRTUAL_NODES);
        for node in nodes {
            for i in 0..VIRTUAL_NODES {
                let point = crc32fast::hash(format!("{}#{}", node, i).as_bytes());
                points.push((point, node.clone()));
            }
        }
        // Ties broken by node id so the ring is independent of input order
        points.sort();
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Index of the first point with hash ≥ key hash, wrapping
    fn position(&self, key: &str) -> usize {
        let hash = crc32fast::hash(key.as_bytes());
        let idx = self.points.partition_point(|(point, _)| *point < hash);
        if idx == self.points.len() { 0 } else { idx }
    }

    pub fn owner(&self, key: &str) -> Option<&NodeId> {
        if self.points.is_empty() {
            return None;
        }
        Some(&self.points[self.position(key)].1)
    }

    /// Up to `count` distinct nodes walking clockwise from the key
    pub fn successors(&self, key: &str, count: usize) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = Vec::with_capacity(count);
        if self.points.is_empty() {
            return result;
        }
        let start = self.position(key);
        for offset in 0..self.points.len() {
            if result.len() >= count {
                break;
            }
            let node = &self.points[(start + offset) % self.points.len()].1;
            if !result.contains(node) {
                result.push(node.clone());
            }
        }
        result
    }
}

/// Router bound to a registry; recomputes ownership on every call
#[derive(Clone)]
pub struct PartitionRouter {
    registry: NodeRegistry,
    strategy: PartitionStrategy,
    /// Ring cached per membership generation
    ring_cache: Arc<RwLock<Option<(u64, Arc<HashRing>)>>>,
}

impl PartitionRouter {
    pub fn new(registry: NodeRegistry, strategy: PartitionStrategy) -> Self {
        Self {
            registry,
            strategy,
            ring_cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn strategy(&self) -> PartitionStrategy {
        self.strategy
    }

    fn ring(&self) -> Arc<HashRing> {
        let generation = self.registry.generation();
        if let Some((cached_gen, ring)) = self.ring_cache.read().as_ref() {
            if *cached_gen == generation {
                return Arc::clone(ring);
            }
        }

        let ring = Arc::new(HashRing::new(&self.registry.node_ids()));
        debug!(
            "Rebuilt hash ring: {} points (generation {})",
            ring.len(),
            generation
        );
        *self.ring_cache.write() = Some((generation, Arc::clone(&ring)));
        ring
    }

    /// Node responsible for `key`
    pub fn owner_of(&self, key: &str) -> Result<NodeId> {
        let owner = match self.strategy {
            PartitionStrategy::ConsistentHash => self.ring().owner(key).cloned(),
            PartitionStrategy::Hash => hash_owner(&self.registry.node_ids(), key).cloned(),
            PartitionStrategy::Range => range_owner(&self.registry.node_ids(), key).cloned(),
        };
        owner.ok_or(CacheError::NoNodes)
    }

    pub fn is_local(&self, key: &str) -> Result<bool> {
        Ok(self.owner_of(key)? == self.registry.local_id())
    }

    /// Owner followed by up to `count - 1` successor nodes
    pub fn replicas_for(&self, key: &str, count: usize) -> Result<Vec<NodeId>> {
        match self.strategy {
            PartitionStrategy::ConsistentHash => {
                let ring = self.ring();
                if ring.is_empty() {
                    return Err(CacheError::NoNodes);
                }
                Ok(ring.successors(key, count))
            }
            PartitionStrategy::Hash | PartitionStrategy::Range => {
                let ids = self.registry.node_ids();
                if ids.is_empty() {
                    return Err(CacheError::NoNodes);
                }
                let start = match self.strategy {
                    PartitionStrategy::Range => range_index(ids.len(), key),
                    _ => string_hash(key).unsigned_abs() as usize % ids.len(),
                };
                Ok((0..count.min(ids.len()))
                    .map(|offset| ids[(start + offset) % ids.len()].clone())
                    .collect())
            }
        }
    }
}
