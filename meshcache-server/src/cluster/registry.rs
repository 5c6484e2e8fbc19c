//! Node Registry
//!
//! Tracks cluster membership, liveness and load. Heartbeats mark nodes
//! active; the health check marks silent nodes inactive. Nodes are never
//! dropped except by explicit decommission.

use super::types::{Node, NodeId, NodeStatus, SeedNode};
use crate::core::{CacheError, Result, now_millis};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct NodeRegistry {
    /// Ordered by node id
    nodes: Arc<RwLock<BTreeMap<NodeId, Node>>>,
    /// Registration time per node, used to time out nodes never heard from
    joined_at: Arc<RwLock<BTreeMap<NodeId, u64>>>,
    local_id: NodeId,
    /// Bumped on every membership change (join/decommission)
    generation: Arc<AtomicU64>,
}

impl NodeRegistry {
    /// Create a registry containing only the local node (active)
    pub fn new(local_id: impl Into<NodeId>, local_address: impl Into<String>) -> Self {
        let local_id = local_id.into();
        let now = now_millis();

        let mut local = Node::new(local_id.clone(), local_address);
        local.status = NodeStatus::Active;
        local.last_heartbeat = now;

        let mut nodes = BTreeMap::new();
        nodes.insert(local_id.clone(), local);
        let mut joined_at = BTreeMap::new();
        joined_at.insert(local_id.clone(), now);

        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            joined_at: Arc::new(RwLock::new(joined_at)),
            local_id,
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a registry from the configured seed list
    pub fn with_seeds(
        local_id: impl Into<NodeId>,
        local_address: impl Into<String>,
        seeds: &[SeedNode],
    ) -> Self {
        let registry = Self::new(local_id, local_address);
        for seed in seeds {
            if seed.id != registry.local_id {
                registry.upsert_seed(seed);
            }
        }
        registry
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn local_node(&self) -> Node {
        self.nodes
            .read()
            .get(&self.local_id)
            .cloned()
            .unwrap_or_else(|| Node::new(self.local_id.clone(), String::new()))
    }

    /// Membership generation, changes whenever nodes join or leave
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Add a node to the cluster
    pub fn add_node(&self, node: Node) -> Result<()> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.id) {
            return Err(CacheError::NodeExists(node.id.clone()));
        }

        info!("Adding node to cluster: {} at {}", node.id, node.address);
        self.joined_at.write().insert(node.id.clone(), now_millis());
        nodes.insert(node.id.clone(), node);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Register a seed node as `unknown` unless already known
    pub fn upsert_seed(&self, seed: &SeedNode) {
        if self.nodes.read().contains_key(&seed.id) {
            return;
        }
        let _ = self.add_node(Node::new(seed.id.clone(), seed.address.clone()));
    }

    /// Record a heartbeat from `node_id`, registering it on first contact.
    /// Returns true if the node was not active before.
    pub fn record_heartbeat(
        &self,
        node_id: &str,
        address: &str,
        http_address: Option<String>,
        load: f64,
    ) -> bool {
        let now = now_millis();
        let mut nodes = self.nodes.write();

        match nodes.get_mut(node_id) {
            Some(node) => {
                let revived = node.status != NodeStatus::Active;
                if revived {
                    info!("Node {} is now active (was {:?})", node_id, node.status);
                }
                node.status = NodeStatus::Active;
                node.last_heartbeat = now;
                node.load = load.clamp(0.0, 1.0);
                if !address.is_empty() {
                    node.address = address.to_string();
                }
                if http_address.is_some() {
                    node.http_address = http_address;
                }
                revived
            }
            None => {
                info!("Node {} joined via heartbeat from {}", node_id, address);
                let mut node = Node::new(node_id, address);
                node.status = NodeStatus::Active;
                node.last_heartbeat = now;
                node.load = load.clamp(0.0, 1.0);
                node.http_address = http_address;
                nodes.insert(node_id.to_string(), node);
                self.joined_at.write().insert(node_id.to_string(), now);
                self.generation.fetch_add(1, Ordering::SeqCst);
                true
            }
        }
    }

    /// Refresh the local node's heartbeat and load
    pub fn touch_local(&self, load: f64) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(&self.local_id) {
            node.status = NodeStatus::Active;
            node.last_heartbeat = now_millis();
            node.load = load.clamp(0.0, 1.0);
        }
    }

    /// Update node status
    pub fn mark_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(node) => {
                if node.status != status {
                    debug!("Node {} status {:?} -> {:?}", node_id, node.status, status);
                }
                node.status = status;
                Ok(())
            }
            None => Err(CacheError::NodeNotFound(node_id.to_string())),
        }
    }

    /// Mark peers silent for longer than `timeout` as inactive.
    /// Returns the ids that transitioned to inactive.
    pub fn check_timeouts(&self, now: u64, timeout: Duration) -> Vec<NodeId> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut nodes = self.nodes.write();
        let joined_at = self.joined_at.read();
        let mut failed = Vec::new();

        for (id, node) in nodes.iter_mut() {
            if *id == self.local_id || node.status == NodeStatus::Inactive {
                continue;
            }
            let last_seen = node
                .last_heartbeat
                .max(joined_at.get(id).copied().unwrap_or(0));
            if now.saturating_sub(last_seen) > timeout_ms {
                warn!(
                    "Node {} appears to be down (last heartbeat: {}ms ago)",
                    id,
                    now.saturating_sub(last_seen)
                );
                node.status = NodeStatus::Inactive;
                failed.push(id.clone());
            }
        }

        failed
    }

    /// Remove a node permanently
    pub fn decommission(&self, node_id: &str) -> Result<Node> {
        if node_id == self.local_id {
            return Err(CacheError::InvalidConfig(
                "cannot decommission the local node".to_string(),
            ));
        }
        let removed = self
            .nodes
            .write()
            .remove(node_id)
            .ok_or_else(|| CacheError::NodeNotFound(node_id.to_string()))?;
        self.joined_at.write().remove(node_id);
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Decommissioned node {}", node_id);
        Ok(removed)
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().get(node_id).cloned()
    }

    pub fn address_of(&self, node_id: &str) -> Option<String> {
        self.nodes.read().get(node_id).map(|n| n.address.clone())
    }

    pub fn is_active(&self, node_id: &str) -> bool {
        self.nodes
            .read()
            .get(node_id)
            .is_some_and(|n| n.status == NodeStatus::Active)
    }

    /// All known nodes, ordered by id
    pub fn all_nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    /// All known node ids, ordered
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().keys().cloned().collect()
    }

    /// Active nodes (including self), ordered by id
    pub fn active_nodes(&self) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.status == NodeStatus::Active)
            .cloned()
            .collect()
    }

    /// Active nodes excluding self, ordered by id
    pub fn active_peers(&self) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.id != self.local_id && n.status == NodeStatus::Active)
            .cloned()
            .collect()
    }

    /// Every node except self, regardless of status
    pub fn peers(&self) -> Vec<Node> {
        self.nodes
            .read()
            .values()
            .filter(|n| n.id != self.local_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
