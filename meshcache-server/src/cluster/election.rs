//! Leader Election
//!
//! Advisory leadership: the active node with the smallest id leads.
//! Re-elected on startup and whenever the current leader goes inactive.

use super::registry::NodeRegistry;
use super::types::NodeId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct LeaderElector {
    registry: NodeRegistry,
    current: Arc<RwLock<Option<NodeId>>>,
}

impl LeaderElector {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Run an election unconditionally
    pub fn elect(&self) -> Option<NodeId> {
        // active_nodes is ordered by id
        let winner = self.registry.active_nodes().into_iter().next().map(|n| n.id);

        let mut current = self.current.write();
        if *current != winner {
            info!("Leader elected: {:?} (previous: {:?})", winner, *current);
        }
        *current = winner.clone();
        winner
    }

    /// Keep the current leader while it is active, otherwise re-elect
    pub fn ensure_leader(&self) -> Option<NodeId> {
        let current = self.current.read().clone();
        match current {
            Some(leader) if self.registry.is_active(&leader) => Some(leader),
            _ => self.elect(),
        }
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.current.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.current.read().as_deref() == Some(self.registry.local_id())
    }
}
