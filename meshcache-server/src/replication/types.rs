use crate::cluster::types::NodeId;
use crate::protocol::OperationKind;
use serde::{Deserialize, Serialize};

/// Result of fanning one mutation out to its replicas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationOutcome {
    pub key: String,
    pub version: u64,
    pub operation: OperationKind,
    /// Peers the mutation was sent to
    pub targets: Vec<NodeId>,
    /// Peers that applied it (or already held it)
    pub succeeded: Vec<NodeId>,
    /// Peers that hold a conflicting newer version
    pub stale: Vec<NodeId>,
    /// Peers that could not be reached
    pub failed: Vec<NodeId>,
    pub timestamp: u64,
}

impl ReplicationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.stale.is_empty()
    }
}

/// Cumulative replication statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Mutations handed to the replication manager
    pub total_mutations: u64,
    /// Individual peer sends
    pub attempts: u64,
    pub successes: u64,
    pub stale: u64,
    pub failures: u64,
    /// Mutations replicated with no active peer available
    pub no_targets: u64,
}
