use serde::{Deserialize, Serialize};

/// Node identifier (unique, ordered lexicographically)
pub type NodeId = String;

/// Node liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Heartbeats observed within the node timeout
    Active,
    /// No heartbeat within the node timeout
    Inactive,
    /// Known from configuration, never heard from
    #[default]
    Unknown,
}

/// Cluster member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Cluster transport address
    pub address: String,
    /// HTTP API address, if the node exposes one
    pub http_address: Option<String>,
    pub status: NodeStatus,
    /// Last heartbeat observed (ms since epoch, 0 = never)
    pub last_heartbeat: u64,
    /// Load score in [0.0, 1.0]
    pub load: f64,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            http_address: None,
            status: NodeStatus::Unknown,
            last_heartbeat: 0,
            load: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

/// Statically configured cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedNode {
    pub id: NodeId,
    pub address: String,
}

impl SeedNode {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}
