//! Cluster membership and placement
//!
//! - Node registry with heartbeat-driven liveness
//! - Partition routing (hash, consistent-hash ring, range)
//! - Advisory leader election (smallest active id)
//! - Health checks and failure detection

pub mod config;
pub mod election;
pub mod health;
pub mod partition;
pub mod registry;
pub mod types;

pub use config::{
    ClusterConfig, ConflictStrategy, ConsistencyLevel, ForwardFailurePolicy, PartitionStrategy,
};
pub use election::LeaderElector;
pub use health::{HealthInputs, HealthMonitor, HealthReport};
pub use partition::{HashRing, PartitionRouter, VIRTUAL_NODES};
pub use registry::NodeRegistry;
pub use types::{Node, NodeId, NodeStatus, SeedNode};
