//! Replication of local mutations to peer replicas

pub mod manager;
pub mod selector;
pub mod types;

pub use manager::ReplicationManager;
pub use selector::{FirstActivePeers, LeastLoaded, ReplicaSelector};
pub use types::{ReplicationOutcome, ReplicationStats};
