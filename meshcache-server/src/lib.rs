pub mod cluster;
pub mod codec;
pub mod config;
pub mod core;
pub mod metrics;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod sync;

// Re-export commonly used types
pub use cluster::{
    ClusterConfig, ConflictStrategy, ConsistencyLevel, ForwardFailurePolicy, HealthReport,
    Node, NodeId, NodeRegistry, NodeStatus, PartitionRouter, PartitionStrategy, SeedNode,
};
pub use codec::{CodecKind, ValueCodec};
pub use config::ServerConfig;
pub use core::{CacheEntry, CacheError, LocalStore, Result, StoreConfig, Tombstone};
pub use node::{CacheNode, CacheNodeBuilder, GetOptions, NodeStats, SetOptions};
pub use protocol::{
    ClusterMessage, ClusterResponse, Envelope, InMemoryTransport, MessageHandler, TcpTransport,
    Transport, spawn_cluster_listener,
};
pub use replication::{FirstActivePeers, LeastLoaded, ReplicaSelector};
pub use server::{AppState, create_router};
pub use sync::{ConflictHandler, MergeStrategy, Resolution};
