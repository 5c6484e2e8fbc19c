//! Node-to-node protocol: wire types, transports and the TCP listener

pub mod listener;
pub mod memory;
pub mod message;
pub mod transport;

pub use listener::spawn_cluster_listener;
pub use memory::{DeliveryRecord, InMemoryTransport};
pub use message::{
    ClusterMessage, ClusterResponse, Envelope, ErrorCode, KeyState, Mutation, MutationPayload,
    OperationKind,
};
pub use transport::{MessageHandler, TcpTransport, Transport};
