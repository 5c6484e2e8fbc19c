//! Incoming cluster messages, executed locally without re-routing

use super::CacheNode;
use super::replica::{ApplyMode, ApplyOutcome};
use crate::cluster::types::NodeStatus;
use crate::protocol::{ClusterMessage, ClusterResponse, Envelope, MessageHandler, Mutation};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

impl CacheNode {
    fn apply_remote(&self, mutation: &Mutation) -> ClusterResponse {
        match self.replica.apply(mutation, ApplyMode::Newer) {
            ApplyOutcome::Applied | ApplyOutcome::Duplicate => ClusterResponse::Applied,
            ApplyOutcome::Stale(current) => ClusterResponse::Stale(current),
        }
    }

    fn on_heartbeat(
        &self,
        node_id: &str,
        address: &str,
        http_address: Option<String>,
        status: NodeStatus,
        load: f64,
    ) -> ClusterResponse {
        if node_id == self.node_id {
            return ClusterResponse::HeartbeatAck {
                node_id: self.node_id.clone(),
                leader: self.elector.leader(),
            };
        }

        if status == NodeStatus::Inactive {
            info!("Node {} announced shutdown", node_id);
            if self.registry.mark_status(node_id, NodeStatus::Inactive).is_ok() {
                self.elector.ensure_leader();
            }
        } else if self.registry.record_heartbeat(node_id, address, http_address, load) {
            self.elector.ensure_leader();
        }

        ClusterResponse::HeartbeatAck {
            node_id: self.node_id.clone(),
            leader: self.elector.leader(),
        }
    }
}

#[async_trait]
impl MessageHandler for CacheNode {
    async fn handle(&self, envelope: Envelope) -> ClusterResponse {
        debug!(
            "{} received {} from {}",
            self.node_id,
            envelope.message.kind(),
            envelope.origin
        );
        let configured = self.config.consistency_level;

        match envelope.message {
            ClusterMessage::Get { key, consistency } => {
                let level = consistency.unwrap_or(configured);
                match self.get_owned(&key, level).await {
                    Ok(value) => ClusterResponse::Value(value),
                    Err(e) => ClusterResponse::from_error(&e),
                }
            }
            ClusterMessage::Set {
                key,
                value,
                ttl_ms,
                consistency,
            } => {
                let ttl = ttl_ms.map(Duration::from_millis);
                let level = consistency.unwrap_or(configured);
                match self.set_local(&key, value, ttl, level).await {
                    Ok(version) => ClusterResponse::Written { version },
                    Err(e) => ClusterResponse::from_error(&e),
                }
            }
            ClusterMessage::Delete { key } => {
                ClusterResponse::Deleted(self.delete_local(&key, configured).await)
            }
            ClusterMessage::Replicate(mutation) => self.apply_remote(&mutation),
            ClusterMessage::Sync { item_id, mutation } => {
                debug!("Applying sync item {} for {}", item_id, mutation.key);
                self.apply_remote(&mutation)
            }
            ClusterMessage::FetchEntry { key } => ClusterResponse::State(self.replica.key_state(&key)),
            ClusterMessage::Heartbeat {
                node_id,
                address,
                http_address,
                status,
                load,
            } => self.on_heartbeat(&node_id, &address, http_address, status, load),
        }
    }
}
