//! Replication Manager
//!
//! Fans every local mutation out to up to `replication_factor` active peers.
//! Best-effort: failures are recorded, never returned to the writer, and are
//! covered by the sync queue rather than retried here.

use super::selector::ReplicaSelector;
use super::types::{ReplicationOutcome, ReplicationStats};
use crate::cluster::registry::NodeRegistry;
use crate::cluster::types::NodeId;
use crate::core::{CacheError, now_millis};
use crate::metrics;
use crate::protocol::{ClusterMessage, ClusterResponse, Envelope, Mutation, Transport};
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

enum PeerResult {
    Applied,
    Stale,
    Failed,
}

#[derive(Clone)]
pub struct ReplicationManager {
    registry: NodeRegistry,
    transport: Arc<dyn Transport>,
    selector: Arc<dyn ReplicaSelector>,
    replication_factor: usize,
    request_timeout: Duration,
    stats: Arc<RwLock<ReplicationStats>>,
    last_outcome: Arc<RwLock<Option<ReplicationOutcome>>>,
}

impl ReplicationManager {
    pub fn new(
        registry: NodeRegistry,
        transport: Arc<dyn Transport>,
        selector: Arc<dyn ReplicaSelector>,
        replication_factor: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            selector,
            replication_factor,
            request_timeout,
            stats: Arc::new(RwLock::new(ReplicationStats::default())),
            last_outcome: Arc::new(RwLock::new(None)),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Peers that would receive a mutation of `key` right now
    pub fn targets_for(&self, key: &str) -> Vec<NodeId> {
        let peers = self.registry.active_peers();
        let count = self.replication_factor.min(peers.len());
        self.selector
            .select(key, &peers, count)
            .into_iter()
            .map(|n| n.id)
            .filter(|id| id != self.registry.local_id())
            .collect()
    }

    /// Send `mutation` to the selected replicas concurrently
    pub async fn replicate(&self, mutation: &Mutation) -> ReplicationOutcome {
        let local_id = self.registry.local_id().to_string();
        let targets = self.targets_for(&mutation.key);

        let sends = targets.iter().map(|target| {
            let envelope = Envelope::new(local_id.clone(), ClusterMessage::Replicate(mutation.clone()));
            async move {
                let result = match self.registry.address_of(target) {
                    Some(address) => self.send(&address, envelope).await,
                    None => Err(CacheError::NodeNotFound(target.clone())),
                };
                (target.clone(), result)
            }
        });
        let results = join_all(sends).await;

        let mut outcome = ReplicationOutcome {
            key: mutation.key.clone(),
            version: mutation.version,
            operation: mutation.kind(),
            targets: targets.clone(),
            succeeded: Vec::new(),
            stale: Vec::new(),
            failed: Vec::new(),
            timestamp: now_millis(),
        };

        for (target, result) in results {
            match result {
                Ok(PeerResult::Applied) => outcome.succeeded.push(target),
                Ok(PeerResult::Stale) => outcome.stale.push(target),
                Ok(PeerResult::Failed) => outcome.failed.push(target),
                Err(e) => {
                    warn!("Replication of {} to {} failed: {}", mutation.key, target, e);
                    outcome.failed.push(target);
                }
            }
        }

        {
            let mut stats = self.stats.write();
            stats.total_mutations += 1;
            stats.attempts += outcome.targets.len() as u64;
            stats.successes += outcome.succeeded.len() as u64;
            stats.stale += outcome.stale.len() as u64;
            stats.failures += outcome.failed.len() as u64;
            if outcome.targets.is_empty() {
                stats.no_targets += 1;
            }
        }
        metrics::record_replication(&local_id, "success", outcome.succeeded.len() as u64);
        metrics::record_replication(&local_id, "stale", outcome.stale.len() as u64);
        metrics::record_replication(&local_id, "failure", outcome.failed.len() as u64);

        debug!(
            "Replicated {} v{} to {}/{} peers",
            mutation.key,
            mutation.version,
            outcome.succeeded.len(),
            outcome.targets.len()
        );

        *self.last_outcome.write() = Some(outcome.clone());
        outcome
    }

    async fn send(&self, address: &str, envelope: Envelope) -> crate::core::Result<PeerResult> {
        let response = tokio::time::timeout(self.request_timeout, self.transport.send(address, envelope))
            .await
            .map_err(|_| CacheError::NodeUnavailable(format!("replication to {} timed out", address)))??;

        Ok(match response {
            ClusterResponse::Applied => PeerResult::Applied,
            ClusterResponse::Stale(_) => PeerResult::Stale,
            ClusterResponse::Error { message, .. } => {
                warn!("Peer {} rejected replication: {}", address, message);
                PeerResult::Failed
            }
            other => {
                warn!("Unexpected replication reply from {}: {:?}", address, other);
                PeerResult::Failed
            }
        })
    }

    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    pub fn last_outcome(&self) -> Option<ReplicationOutcome> {
        self.last_outcome.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CacheEntry;
    use crate::protocol::{InMemoryTransport, MessageHandler};
    use crate::replication::selector::FirstActivePeers;
    use async_trait::async_trait;

    struct AlwaysApplied;

    #[async_trait]
    impl MessageHandler for AlwaysApplied {
        async fn handle(&self, _envelope: Envelope) -> ClusterResponse {
            ClusterResponse::Applied
        }
    }

    fn setup(peers: &[&str], factor: usize) -> (InMemoryTransport, ReplicationManager, Arc<dyn MessageHandler>) {
        let registry = NodeRegistry::new("node-a", "mem://node-a");
        let transport = InMemoryTransport::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(AlwaysApplied);
        for peer in peers {
            let address = format!("mem://{}", peer);
            registry.record_heartbeat(peer, &address, None, 0.0);
            transport.register(address, handler.clone());
        }
        let manager = ReplicationManager::new(
            registry,
            Arc::new(transport.clone()),
            Arc::new(FirstActivePeers),
            factor,
            Duration::from_secs(1),
        );
        (transport, manager, handler)
    }

    fn mutation(key: &str) -> Mutation {
        Mutation::set(CacheEntry::new(key, b"1".to_vec(), None, 1, "node-a"), "node-a")
    }

    #[tokio::test]
    async fn test_bounded_by_factor_and_peers() {
        let (_t, manager, _h) = setup(&["node-b", "node-c", "node-d"], 2);
        let outcome = manager.replicate(&mutation("k")).await;
        assert_eq!(outcome.targets, vec!["node-b".to_string(), "node-c".to_string()]);
        assert!(outcome.is_complete());

        let (_t, manager, _h) = setup(&["node-b"], 3);
        let outcome = manager.replicate(&mutation("k")).await;
        assert_eq!(outcome.targets, vec!["node-b".to_string()]);
    }

    #[tokio::test]
    async fn test_never_targets_self() {
        let (_t, manager, _h) = setup(&[], 2);
        let outcome = manager.replicate(&mutation("k")).await;
        assert!(outcome.targets.is_empty());
        assert_eq!(manager.stats().no_targets, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_recorded() {
        let (transport, manager, _h) = setup(&["node-b", "node-c"], 2);
        transport.set_down("mem://node-c", true);

        let outcome = manager.replicate(&mutation("k")).await;
        assert_eq!(outcome.succeeded, vec!["node-b".to_string()]);
        assert_eq!(outcome.failed, vec!["node-c".to_string()]);

        let stats = manager.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert!(manager.last_outcome().is_some());
    }
}
