//! Outbound sync queue
//!
//! Every local mutation is queued here for every known peer and pushed to the
//! peers that have not acknowledged it yet. Peers that are not active are
//! left pending until they come back. Items that fail are re-queued with
//! backoff until `max_sync_retries` is used up; items that are not due yet
//! are skipped without holding back the rest of the batch.

use super::conflict::{ConflictResolver, Resolution};
use super::retry::RetryPolicy;
use crate::cluster::registry::NodeRegistry;
use crate::cluster::types::{NodeId, NodeStatus};
use crate::core::{CacheEntry, CacheError, now_millis};
use crate::metrics;
use crate::node::replica::{ApplyMode, ApplyOutcome, LocalReplica};
use crate::protocol::{
    ClusterMessage, ClusterResponse, Envelope, KeyState, Mutation, MutationPayload, OperationKind,
    Transport,
};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A queued mutation awaiting delivery to peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    pub key: String,
    pub operation: OperationKind,
    pub mutation: Mutation,
    pub origin: NodeId,
    pub version: u64,
    pub retry_count: u32,
    pub enqueued_at: u64,
    /// Not retried before this time (ms since epoch)
    pub next_attempt_at: u64,
    /// Peers that have not acknowledged the item yet
    pub pending: BTreeSet<NodeId>,
}

impl SyncItem {
    pub fn new(mutation: Mutation, targets: impl IntoIterator<Item = NodeId>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            key: mutation.key.clone(),
            operation: mutation.kind(),
            origin: mutation.origin.clone(),
            version: mutation.version,
            mutation,
            retry_count: 0,
            enqueued_at: now,
            next_attempt_at: now,
            pending: targets.into_iter().collect(),
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.next_attempt_at <= now
    }
}

/// Bounded FIFO; overflow drops the oldest item
#[derive(Clone)]
pub struct SyncQueue {
    items: Arc<Mutex<VecDeque<SyncItem>>>,
    capacity: usize,
}

impl SyncQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Append an item, returning the evicted oldest item on overflow
    pub fn push(&self, item: SyncItem) -> Option<SyncItem> {
        let mut items = self.items.lock();
        let dropped = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        dropped
    }

    /// Remove up to `max` due items, keeping the order of what stays
    pub fn take_due(&self, now: u64, max: usize) -> Vec<SyncItem> {
        let mut items = self.items.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(items.len());

        while let Some(item) = items.pop_front() {
            if taken.len() < max && item.is_due(now) {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *items = kept;
        taken
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Vec<SyncItem> {
        self.items.lock().iter().cloned().collect()
    }
}

/// Cumulative sync statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub enqueued: u64,
    /// Items acknowledged by every target
    pub completed: u64,
    /// Individual peer deliveries that succeeded
    pub sent: u64,
    /// Individual peer deliveries that failed
    pub failures: u64,
    pub retries: u64,
    /// Requeues that only waited on inactive peers
    pub deferred: u64,
    pub retry_exhausted: u64,
    pub conflicts: u64,
    pub conflicts_resolved: u64,
    /// Conflicts settled by a newer local write already queued
    pub conflicts_superseded: u64,
    pub conflicts_unresolved: u64,
    /// Items evicted because the queue was full
    pub overflow_dropped: u64,
}

/// Per-batch summary returned by `process_batch`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub completed: usize,
    pub requeued: usize,
    /// Requeued only because the remaining peers are inactive
    pub deferred: usize,
    pub exhausted: usize,
    pub conflicts: usize,
}

enum Delivery {
    Acked,
    Conflict(KeyState),
    Failed(CacheError),
}

#[derive(Clone)]
pub struct SyncQueueProcessor {
    registry: NodeRegistry,
    transport: Arc<dyn Transport>,
    replica: LocalReplica,
    resolver: ConflictResolver,
    queue: SyncQueue,
    retry: RetryPolicy,
    batch_size: usize,
    request_timeout: Duration,
    stats: Arc<RwLock<SyncStats>>,
}

impl SyncQueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: NodeRegistry,
        transport: Arc<dyn Transport>,
        replica: LocalReplica,
        resolver: ConflictResolver,
        retry: RetryPolicy,
        max_queue_size: usize,
        batch_size: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            replica,
            resolver,
            queue: SyncQueue::new(max_queue_size),
            retry,
            batch_size: batch_size.max(1),
            request_timeout,
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    fn local_id(&self) -> &str {
        self.registry.local_id()
    }

    /// Queue `mutation` for every known peer, whatever its current status.
    /// Returns false when the cluster has no other node.
    pub fn enqueue(&self, mutation: Mutation) -> bool {
        let targets: Vec<NodeId> = self.registry.peers().into_iter().map(|n| n.id).collect();
        if targets.is_empty() {
            debug!("No peers, not queueing {}", mutation.key);
            return false;
        }

        let item = SyncItem::new(mutation, targets);
        debug!("Queued sync item {} for {} v{}", item.id, item.key, item.version);
        if let Some(dropped) = self.queue.push(item) {
            warn!(
                "Sync queue full ({}), dropped oldest item {} for key {}",
                self.queue.capacity(),
                dropped.id,
                dropped.key
            );
            self.stats.write().overflow_dropped += 1;
            metrics::record_sync(self.local_id(), "overflow");
        }
        self.stats.write().enqueued += 1;
        metrics::set_sync_queue_depth(self.local_id(), self.queue.len());
        true
    }

    /// Drain one batch of due items
    pub async fn process_batch(&self) -> BatchReport {
        let batch = self.queue.take_due(now_millis(), self.batch_size);
        let mut report = BatchReport {
            processed: batch.len(),
            ..Default::default()
        };

        for item in batch {
            self.process_item(item, &mut report).await;
        }

        metrics::set_sync_queue_depth(self.local_id(), self.queue.len());
        if report.processed > 0 {
            debug!("Sync batch: {:?}", report);
        }
        report
    }

    /// Known but not active; such peers stay pending without using a retry
    fn is_parked(&self, node_id: &str) -> bool {
        self.registry
            .get(node_id)
            .is_some_and(|n| n.status != NodeStatus::Active)
    }

    async fn process_item(&self, mut item: SyncItem, report: &mut BatchReport) {
        let targets: Vec<NodeId> = item
            .pending
            .iter()
            .filter(|id| !self.is_parked(id))
            .cloned()
            .collect();
        let sends = targets.iter().map(|target| {
            let message = ClusterMessage::Sync {
                item_id: item.id.clone(),
                mutation: item.mutation.clone(),
            };
            async move { (target.clone(), self.deliver(target, message).await) }
        });

        let results = join_all(sends).await;
        let mut failed = false;

        for (target, delivery) in results {
            match delivery {
                Delivery::Acked => {
                    item.pending.remove(&target);
                    self.stats.write().sent += 1;
                    metrics::record_sync(self.local_id(), "success");
                }
                Delivery::Conflict(peer_state) => {
                    item.pending.remove(&target);
                    report.conflicts += 1;
                    self.handle_conflict(&item, &target, peer_state);
                }
                Delivery::Failed(e) => {
                    debug!("Sync of {} to {} failed: {}", item.key, target, e);
                    failed = true;
                    self.stats.write().failures += 1;
                    metrics::record_sync(self.local_id(), "failure");
                }
            }
        }

        if item.pending.is_empty() {
            report.completed += 1;
            self.stats.write().completed += 1;
            return;
        }

        if !failed {
            debug!(
                "Sync item {} waiting on inactive peer(s) {:?}",
                item.id, item.pending
            );
            item.next_attempt_at = now_millis() + self.retry.backoff(1).as_millis() as u64;
            report.deferred += 1;
            self.stats.write().deferred += 1;
            self.requeue(item);
            return;
        }

        item.retry_count += 1;
        if self.retry.is_exhausted(item.retry_count) {
            let err = CacheError::RetryExhausted {
                key: item.key.clone(),
                attempts: item.retry_count,
            };
            warn!("Dropping sync item {}: {} (pending: {:?})", item.id, err, item.pending);
            report.exhausted += 1;
            self.stats.write().retry_exhausted += 1;
            metrics::record_sync(self.local_id(), "retry_exhausted");
            return;
        }

        let delay = self.retry.delay_for(item.retry_count);
        item.next_attempt_at = now_millis() + delay.as_millis() as u64;
        report.requeued += 1;
        self.stats.write().retries += 1;
        self.requeue(item);
    }

    fn requeue(&self, item: SyncItem) {
        if let Some(dropped) = self.queue.push(item) {
            warn!("Sync queue full, dropped oldest item {}", dropped.id);
            self.stats.write().overflow_dropped += 1;
            metrics::record_sync(self.local_id(), "overflow");
        }
    }

    async fn deliver(&self, target: &str, message: ClusterMessage) -> Delivery {
        let Some(address) = self.registry.address_of(target) else {
            return Delivery::Failed(CacheError::NodeNotFound(target.to_string()));
        };
        let envelope = Envelope::new(self.local_id(), message);

        let result = tokio::time::timeout(self.request_timeout, self.transport.send(&address, envelope)).await;
        match result {
            Err(_) => Delivery::Failed(CacheError::NodeUnavailable(format!("sync to {} timed out", target))),
            Ok(Err(e)) => Delivery::Failed(e),
            Ok(Ok(ClusterResponse::Applied)) => Delivery::Acked,
            Ok(Ok(ClusterResponse::Stale(state))) => Delivery::Conflict(state),
            Ok(Ok(ClusterResponse::Error { message, .. })) => Delivery::Failed(CacheError::Transport(message)),
            Ok(Ok(other)) => Delivery::Failed(CacheError::Internal(format!(
                "unexpected sync reply: {:?}",
                other
            ))),
        }
    }

    /// Reconcile our item with the state a peer reported
    fn handle_conflict(&self, item: &SyncItem, peer: &str, peer_state: KeyState) {
        {
            let mut stats = self.stats.write();
            stats.conflicts += 1;
        }
        metrics::record_sync(self.local_id(), "conflict");

        let local_version = self.replica.key_state(&item.key).version();
        if local_version > item.version {
            // a newer local write is already queued behind this item
            debug!("Sync item {} superseded locally (v{} > v{})", item.id, local_version, item.version);
            self.stats.write().conflicts_superseded += 1;
            metrics::record_sync(self.local_id(), "conflict_superseded");
            return;
        }

        let Some(theirs) = peer_state.to_mutation(peer) else {
            warn!("{} rejected {} v{} without reporting its state", peer, item.key, item.version);
            self.stats.write().conflicts_unresolved += 1;
            metrics::record_sync(self.local_id(), "conflict_unresolved");
            return;
        };
        let conflict = CacheError::SyncConflict {
            key: item.key.clone(),
            local_version: item.version,
            remote_version: theirs.version,
        };
        debug!("{}", conflict);

        match self.resolver.resolve(&item.mutation, &theirs) {
            Ok(Resolution::KeepLocal) => {
                let restamped = self.replica.restamp(item.mutation.clone(), theirs.version);
                self.enqueue(restamped);
                self.stats.write().conflicts_resolved += 1;
            }
            Ok(Resolution::AdoptRemote) => {
                if let ApplyOutcome::Stale(_) = self.replica.apply(&theirs, ApplyMode::AtLeast) {
                    debug!("Local state for {} moved past v{}, not adopting", item.key, theirs.version);
                }
                self.stats.write().conflicts_resolved += 1;
            }
            Ok(Resolution::Merged(encoded)) => {
                let ttl = match &item.mutation.payload {
                    MutationPayload::Set(entry) => entry.remaining_ttl_ms().map(Duration::from_millis),
                    MutationPayload::Delete(_) => None,
                };
                let entry = CacheEntry::new(&item.key, encoded, ttl, 0, self.local_id());
                let merged = self
                    .replica
                    .restamp(Mutation::set(entry, self.local_id()), theirs.version);
                self.enqueue(merged);
                self.stats.write().conflicts_resolved += 1;
            }
            Err(e) => {
                warn!("Conflict on {} with {} left unresolved: {}", item.key, peer, e);
                self.stats.write().conflicts_unresolved += 1;
                metrics::record_sync(self.local_id(), "conflict_unresolved");
            }
        }
    }

    /// Background drain every `interval` until shutdown
    pub fn start(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!("Starting sync queue processor (interval={:?})", interval);
        let processor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        processor.process_batch().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Sync queue processor stopped");
        })
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }
}
