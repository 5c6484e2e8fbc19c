//! Cache node: the coordinator every client call goes through
//!
//! Each operation is routed to the key's owner. On the owner it runs against
//! the local replica, then the mutation is replicated and queued for sync.
//! Elsewhere it is forwarded to the owner.

mod handler;
pub mod replica;
pub mod types;

pub use replica::{ApplyMode, ApplyOutcome, LocalReplica};
pub use types::{CoordinatorStats, GetOptions, NodeStats, SetOptions};

use crate::cluster::{
    ClusterConfig, ConflictStrategy, ConsistencyLevel, ForwardFailurePolicy, HealthInputs,
    HealthMonitor, HealthReport, LeaderElector, Node, NodeId, NodeRegistry, NodeStatus,
    PartitionRouter,
};
use crate::codec::{ValueCodec, build_codec};
use crate::core::{CacheEntry, CacheError, LocalStore, Result, TombstoneManager};
use crate::metrics;
use crate::protocol::{
    ClusterMessage, ClusterResponse, Envelope, KeyState, Mutation, MutationPayload, TcpTransport,
    Transport,
};
use crate::replication::{FirstActivePeers, ReplicaSelector, ReplicationManager};
use crate::sync::{
    ConflictHandler, ConflictResolver, JsonMergeStrategy, MergeStrategy, RetryPolicy,
    SyncQueueProcessor,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::CoordinatorCounters;

/// Result of reading the local replica
enum LocalRead {
    Hit(CacheEntry),
    Deleted,
    Miss,
}

/// Builds a `CacheNode` with optional pluggable parts
pub struct CacheNodeBuilder {
    config: ClusterConfig,
    transport: Option<Arc<dyn Transport>>,
    selector: Option<Arc<dyn ReplicaSelector>>,
    merge: Option<Arc<dyn MergeStrategy>>,
    conflict_handler: Option<Arc<dyn ConflictHandler>>,
    codec: Option<Arc<dyn ValueCodec>>,
    http_address: Option<String>,
}

impl CacheNodeBuilder {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            transport: None,
            selector: None,
            merge: None,
            conflict_handler: None,
            codec: None,
            http_address: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn replica_selector(mut self, selector: Arc<dyn ReplicaSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn merge_strategy(mut self, merge: Arc<dyn MergeStrategy>) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Required for the `custom` conflict strategy
    pub fn conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        self.conflict_handler = Some(handler);
        self
    }

    /// Overrides the configured codec
    pub fn codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// HTTP address advertised to peers in heartbeats
    pub fn http_address(mut self, address: impl Into<String>) -> Self {
        self.http_address = Some(address.into());
        self
    }

    pub fn build(self) -> Result<Arc<CacheNode>> {
        let config = self.config;
        config.validate()?;
        if config.conflict_resolution_strategy == ConflictStrategy::Custom
            && self.conflict_handler.is_none()
        {
            return Err(CacheError::InvalidConfig(
                "conflict_resolution_strategy 'custom' requires a conflict handler".to_string(),
            ));
        }

        let node_id = config.resolved_node_id();
        info!(
            "Initializing cache node {} at {} ({} seed(s), partition={:?}, consistency={:?})",
            node_id,
            config.node_address,
            config.cluster_nodes.len(),
            config.partition_strategy,
            config.consistency_level
        );

        let registry =
            NodeRegistry::with_seeds(node_id.clone(), config.node_address.clone(), &config.cluster_nodes);
        let router = PartitionRouter::new(registry.clone(), config.partition_strategy);
        let elector = LeaderElector::new(registry.clone());
        let health = HealthMonitor::new(registry.clone(), elector.clone(), config.node_timeout());

        let codec = self
            .codec
            .unwrap_or_else(|| build_codec(config.codec, config.zstd_level));
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(TcpTransport::new(config.request_timeout(), config.request_timeout()))
        });

        let replica = LocalReplica::new(
            node_id.clone(),
            LocalStore::new(config.store.clone()),
            TombstoneManager::new(config.tombstone_ttl()),
        );

        let replication = ReplicationManager::new(
            registry.clone(),
            Arc::clone(&transport),
            self.selector.unwrap_or_else(|| Arc::new(FirstActivePeers)),
            config.replication_factor,
            config.request_timeout(),
        );

        let resolver = ConflictResolver::new(
            config.conflict_resolution_strategy,
            Arc::clone(&codec),
            self.merge.unwrap_or_else(|| Arc::new(JsonMergeStrategy)),
            self.conflict_handler,
        )?;
        let sync = SyncQueueProcessor::new(
            registry.clone(),
            Arc::clone(&transport),
            replica.clone(),
            resolver,
            RetryPolicy::new(
                config.max_sync_retries,
                Duration::from_millis(config.retry_base_delay_ms),
                Duration::from_millis(config.retry_max_delay_ms),
            ),
            config.max_queue_size,
            config.sync_batch_size,
            config.request_timeout(),
        );

        elector.elect();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(CacheNode {
            config,
            node_id,
            http_address: self.http_address,
            registry,
            router,
            elector,
            health,
            replica,
            codec,
            transport,
            replication,
            sync,
            counters: CoordinatorCounters::default(),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            membership_settled: AtomicBool::new(false),
        }))
    }
}

pub struct CacheNode {
    config: ClusterConfig,
    node_id: NodeId,
    http_address: Option<String>,
    registry: NodeRegistry,
    router: PartitionRouter,
    elector: LeaderElector,
    health: HealthMonitor,
    replica: LocalReplica,
    codec: Arc<dyn ValueCodec>,
    transport: Arc<dyn Transport>,
    replication: ReplicationManager,
    sync: SyncQueueProcessor,
    counters: CoordinatorCounters,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    membership_settled: AtomicBool,
}

impl CacheNode {
    pub fn builder(config: ClusterConfig) -> CacheNodeBuilder {
        CacheNodeBuilder::new(config)
    }

    // ------------------------------------------------------------------
    // Client operations
    // ------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_with(key, GetOptions::default()).await
    }

    pub async fn get_with(&self, key: &str, options: GetOptions) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let level = options.consistency.unwrap_or(self.config.consistency_level);
        let result = self.route_get(key, level).await;

        let outcome = match &result {
            Ok(Some(_)) => "hit",
            Ok(None) => "miss",
            Err(_) => "error",
        };
        metrics::record_cache_op(&self.node_id, "get", outcome, start.elapsed().as_secs_f64());
        result
    }

    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with(key, value, SetOptions::default()).await
    }

    pub async fn set_with(&self, key: &str, value: Vec<u8>, options: SetOptions) -> Result<()> {
        let start = Instant::now();
        let level = options.consistency.unwrap_or(self.config.consistency_level);
        let result = self.route_set(key, value, options.ttl, level).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::record_cache_op(&self.node_id, "set", outcome, start.elapsed().as_secs_f64());
        result
    }

    /// Returns whether the key existed on the node that executed the delete
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let start = Instant::now();
        let result = self.route_delete(key, self.config.consistency_level).await;

        let outcome = match &result {
            Ok(true) => "ok",
            Ok(false) => "miss",
            Err(_) => "error",
        };
        metrics::record_cache_op(&self.node_id, "delete", outcome, start.elapsed().as_secs_f64());
        result
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    async fn route_get(&self, key: &str, level: ConsistencyLevel) -> Result<Option<Vec<u8>>> {
        let owner = self.router.owner_of(key)?;
        if owner == self.node_id {
            return self.get_owned(key, level).await;
        }

        // A local delete the owner has not seen yet still hides the key
        if let Some(tombstone) = self.replica.tombstones().get(key) {
            return self.get_past_tombstone(key, &owner, tombstone.version, level).await;
        }

        let message = ClusterMessage::Get {
            key: key.to_string(),
            consistency: Some(level),
        };
        match self.forward(&owner, message).await {
            Ok(ClusterResponse::Value(value)) => Ok(value),
            Ok(response) => Err(Self::unexpected(key, response)),
            Err(e) if level == ConsistencyLevel::Strong => Err(CacheError::NodeUnavailable(format!(
                "owner {} of key {} unreachable: {}",
                owner, key, e
            ))),
            Err(e) => {
                warn!("Owner {} unreachable for GET {}, reading replicas: {}", owner, key, e);
                CoordinatorCounters::bump(&self.counters.fallback_reads);
                self.fallback_read(key, &owner, level).await
            }
        }
    }

    /// Read through a live local tombstone at `deleted_at`: only an owner
    /// state newer than the tombstone is returned (and adopted locally)
    async fn get_past_tombstone(
        &self,
        key: &str,
        owner: &str,
        deleted_at: u64,
        level: ConsistencyLevel,
    ) -> Result<Option<Vec<u8>>> {
        let message = ClusterMessage::FetchEntry { key: key.to_string() };
        match self.forward(owner, message).await {
            Ok(ClusterResponse::State(state)) if state.version() > deleted_at => {
                let Some(mutation) = state.to_mutation(owner) else {
                    return Ok(None);
                };
                if let ApplyOutcome::Applied = self.replica.apply(&mutation, ApplyMode::Newer) {
                    debug!(
                        "Owner {} superseded local delete of {} (v{} > v{})",
                        owner, key, mutation.version, deleted_at
                    );
                    CoordinatorCounters::bump(&self.counters.read_repairs);
                }
                match mutation.payload {
                    MutationPayload::Set(entry) if !entry.is_expired() => {
                        self.decode_entry(&entry).map(Some)
                    }
                    _ => Ok(None),
                }
            }
            Ok(ClusterResponse::State(_)) => Ok(None),
            Ok(response) => Err(Self::unexpected(key, response)),
            Err(e) if level == ConsistencyLevel::Strong => Err(CacheError::NodeUnavailable(format!(
                "owner {} of key {} unreachable: {}",
                owner, key, e
            ))),
            Err(e) => {
                debug!(
                    "Owner {} unreachable for GET {}, local tombstone stands: {}",
                    owner, key, e
                );
                Ok(None)
            }
        }
    }

    async fn route_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let owner = self.router.owner_of(key)?;
        if owner == self.node_id {
            return self.set_local(key, value, ttl, level).await.map(|_| ());
        }

        let message = ClusterMessage::Set {
            key: key.to_string(),
            value: value.clone(),
            ttl_ms: ttl.map(|t| t.as_millis() as u64),
            consistency: Some(level),
        };
        match self.forward(&owner, message).await {
            Ok(ClusterResponse::Written { version }) => {
                debug!("SET {} stored on {} at v{}", key, owner, version);
                Ok(())
            }
            Ok(response) => Err(Self::unexpected(key, response)),
            Err(e) => match self.config.forward_failure_policy {
                ForwardFailurePolicy::Local => {
                    warn!("Owner {} unreachable for SET {}, writing locally: {}", owner, key, e);
                    CoordinatorCounters::bump(&self.counters.local_fallback_writes);
                    self.set_local(key, value, ttl, level).await.map(|_| ())
                }
                ForwardFailurePolicy::Fail => Err(CacheError::NodeUnavailable(format!(
                    "owner {} of key {} unreachable: {}",
                    owner, key, e
                ))),
            },
        }
    }

    async fn route_delete(&self, key: &str, level: ConsistencyLevel) -> Result<bool> {
        let owner = self.router.owner_of(key)?;
        if owner == self.node_id {
            return Ok(self.delete_local(key, level).await);
        }

        let message = ClusterMessage::Delete { key: key.to_string() };
        match self.forward(&owner, message).await {
            Ok(ClusterResponse::Deleted(removed)) => Ok(removed),
            Ok(response) => Err(Self::unexpected(key, response)),
            Err(e) => match self.config.forward_failure_policy {
                ForwardFailurePolicy::Local => {
                    warn!("Owner {} unreachable for DELETE {}, deleting locally: {}", owner, key, e);
                    CoordinatorCounters::bump(&self.counters.local_fallback_writes);
                    Ok(self.delete_local(key, level).await)
                }
                ForwardFailurePolicy::Fail => Err(CacheError::NodeUnavailable(format!(
                    "owner {} of key {} unreachable: {}",
                    owner, key, e
                ))),
            },
        }
    }

    /// Send a message to `node_id`, bounded by the request timeout
    async fn forward(&self, node_id: &str, message: ClusterMessage) -> Result<ClusterResponse> {
        let address = self
            .registry
            .address_of(node_id)
            .ok_or_else(|| CacheError::NodeNotFound(node_id.to_string()))?;
        debug!("Forwarding {} to {} ({})", message.kind(), node_id, address);
        CoordinatorCounters::bump(&self.counters.forwarded);

        let envelope = Envelope::new(self.node_id.clone(), message);
        let sent = tokio::time::timeout(
            self.config.request_timeout(),
            self.transport.send(&address, envelope),
        )
        .await;

        let result = match sent {
            Ok(result) => result,
            Err(_) => Err(CacheError::NodeUnavailable(format!(
                "request to {} timed out",
                node_id
            ))),
        };
        if result.is_err() {
            CoordinatorCounters::bump(&self.counters.forward_failures);
        }
        result
    }

    /// Error replies become the matching local error
    fn unexpected(key: &str, response: ClusterResponse) -> CacheError {
        match response {
            ClusterResponse::Error { code, message } => ClusterResponse::into_error(code, message, key),
            other => CacheError::Internal(format!("unexpected reply for {}: {:?}", key, other)),
        }
    }

    // ------------------------------------------------------------------
    // Local execution
    // ------------------------------------------------------------------

    /// Decode a stored value. An entry the codec cannot read is dropped and
    /// reported as corrupt.
    fn decode_entry(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        self.codec.decode(&entry.value).map_err(|e| {
            warn!("Undecodable value for key {} v{}, dropping entry: {}", entry.key, entry.version, e);
            self.replica.store().drop_corrupt(&entry.key, entry.version);
            CacheError::CorruptEntry {
                key: entry.key.clone(),
                reason: e.to_string(),
            }
        })
    }

    fn read_local(&self, key: &str) -> Result<LocalRead> {
        if self.replica.tombstones().is_live(key) {
            return Ok(LocalRead::Deleted);
        }
        match self.replica.store().get(key)? {
            Some(entry) => Ok(LocalRead::Hit(entry)),
            None => Ok(LocalRead::Miss),
        }
    }

    /// Read on the owning node
    pub(crate) async fn get_owned(&self, key: &str, level: ConsistencyLevel) -> Result<Option<Vec<u8>>> {
        match self.read_local(key)? {
            LocalRead::Hit(entry) => self.decode_entry(&entry).map(Some),
            LocalRead::Deleted => Ok(None),
            LocalRead::Miss if level == ConsistencyLevel::Eventual => self.read_repair(key, None).await,
            LocalRead::Miss => Ok(None),
        }
    }

    /// Owner unreachable: serve from the local replica, then from peers
    async fn fallback_read(
        &self,
        key: &str,
        owner: &str,
        level: ConsistencyLevel,
    ) -> Result<Option<Vec<u8>>> {
        match self.read_local(key)? {
            LocalRead::Hit(entry) => return self.decode_entry(&entry).map(Some),
            LocalRead::Deleted => return Ok(None),
            LocalRead::Miss => {}
        }
        if level == ConsistencyLevel::Weak {
            return Ok(None);
        }
        self.read_repair(key, Some(owner)).await
    }

    /// Ask active peers for `key`, adopt the newest state locally
    async fn read_repair(&self, key: &str, skip: Option<&str>) -> Result<Option<Vec<u8>>> {
        let peers: Vec<Node> = self
            .registry
            .active_peers()
            .into_iter()
            .filter(|n| Some(n.id.as_str()) != skip)
            .collect();
        if peers.is_empty() {
            return Ok(None);
        }

        let fetches = peers.iter().map(|peer| async move {
            let message = ClusterMessage::FetchEntry { key: key.to_string() };
            (peer.id.clone(), self.forward(&peer.id, message).await)
        });

        let mut best: Option<(NodeId, KeyState)> = None;
        for (peer, response) in join_all(fetches).await {
            match response {
                Ok(ClusterResponse::State(state)) if !state.is_empty() => {
                    let newer = best
                        .as_ref()
                        .is_none_or(|(_, current)| state.version() > current.version());
                    if newer {
                        best = Some((peer, state));
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("FetchEntry {} from {} failed: {}", key, peer, e),
            }
        }

        let Some(mutation) = best.and_then(|(peer, state)| state.to_mutation(&peer)) else {
            return Ok(None);
        };

        if mutation.version > self.replica.key_state(key).version() {
            if let ApplyOutcome::Applied = self.replica.apply(&mutation, ApplyMode::Newer) {
                debug!("Read repair adopted {} v{} from {}", key, mutation.version, mutation.origin);
                CoordinatorCounters::bump(&self.counters.read_repairs);
            }
        }

        match mutation.payload {
            MutationPayload::Set(entry) if !entry.is_expired() => self.decode_entry(&entry).map(Some),
            _ => Ok(None),
        }
    }

    /// Write on this node under the next version, then propagate
    pub(crate) async fn set_local(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        level: ConsistencyLevel,
    ) -> Result<u64> {
        let encoded = self.codec.encode(&value).map_err(|e| CacheError::CorruptEntry {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let ttl = ttl.or_else(|| self.replica.store().default_ttl());
        let entry = self.replica.write(key, encoded, ttl);
        let version = entry.version;
        debug!("SET {} v{} on {}", key, version, self.node_id);

        self.propagate(Mutation::set(entry, self.node_id.clone()), level)
            .await;
        Ok(version)
    }

    /// Delete on this node: drop the entry, tombstone it, then propagate
    pub(crate) async fn delete_local(&self, key: &str, level: ConsistencyLevel) -> bool {
        let (removed, tombstone) = self.replica.delete(key);
        debug!("DELETE {} v{} on {} (removed={})", key, tombstone.version, self.node_id, removed);

        self.propagate(Mutation::delete(tombstone, self.node_id.clone()), level)
            .await;
        removed
    }

    /// Queue for sync and replicate; only `strong` waits for replication
    async fn propagate(&self, mutation: Mutation, level: ConsistencyLevel) {
        self.sync.enqueue(mutation.clone());

        if level == ConsistencyLevel::Strong {
            self.replication.replicate(&mutation).await;
        } else {
            let replication = self.replication.clone();
            tokio::spawn(async move {
                replication.replicate(&mutation).await;
            });
        }
    }

    // ------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------

    /// Load score reported in heartbeats: store fill ratio
    fn load(&self) -> f64 {
        let max = self.replica.store().config().max_entries.max(1);
        (self.replica.store().len() as f64 / max as f64).clamp(0.0, 1.0)
    }

    fn heartbeat_message(&self, status: NodeStatus) -> ClusterMessage {
        ClusterMessage::Heartbeat {
            node_id: self.node_id.clone(),
            address: self.config.node_address.clone(),
            http_address: self.http_address.clone(),
            status,
            load: self.load(),
        }
    }

    /// Send one heartbeat to every known peer. A peer that acknowledges is
    /// alive, so it is recorded as active too.
    pub async fn heartbeat_once(&self) {
        self.registry.touch_local(self.load());
        let peers = self.registry.peers();
        let sends = peers.iter().map(|peer| {
            let message = self.heartbeat_message(NodeStatus::Active);
            async move {
                match self.forward(&peer.id, message).await {
                    Ok(ClusterResponse::HeartbeatAck { .. }) => {
                        self.registry.record_heartbeat(&peer.id, "", None, peer.load);
                    }
                    Ok(other) => debug!("Unexpected heartbeat reply from {}: {:?}", peer.id, other),
                    Err(e) => debug!("Heartbeat to {} failed: {}", peer.id, e),
                }
            }
        });
        join_all(sends).await;

        // Startup election only saw this node; redo it once peers are known
        if !self.membership_settled.swap(true, Ordering::SeqCst) {
            self.elector.elect();
        } else {
            self.elector.ensure_leader();
        }
    }

    /// Detect failed nodes, keep a leader and refresh gauges
    pub fn health_check_once(&self) -> HealthReport {
        let sync_stats = self.sync.stats();
        let report = self.health.run_check(HealthInputs {
            sync_queue_depth: self.sync.queue().len(),
            sync_queue_capacity: self.sync.queue().capacity(),
            retry_exhausted: sync_stats.retry_exhausted,
        });

        metrics::set_cluster_gauges(
            &self.node_id,
            report.active_nodes.len(),
            report.inactive_nodes.len(),
            report.unknown_nodes.len(),
            self.elector.is_leader(),
        );
        metrics::set_store_gauges(
            &self.node_id,
            self.replica.store().len(),
            self.replica.tombstones().len(),
        );
        metrics::set_sync_queue_depth(&self.node_id, report.sync_queue_depth);
        report
    }

    /// Sweep expired tombstones
    pub fn gc_once(&self) -> usize {
        let removed = self.replica.tombstones().sweep();
        if removed > 0 {
            debug!("Tombstone GC removed {} tombstone(s)", removed);
        }
        removed
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(Arc<CacheNode>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let node = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        info!("Starting {} task (interval={:?})", name, period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick(Arc::clone(&node)).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("{} task stopped", name);
        })
    }

    /// Spawn heartbeat, health check, sync drain, tombstone GC and expiry tasks
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Node {} already started", self.node_id);
            return;
        }
        info!("Starting cache node {}", self.node_id);

        tasks.push(self.spawn_periodic("heartbeat", self.config.heartbeat_interval(), |node| async move {
            node.heartbeat_once().await;
        }));
        tasks.push(self.spawn_periodic("health check", self.config.health_check_interval(), |node| async move {
            node.health_check_once();
        }));
        tasks.push(self.spawn_periodic("tombstone gc", self.config.gc_interval(), |node| async move {
            node.gc_once();
        }));
        tasks.push(
            self.sync
                .start(self.config.sync_interval(), self.shutdown_tx.subscribe()),
        );
        tasks.push(
            self.replica
                .store()
                .start_ttl_cleanup(self.shutdown_tx.subscribe()),
        );
    }

    /// Tell peers we are leaving, stop background tasks and wait for them
    pub async fn shutdown(&self) {
        info!("Shutting down cache node {}", self.node_id);

        let peers = self.registry.active_peers();
        let farewells = peers.iter().map(|peer| {
            let message = self.heartbeat_message(NodeStatus::Inactive);
            async move {
                let _ = self.forward(&peer.id, message).await;
            }
        });
        join_all(farewells).await;

        self.shutdown_tx.send_replace(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Cache node {} stopped", self.node_id);
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn router(&self) -> &PartitionRouter {
        &self.router
    }

    pub fn elector(&self) -> &LeaderElector {
        &self.elector
    }

    pub fn replica(&self) -> &LocalReplica {
        &self.replica
    }

    pub fn replication(&self) -> &ReplicationManager {
        &self.replication
    }

    pub fn sync(&self) -> &SyncQueueProcessor {
        &self.sync
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.elector.leader()
    }

    pub fn last_health_report(&self) -> Option<HealthReport> {
        self.health.last_report()
    }

    pub fn stats(&self) -> NodeStats {
        let store = self.replica.store().stats();
        NodeStats {
            node_id: self.node_id.clone(),
            leader: self.elector.leader(),
            is_leader: self.elector.is_leader(),
            consistency_level: self.config.consistency_level,
            partition_strategy: self.router.strategy(),
            codec: self.codec.name().to_string(),
            nodes_total: self.registry.len(),
            nodes_active: self.registry.active_nodes().len(),
            hit_rate: store.hit_rate(),
            store,
            tombstones: self.replica.tombstones().len(),
            replication: self.replication.stats(),
            last_replication: self.replication.last_outcome(),
            sync: self.sync.stats(),
            sync_queue_depth: self.sync.queue().len(),
            coordinator: self.counters.snapshot(),
        }
    }
}
