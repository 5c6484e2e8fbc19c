// Cluster Scenario Tests
// Multi-node behaviour over the in-process transport

use meshcache_server::node::ApplyMode;
use meshcache_server::protocol::{KeyState, Mutation};
use meshcache_server::sync::Resolution;
use meshcache_server::{
    CacheEntry, CacheError, CacheNode, ClusterConfig, ClusterMessage, ClusterResponse,
    ConflictHandler, ConflictStrategy, ConsistencyLevel, Envelope, ForwardFailurePolicy,
    GetOptions, InMemoryTransport, NodeStatus, PartitionStrategy, SeedNode, SetOptions, Transport,
};
use std::sync::Arc;
use std::time::Duration;

const IDS: [&str; 3] = ["node-a", "node-b", "node-c"];

fn addr(id: &str) -> String {
    format!("mem://{}", id)
}

fn node_config(id: &str, consistency: ConsistencyLevel) -> ClusterConfig {
    ClusterConfig {
        node_id: Some(id.to_string()),
        node_address: addr(id),
        cluster_nodes: IDS.iter().map(|id| SeedNode::new(*id, addr(id))).collect(),
        replication_factor: 2,
        consistency_level: consistency,
        partition_strategy: PartitionStrategy::Hash,
        request_timeout_ms: 500,
        ..ClusterConfig::default()
    }
}

struct TestCluster {
    transport: InMemoryTransport,
    nodes: Vec<Arc<CacheNode>>,
}

impl TestCluster {
    async fn start_with(configure: impl Fn(&mut ClusterConfig)) -> Self {
        let transport = InMemoryTransport::new();
        let mut nodes = Vec::new();
        for id in IDS {
            let mut config = node_config(id, ConsistencyLevel::Strong);
            configure(&mut config);
            let node = CacheNode::builder(config)
                .transport(Arc::new(transport.clone()))
                .build()
                .unwrap();
            transport.register(addr(id), node.clone());
            nodes.push(node);
        }
        for node in &nodes {
            node.heartbeat_once().await;
        }
        transport.clear_log();
        Self { transport, nodes }
    }

    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    fn node(&self, id: &str) -> &Arc<CacheNode> {
        self.nodes.iter().find(|n| n.node_id() == id).unwrap()
    }

    fn owner_of(&self, key: &str) -> &Arc<CacheNode> {
        let owner = self.nodes[0].router().owner_of(key).unwrap();
        self.node(&owner)
    }

    fn non_owners(&self, key: &str) -> Vec<&Arc<CacheNode>> {
        let owner = self.nodes[0].router().owner_of(key).unwrap();
        self.nodes.iter().filter(|n| n.node_id() != owner).collect()
    }
}

#[tokio::test]
async fn test_heartbeats_converge_membership_and_leader() {
    let cluster = TestCluster::start().await;

    for node in &cluster.nodes {
        assert_eq!(node.registry().active_nodes().len(), 3);
        assert_eq!(node.leader().as_deref(), Some("node-a"));
    }
    assert!(cluster.node("node-a").elector().is_leader());
    assert!(!cluster.node("node-b").elector().is_leader());
}

#[tokio::test]
async fn test_all_nodes_agree_on_owner() {
    let cluster = TestCluster::start().await;

    for key in ["a", "user:1", "session:42", "x"] {
        let owners: Vec<String> = cluster
            .nodes
            .iter()
            .map(|n| n.router().owner_of(key).unwrap())
            .collect();
        assert!(owners.windows(2).all(|w| w[0] == w[1]), "key {}", key);
    }
}

#[tokio::test]
async fn test_set_on_owner_replicates_to_two_peers() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("a");

    owner.set("a", b"1".to_vec()).await.unwrap();

    for peer in cluster.non_owners("a") {
        assert_eq!(
            cluster.transport.delivered_count(&addr(peer.node_id()), "replicate"),
            1
        );
        let replica = peer.replica().store().peek("a").unwrap();
        assert_eq!(replica.version, 1);
        assert_eq!(replica.owner, owner.node_id());
    }
    assert_eq!(owner.get("a").await.unwrap(), Some(b"1".to_vec()));

    let outcome = owner.replication().last_outcome().unwrap();
    assert_eq!(outcome.targets.len(), 2);
    assert!(outcome.is_complete());
}

#[tokio::test]
async fn test_writes_are_forwarded_to_owner() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("user:1");
    let others = cluster.non_owners("user:1");

    others[0].set("user:1", b"alice".to_vec()).await.unwrap();

    assert_eq!(
        cluster.transport.delivered_count(&addr(owner.node_id()), "set"),
        1
    );
    let stored = owner.replica().store().peek("user:1").unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.owner, owner.node_id());

    assert_eq!(
        others[1].get("user:1").await.unwrap(),
        Some(b"alice".to_vec())
    );
    assert!(others[0].stats().coordinator.forwarded >= 1);
}

#[tokio::test]
async fn test_versions_increase_per_key() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("counter");

    owner.set("counter", b"1".to_vec()).await.unwrap();
    owner.set("counter", b"2".to_vec()).await.unwrap();
    owner.delete("counter").await.unwrap();
    owner.set("counter", b"3".to_vec()).await.unwrap();

    let state = owner.replica().key_state("counter");
    assert_eq!(state.version(), 4);
    assert!(state.tombstone.is_none());
    assert_eq!(owner.get("counter").await.unwrap(), Some(b"3".to_vec()));
}

#[tokio::test]
async fn test_stale_update_after_delete_is_rejected() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("k");
    let peer = cluster.non_owners("k")[0].clone();

    owner.set("k", b"v1".to_vec()).await.unwrap();
    assert!(owner.delete("k").await.unwrap());
    assert!(peer.replica().tombstones().is_live("k"));

    // A replica still holding v1 pushes it back to the owner
    let old = CacheEntry::new("k", b"v1".to_vec(), None, 1, peer.node_id());
    let envelope = Envelope::new(
        peer.node_id().to_string(),
        ClusterMessage::Sync {
            item_id: "late".to_string(),
            mutation: Mutation::set(old, peer.node_id()),
        },
    );
    let response = cluster
        .transport
        .send(&addr(owner.node_id()), envelope)
        .await
        .unwrap();

    match response {
        ClusterResponse::Stale(KeyState { tombstone, .. }) => {
            assert_eq!(tombstone.unwrap().version, 2);
        }
        other => panic!("expected stale reply, got {:?}", other),
    }
    assert_eq!(owner.get("k").await.unwrap(), None);
    assert_eq!(peer.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_delete_of_missing_key_still_tombstones() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("ghost");

    assert!(!owner.delete("ghost").await.unwrap());
    for node in &cluster.nodes {
        assert!(node.replica().tombstones().is_live("ghost"));
    }
}

#[tokio::test]
async fn test_fallback_read_when_owner_down() {
    let cluster = TestCluster::start_with(|c| c.consistency_level = ConsistencyLevel::Eventual).await;
    let owner = cluster.owner_of("a");
    let reader = cluster.non_owners("a")[0].clone();

    owner
        .set_with(
            "a",
            b"1".to_vec(),
            SetOptions::default().with_consistency(ConsistencyLevel::Strong),
        )
        .await
        .unwrap();
    cluster.transport.set_down(&addr(owner.node_id()), true);

    assert_eq!(reader.get("a").await.unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.stats().coordinator.fallback_reads, 1);

    let strong = reader
        .get_with("a", GetOptions::default().with_consistency(ConsistencyLevel::Strong))
        .await;
    assert!(matches!(strong, Err(CacheError::NodeUnavailable(_))));
}

#[tokio::test]
async fn test_weak_fallback_never_queries_peers() {
    let cluster = TestCluster::start_with(|c| c.consistency_level = ConsistencyLevel::Weak).await;
    let owner = cluster.owner_of("b");
    let reader = cluster.non_owners("b")[0].clone();

    cluster.transport.set_down(&addr(owner.node_id()), true);
    assert_eq!(reader.get("b").await.unwrap(), None);
    assert!(cluster.transport.attempts_from(reader.node_id(), "fetch").is_empty());
}

#[tokio::test]
async fn test_eventual_fallback_repairs_from_peers() {
    let cluster = TestCluster::start_with(|c| c.consistency_level = ConsistencyLevel::Eventual).await;
    let owner = cluster.owner_of("r");
    let others = cluster.non_owners("r");
    let (holder, reader) = (others[0].clone(), others[1].clone());

    // Only one replica holds the key
    let entry = CacheEntry::new("r", b"repaired".to_vec(), None, 3, owner.node_id());
    holder
        .replica()
        .apply(&Mutation::set(entry, owner.node_id()), ApplyMode::Newer);
    cluster.transport.set_down(&addr(owner.node_id()), true);

    assert_eq!(reader.get("r").await.unwrap(), Some(b"repaired".to_vec()));
    assert_eq!(reader.replica().key_state("r").version(), 3);
    assert_eq!(reader.stats().coordinator.read_repairs, 1);
}

#[tokio::test]
async fn test_forward_failure_policy() {
    let failing = TestCluster::start().await;
    let owner = failing.owner_of("w");
    let writer = failing.non_owners("w")[0].clone();
    failing.transport.set_down(&addr(owner.node_id()), true);

    let result = writer.set("w", b"1".to_vec()).await;
    assert!(matches!(result, Err(CacheError::NodeUnavailable(_))));
    assert!(writer.replica().store().peek("w").is_none());

    let local = TestCluster::start_with(|c| {
        c.forward_failure_policy = ForwardFailurePolicy::Local;
    })
    .await;
    let owner = local.owner_of("w");
    let writer = local.non_owners("w")[0].clone();
    local.transport.set_down(&addr(owner.node_id()), true);

    writer.set("w", b"1".to_vec()).await.unwrap();
    let entry = writer.replica().store().peek("w").unwrap();
    assert_eq!(entry.owner, writer.node_id());
    assert_eq!(writer.stats().coordinator.local_fallback_writes, 1);
    // Queued so the owner catches up once it is back
    assert_eq!(writer.sync().queue().len(), 1);
}

#[tokio::test]
async fn test_sync_delivers_to_recovered_peer() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("s");
    let lagging = cluster.non_owners("s")[0].clone();
    let lagging_addr = addr(lagging.node_id());

    cluster.transport.set_down(&lagging_addr, true);
    owner.set("s", b"v".to_vec()).await.unwrap();
    assert!(lagging.replica().store().peek("s").is_none());
    assert_eq!(owner.replication().stats().failures, 1);

    cluster.transport.set_down(&lagging_addr, false);
    let report = owner.sync().process_batch().await;

    assert_eq!(report.processed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(cluster.transport.delivered_count(&lagging_addr, "sync"), 1);
    assert_eq!(lagging.replica().store().peek("s").unwrap().version, 1);
    assert!(owner.sync().queue().is_empty());
}

#[tokio::test]
async fn test_leader_reelected_after_shutdown_announcement() {
    let cluster = TestCluster::start().await;
    let leader = cluster.node("node-a");

    leader.shutdown().await;
    cluster.transport.set_down(&addr("node-a"), true);

    for id in ["node-b", "node-c"] {
        let node = cluster.node(id);
        assert_eq!(
            node.registry().get("node-a").unwrap().status,
            NodeStatus::Inactive
        );
        assert_eq!(node.leader().as_deref(), Some("node-b"));
    }
    assert!(cluster.node("node-b").elector().is_leader());
}

#[tokio::test]
async fn test_leader_reelected_after_timeout() {
    let cluster = TestCluster::start_with(|c| {
        c.heartbeat_interval_ms = 10;
        c.node_timeout_ms = 50;
    })
    .await;
    cluster.transport.set_down(&addr("node-a"), true);

    tokio::time::sleep(Duration::from_millis(120)).await;
    for id in ["node-b", "node-c"] {
        cluster.node(id).heartbeat_once().await;
    }

    let report = cluster.node("node-b").health_check_once();
    assert_eq!(report.inactive_nodes, vec!["node-a".to_string()]);
    assert_eq!(report.leader.as_deref(), Some("node-b"));

    // Leadership stays put while the new leader is alive
    cluster.node("node-b").heartbeat_once().await;
    assert_eq!(cluster.node("node-b").leader().as_deref(), Some("node-b"));
}

#[tokio::test]
async fn test_background_tasks_start_and_stop() {
    let cluster = TestCluster::start_with(|c| {
        c.heartbeat_interval_ms = 20;
        c.node_timeout_ms = 200;
        c.sync_interval_ms = 20;
        c.health_check_interval_ms = 20;
    })
    .await;

    for node in &cluster.nodes {
        node.start();
        assert!(node.is_running());
    }
    cluster.nodes[0].set("bg", b"1".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(cluster.nodes[0].last_health_report().is_some());
    for node in &cluster.nodes {
        node.shutdown().await;
        assert!(!node.is_running());
    }
}

struct PreferTheirs;

impl ConflictHandler for PreferTheirs {
    fn resolve(&self, _key: &str, _ours: &Mutation, _theirs: &Mutation) -> meshcache_server::Result<Resolution> {
        Ok(Resolution::AdoptRemote)
    }
}

#[tokio::test]
async fn test_custom_strategy_requires_handler() {
    let mut config = node_config("node-a", ConsistencyLevel::Eventual);
    config.conflict_resolution_strategy = ConflictStrategy::Custom;

    let missing = CacheNode::builder(config.clone())
        .transport(Arc::new(InMemoryTransport::new()))
        .build();
    assert!(matches!(missing, Err(CacheError::InvalidConfig(_))));

    let with_handler = CacheNode::builder(config)
        .transport(Arc::new(InMemoryTransport::new()))
        .conflict_handler(Arc::new(PreferTheirs))
        .build();
    assert!(with_handler.is_ok());
}

#[tokio::test]
async fn test_local_delete_hides_owner_value_until_synced() {
    let cluster = TestCluster::start_with(|c| {
        c.forward_failure_policy = ForwardFailurePolicy::Local;
    })
    .await;
    let owner = cluster.owner_of("k");
    let reader = cluster.non_owners("k")[0].clone();
    let owner_addr = addr(owner.node_id());

    owner.set("k", b"old".to_vec()).await.unwrap();
    cluster.transport.set_down(&owner_addr, true);
    assert!(reader.delete("k").await.unwrap());
    assert!(reader.replica().tombstones().is_live("k"));

    // Owner is back but has not received the delete yet
    cluster.transport.set_down(&owner_addr, false);
    assert_eq!(owner.get("k").await.unwrap(), Some(b"old".to_vec()));
    assert_eq!(reader.get("k").await.unwrap(), None);
    assert!(reader.replica().store().peek("k").is_none());

    reader.sync().process_batch().await;
    assert_eq!(owner.get("k").await.unwrap(), None);
    assert!(owner.replica().tombstones().is_live("k"));
}

#[tokio::test]
async fn test_writes_reach_peers_that_were_inactive() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("late");
    let peers = cluster.non_owners("late");

    for peer in &peers {
        owner
            .registry()
            .mark_status(peer.node_id(), NodeStatus::Inactive)
            .unwrap();
    }
    owner.set("late", b"v".to_vec()).await.unwrap();
    assert_eq!(owner.sync().queue().len(), 1);
    assert_eq!(cluster.transport.attempts_from(owner.node_id(), "replicate").len(), 0);

    // Peers answer heartbeats again
    owner.heartbeat_once().await;
    let report = owner.sync().process_batch().await;

    assert_eq!(report.completed, 1);
    for peer in peers {
        assert_eq!(peer.replica().store().peek("late").unwrap().version, 1);
    }
    assert!(owner.sync().queue().is_empty());
}

#[tokio::test]
async fn test_forwarded_read_uses_caller_consistency() {
    let cluster = TestCluster::start().await;
    let owner = cluster.owner_of("r");
    let others = cluster.non_owners("r");
    let (holder, reader) = (others[0].clone(), others[1].clone());

    let entry = CacheEntry::new("r", b"repaired".to_vec(), None, 3, owner.node_id());
    holder
        .replica()
        .apply(&Mutation::set(entry, owner.node_id()), ApplyMode::Newer);

    // The owner runs strong by configuration and does not repair on a miss
    assert_eq!(reader.get("r").await.unwrap(), None);

    let eventual = reader
        .get_with("r", GetOptions::default().with_consistency(ConsistencyLevel::Eventual))
        .await
        .unwrap();
    assert_eq!(eventual, Some(b"repaired".to_vec()));
    assert_eq!(owner.replica().key_state("r").version(), 3);
}
