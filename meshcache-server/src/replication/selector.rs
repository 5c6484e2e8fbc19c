//! Replica selection policies

use crate::cluster::types::Node;

/// Chooses which active peers receive a mutation.
///
/// `peers` never contains the local node and only holds active nodes,
/// ordered by id.
pub trait ReplicaSelector: Send + Sync {
    fn select(&self, key: &str, peers: &[Node], count: usize) -> Vec<Node>;

    fn name(&self) -> &'static str;
}

/// First `count` active peers by id
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstActivePeers;

impl ReplicaSelector for FirstActivePeers {
    fn select(&self, _key: &str, peers: &[Node], count: usize) -> Vec<Node> {
        peers.iter().take(count).cloned().collect()
    }

    fn name(&self) -> &'static str {
        "first-active"
    }
}

/// The `count` least loaded active peers (ties broken by id)
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl ReplicaSelector for LeastLoaded {
    fn select(&self, _key: &str, peers: &[Node], count: usize) -> Vec<Node> {
        let mut sorted = peers.to_vec();
        sorted.sort_by(|a, b| a.load.total_cmp(&b.load).then_with(|| a.id.cmp(&b.id)));
        sorted.truncate(count);
        sorted
    }

    fn name(&self) -> &'static str {
        "least-loaded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, load: f64) -> Node {
        let mut node = Node::new(id, format!("mem://{}", id));
        node.load = load;
        node
    }

    #[test]
    fn test_first_active_peers() {
        let peers = vec![peer("node-b", 0.9), peer("node-c", 0.1), peer("node-d", 0.5)];
        let picked = FirstActivePeers.select("k", &peers, 2);
        let ids: Vec<_> = picked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["node-b", "node-c"]);
    }

    #[test]
    fn test_least_loaded() {
        let peers = vec![peer("node-b", 0.9), peer("node-c", 0.1), peer("node-d", 0.1)];
        let picked = LeastLoaded.select("k", &peers, 2);
        let ids: Vec<_> = picked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["node-c", "node-d"]);
    }

    #[test]
    fn test_count_larger_than_peers() {
        let peers = vec![peer("node-b", 0.0)];
        assert_eq!(FirstActivePeers.select("k", &peers, 5).len(), 1);
        assert_eq!(LeastLoaded.select("k", &peers, 5).len(), 1);
        assert!(FirstActivePeers.select("k", &peers, 0).is_empty());
    }
}
