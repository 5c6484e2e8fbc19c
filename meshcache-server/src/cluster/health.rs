//! Health checks - failure detection and cluster health reporting

use super::election::LeaderElector;
use super::registry::NodeRegistry;
use super::types::{NodeId, NodeStatus};
use crate::core::now_millis;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Queue fill ratio above which the report flags backpressure
const QUEUE_PRESSURE_RATIO: f64 = 0.8;

/// Result of a health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub node_id: NodeId,
    pub checked_at: DateTime<Utc>,
    pub healthy: bool,
    pub issues: Vec<String>,
    pub leader: Option<NodeId>,
    pub active_nodes: Vec<NodeId>,
    pub inactive_nodes: Vec<NodeId>,
    pub unknown_nodes: Vec<NodeId>,
    pub sync_queue_depth: usize,
}

/// Local inputs the health check cannot read from the registry
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    pub sync_queue_depth: usize,
    pub sync_queue_capacity: usize,
    pub retry_exhausted: u64,
}

#[derive(Clone)]
pub struct HealthMonitor {
    registry: NodeRegistry,
    elector: LeaderElector,
    node_timeout: Duration,
    last_report: Arc<RwLock<Option<HealthReport>>>,
}

impl HealthMonitor {
    pub fn new(registry: NodeRegistry, elector: LeaderElector, node_timeout: Duration) -> Self {
        Self {
            registry,
            elector,
            node_timeout,
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    /// Detect timed-out nodes, keep a leader elected and build a report
    pub fn run_check(&self, inputs: HealthInputs) -> HealthReport {
        let newly_failed = self.registry.check_timeouts(now_millis(), self.node_timeout);
        let leader = self.elector.ensure_leader();

        let mut active = Vec::new();
        let mut inactive = Vec::new();
        let mut unknown = Vec::new();
        for node in self.registry.all_nodes() {
            match node.status {
                NodeStatus::Active => active.push(node.id),
                NodeStatus::Inactive => inactive.push(node.id),
                NodeStatus::Unknown => unknown.push(node.id),
            }
        }

        let mut issues = Vec::new();
        for id in &newly_failed {
            issues.push(format!("node {} stopped sending heartbeats", id));
        }
        if !inactive.is_empty() {
            issues.push(format!("{} inactive node(s): {}", inactive.len(), inactive.join(", ")));
        }
        if leader.is_none() {
            issues.push("no leader elected".to_string());
        }
        if inputs.sync_queue_capacity > 0 {
            let ratio = inputs.sync_queue_depth as f64 / inputs.sync_queue_capacity as f64;
            if ratio >= QUEUE_PRESSURE_RATIO {
                issues.push(format!(
                    "sync queue at {}/{} items",
                    inputs.sync_queue_depth, inputs.sync_queue_capacity
                ));
            }
        }
        if inputs.retry_exhausted > 0 {
            issues.push(format!(
                "{} sync item(s) dropped after exhausting retries",
                inputs.retry_exhausted
            ));
        }

        let report = HealthReport {
            node_id: self.registry.local_id().to_string(),
            checked_at: Utc::now(),
            healthy: newly_failed.is_empty() && inactive.is_empty() && leader.is_some(),
            issues,
            leader,
            active_nodes: active,
            inactive_nodes: inactive,
            unknown_nodes: unknown,
            sync_queue_depth: inputs.sync_queue_depth,
        };

        if !newly_failed.is_empty() {
            warn!("Health check: {} node(s) marked inactive", newly_failed.len());
        }
        if self.elector.is_leader() && !report.healthy {
            info!("Cluster health (leader view): {:?}", report.issues);
        }

        *self.last_report.write() = Some(report.clone());
        report
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::SeedNode;

    fn monitor(timeout: Duration) -> (NodeRegistry, HealthMonitor) {
        let registry = NodeRegistry::with_seeds(
            "node-a",
            "mem://node-a",
            &[SeedNode::new("node-b", "mem://node-b")],
        );
        let elector = LeaderElector::new(registry.clone());
        let monitor = HealthMonitor::new(registry.clone(), elector, timeout);
        (registry, monitor)
    }

    #[test]
    fn test_healthy_cluster() {
        let (registry, monitor) = monitor(Duration::from_secs(5));
        registry.record_heartbeat("node-b", "mem://node-b", None, 0.1);

        let report = monitor.run_check(HealthInputs::default());
        assert!(report.healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.leader.as_deref(), Some("node-a"));
        assert_eq!(report.active_nodes.len(), 2);
        assert!(monitor.last_report().is_some());
    }

    #[tokio::test]
    async fn test_silent_node_reported() {
        let (registry, monitor) = monitor(Duration::from_millis(20));
        registry.record_heartbeat("node-b", "mem://node-b", None, 0.1);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let report = monitor.run_check(HealthInputs::default());
        assert!(!report.healthy);
        assert_eq!(report.inactive_nodes, vec!["node-b".to_string()]);
        assert!(report.issues.iter().any(|i| i.contains("node-b")));
    }

    #[test]
    fn test_queue_pressure_issue() {
        let (registry, monitor) = monitor(Duration::from_secs(5));
        registry.record_heartbeat("node-b", "mem://node-b", None, 0.1);

        let report = monitor.run_check(HealthInputs {
            sync_queue_depth: 90,
            sync_queue_capacity: 100,
            retry_exhausted: 2,
        });
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.sync_queue_depth, 90);
    }
}
