//! Prometheus metrics for meshcache
//!
//! Every series carries a `node` label so several nodes can share one
//! process (tests, simulations) without mixing their numbers.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    // ============================================================================
    // Cache operations
    // ============================================================================

    /// Cache operations by type and result (hit, miss, ok, error, forwarded)
    pub static ref CACHE_OPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "meshcache_operations_total",
        "Total number of cache operations by type and result",
        &["node", "operation", "result"]
    ).unwrap();

    /// Cache operation latency in seconds
    pub static ref CACHE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "meshcache_operation_duration_seconds",
        "Cache operation latency in seconds",
        &["node", "operation"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]
    ).unwrap();

    /// Keys held in the local store
    pub static ref CACHE_KEYS: IntGaugeVec = register_int_gauge_vec!(
        "meshcache_keys",
        "Number of keys in the local store",
        &["node"]
    ).unwrap();

    /// Live tombstones
    pub static ref TOMBSTONES: IntGaugeVec = register_int_gauge_vec!(
        "meshcache_tombstones",
        "Number of live tombstones",
        &["node"]
    ).unwrap();

    // ============================================================================
    // Replication & sync
    // ============================================================================

    /// Replication attempts by status (success, stale, failure)
    pub static ref REPLICATION_TOTAL: IntCounterVec = register_int_counter_vec!(
        "meshcache_replication_total",
        "Replication attempts by status",
        &["node", "status"]
    ).unwrap();

    /// Sync outcomes (success, failure, conflict, conflict_unresolved, retry_exhausted, overflow)
    pub static ref SYNC_TOTAL: IntCounterVec = register_int_counter_vec!(
        "meshcache_sync_total",
        "Sync queue outcomes",
        &["node", "outcome"]
    ).unwrap();

    /// Pending items in the outbound sync queue
    pub static ref SYNC_QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "meshcache_sync_queue_depth",
        "Number of pending items in the sync queue",
        &["node"]
    ).unwrap();

    // ============================================================================
    // Cluster
    // ============================================================================

    /// Known nodes by status
    pub static ref CLUSTER_NODES: IntGaugeVec = register_int_gauge_vec!(
        "meshcache_cluster_nodes",
        "Known cluster nodes by status",
        &["node", "status"]
    ).unwrap();

    /// 1 if this node is the leader
    pub static ref IS_LEADER: IntGaugeVec = register_int_gauge_vec!(
        "meshcache_is_leader",
        "Whether this node currently leads the cluster",
        &["node"]
    ).unwrap();

    // ============================================================================
    // HTTP
    // ============================================================================

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "meshcache_http_requests_total",
        "Total HTTP requests",
        &["method", "path", "status"]
    ).unwrap();
}

/// Force registration of every metric
pub fn init_metrics() {
    let _ = &*CACHE_OPS_TOTAL;
    let _ = &*CACHE_OP_DURATION;
    let _ = &*CACHE_KEYS;
    let _ = &*TOMBSTONES;
    let _ = &*REPLICATION_TOTAL;
    let _ = &*SYNC_TOTAL;
    let _ = &*SYNC_QUEUE_DEPTH;
    let _ = &*CLUSTER_NODES;
    let _ = &*IS_LEADER;
    let _ = &*HTTP_REQUESTS_TOTAL;

    tracing::info!("Prometheus metrics initialized");
}

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_cache_op(node: &str, operation: &str, result: &str, duration_secs: f64) {
    CACHE_OPS_TOTAL
        .with_label_values(&[node, operation, result])
        .inc();
    CACHE_OP_DURATION
        .with_label_values(&[node, operation])
        .observe(duration_secs);
}

pub fn record_replication(node: &str, status: &str, count: u64) {
    REPLICATION_TOTAL
        .with_label_values(&[node, status])
        .inc_by(count);
}

pub fn record_sync(node: &str, outcome: &str) {
    SYNC_TOTAL.with_label_values(&[node, outcome]).inc();
}

pub fn set_sync_queue_depth(node: &str, depth: usize) {
    SYNC_QUEUE_DEPTH
        .with_label_values(&[node])
        .set(depth as i64);
}

pub fn set_store_gauges(node: &str, keys: usize, tombstones: usize) {
    CACHE_KEYS.with_label_values(&[node]).set(keys as i64);
    TOMBSTONES.with_label_values(&[node]).set(tombstones as i64);
}

pub fn set_cluster_gauges(node: &str, active: usize, inactive: usize, unknown: usize, leader: bool) {
    CLUSTER_NODES
        .with_label_values(&[node, "active"])
        .set(active as i64);
    CLUSTER_NODES
        .with_label_values(&[node, "inactive"])
        .set(inactive as i64);
    CLUSTER_NODES
        .with_label_values(&[node, "unknown"])
        .set(unknown as i64);
    IS_LEADER.with_label_values(&[node]).set(leader as i64);
}

pub fn record_http_request(method: &str, path: &str, status: u16) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, status.as_str()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_node_label() {
        record_sync("metrics-test-node", "success");
        set_sync_queue_depth("metrics-test-node", 3);

        let text = encode_metrics().unwrap();
        assert!(text.contains("meshcache_sync_total"));
        assert!(text.contains("node=\"metrics-test-node\""));
    }
}
