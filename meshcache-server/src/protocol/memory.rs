//! In-process transport for tests and simulations
//!
//! Nodes register their handler under an address. Addresses can be taken
//! down to simulate crashes or partitions, and random delay/drop can be
//! injected.

use super::message::{ClusterResponse, Envelope};
use super::transport::{MessageHandler, Transport};
use crate::core::{CacheError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One delivered (or attempted) message
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub from: String,
    pub to: String,
    pub kind: &'static str,
    pub key: Option<String>,
    pub delivered: bool,
}

#[derive(Default)]
struct Faults {
    down: HashSet<String>,
    delay_ms: Option<(u64, u64)>,
    drop_rate: f64,
}

#[derive(Clone, Default)]
pub struct InMemoryTransport {
    handlers: Arc<RwLock<HashMap<String, Weak<dyn MessageHandler>>>>,
    faults: Arc<RwLock<Faults>>,
    log: Arc<RwLock<Vec<DeliveryRecord>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers are held weakly so nodes can be dropped normally
    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .insert(address.into(), Arc::downgrade(&handler));
    }

    pub fn unregister(&self, address: &str) {
        self.handlers.write().remove(address);
    }

    /// Take an address offline (or bring it back)
    pub fn set_down(&self, address: &str, down: bool) {
        let mut faults = self.faults.write();
        if down {
            faults.down.insert(address.to_string());
        } else {
            faults.down.remove(address);
        }
    }

    /// Random per-message latency in `[min, max]` milliseconds
    pub fn set_delay(&self, min_ms: u64, max_ms: u64) {
        self.faults.write().delay_ms = Some((min_ms, max_ms.max(min_ms)));
    }

    /// Probability in `[0, 1]` that a message is lost
    pub fn set_drop_rate(&self, rate: f64) {
        self.faults.write().drop_rate = rate.clamp(0.0, 1.0);
    }

    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.log.read().clone()
    }

    /// Delivered messages of `kind` addressed to `to`
    pub fn delivered_count(&self, to: &str, kind: &str) -> usize {
        self.log
            .read()
            .iter()
            .filter(|r| r.delivered && r.to == to && r.kind == kind)
            .count()
    }

    /// Attempts of `kind` from `from`, delivered or not
    pub fn attempts_from(&self, from: &str, kind: &str) -> Vec<DeliveryRecord> {
        self.log
            .read()
            .iter()
            .filter(|r| r.from == from && r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.write().clear();
    }

    fn record(&self, envelope: &Envelope, to: &str, delivered: bool) {
        self.log.write().push(DeliveryRecord {
            from: envelope.origin.clone(),
            to: to.to_string(),
            kind: envelope.message.kind(),
            key: envelope.message.key().map(str::to_string),
            delivered,
        });
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, address: &str, envelope: Envelope) -> Result<ClusterResponse> {
        let (down, delay, dropped) = {
            let faults = self.faults.read();
            let mut rng = rand::rng();
            let delay = faults
                .delay_ms
                .map(|(min, max)| Duration::from_millis(rng.random_range(min..=max)));
            let dropped = faults.drop_rate > 0.0 && rng.random_bool(faults.drop_rate);
            (faults.down.contains(address), delay, dropped)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let handler = self.handlers.read().get(address).and_then(Weak::upgrade);
        let handler = match handler {
            Some(handler) if !down && !dropped => handler,
            _ => {
                self.record(&envelope, address, false);
                return Err(CacheError::NodeUnavailable(address.to_string()));
            }
        };

        self.record(&envelope, address, true);
        Ok(handler.handle(envelope).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ClusterMessage;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, envelope: Envelope) -> ClusterResponse {
            match envelope.message {
                ClusterMessage::Get { key, .. } => ClusterResponse::Value(Some(key.into_bytes())),
                _ => ClusterResponse::Applied,
            }
        }
    }

    fn get(key: &str) -> Envelope {
        Envelope::new("node-a", ClusterMessage::Get { key: key.into(), consistency: None })
    }

    #[tokio::test]
    async fn test_delivery_and_log() {
        let transport = InMemoryTransport::new();
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
        transport.register("mem://node-b", echo.clone());

        let resp = transport.send("mem://node-b", get("k1")).await.unwrap();
        assert_eq!(resp, ClusterResponse::Value(Some(b"k1".to_vec())));
        assert_eq!(transport.delivered_count("mem://node-b", "get"), 1);
    }

    #[tokio::test]
    async fn test_down_address_is_unavailable() {
        let transport = InMemoryTransport::new();
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
        transport.register("mem://node-b", echo.clone());
        transport.set_down("mem://node-b", true);

        let result = transport.send("mem://node-b", get("k1")).await;
        assert!(matches!(result, Err(CacheError::NodeUnavailable(_))));
        assert_eq!(transport.attempts_from("node-a", "get").len(), 1);
        assert_eq!(transport.delivered_count("mem://node-b", "get"), 0);

        transport.set_down("mem://node-b", false);
        assert!(transport.send("mem://node-b", get("k1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_handler_is_unavailable() {
        let transport = InMemoryTransport::new();
        {
            let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
            transport.register("mem://node-b", echo);
        }
        let result = transport.send("mem://node-b", get("k1")).await;
        assert!(matches!(result, Err(CacheError::NodeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_full_drop_rate() {
        let transport = InMemoryTransport::new();
        let echo: Arc<dyn MessageHandler> = Arc::new(Echo);
        transport.register("mem://node-b", echo.clone());
        transport.set_drop_rate(1.0);

        assert!(transport.send("mem://node-b", get("k1")).await.is_err());
    }
}
