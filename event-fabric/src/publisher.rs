//! The publish and acknowledgement paths of the event fabric (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use pos_shared::event::{DeliveryStatus, Topic};
use pos_shared::util::now_millis;
use pos_shared::{AppError, AppResult};
use tracing::{info, warn};

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::ledger::LedgerStore;

/// Abstraction over "the sidecar publish operation" (§4.5 step 2) — in
/// production this is an HTTP or broker call to a subscriber's delivery
/// endpoint; tests substitute an in-process stub.
#[async_trait]
pub trait SidecarTransport: Send + Sync {
    async fn send(&self, subscriber_id: &str, topic: Topic, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// `reqwest`-backed transport calling each subscriber's configured
/// delivery webhook.
pub struct HttpSidecarTransport {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpSidecarTransport {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl SidecarTransport for HttpSidecarTransport {
    async fn send(&self, subscriber_id: &str, topic: Topic, payload: &serde_json::Value) -> anyhow::Result<()> {
        let endpoint = self
            .endpoints
            .get(subscriber_id)
            .ok_or_else(|| anyhow::anyhow!("no endpoint configured for subscriber {subscriber_id}"))?;
        let body = serde_json::json!({ "topic": topic.as_str(), "payload": payload });
        self.client.post(endpoint).json(&body).send().await?.error_for_status()?;
        Ok(())
    }
}

/// The event fabric facade consumed by `cart-engine` and the consumer
/// binaries: owns the delivery ledger, one breaker per subscriber, and the
/// sidecar transport.
pub struct EventFabric<L: LedgerStore> {
    ledger: Arc<L>,
    transport: Arc<dyn SidecarTransport>,
    breakers: DashMap<String, CircuitBreaker>,
    subscribers_by_topic: HashMap<Topic, Vec<String>>,
}

impl<L: LedgerStore + 'static> EventFabric<L> {
    pub fn new(
        ledger: Arc<L>,
        transport: Arc<dyn SidecarTransport>,
        subscribers_by_topic: HashMap<Topic, Vec<String>>,
    ) -> Self {
        Self {
            ledger,
            transport,
            breakers: DashMap::new(),
            subscribers_by_topic,
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    fn breaker_for(&self, subscriber_id: &str) -> CircuitBreaker {
        self.breakers
            .entry(subscriber_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(subscriber_id))
            .clone()
    }

    /// Publish path (§4.5 steps 1-3): record the ledger entry, then kick
    /// off best-effort delivery to every subscriber without blocking the
    /// caller on their completion.
    pub async fn publish(
        self: &Arc<Self>,
        topic: Topic,
        event_id: &str,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        let subscriber_ids = self.subscribers_by_topic.get(&topic).cloned().unwrap_or_default();
        let now = now_millis();
        self.ledger
            .insert(DeliveryStatus::new(event_id.to_string(), topic, payload.clone(), &subscriber_ids, now));

        for subscriber_id in subscriber_ids {
            let fabric = Arc::clone(self);
            let event_id = event_id.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                fabric.deliver_once(topic, &event_id, &subscriber_id, &payload).await;
            });
        }

        Ok(())
    }

    /// One best-effort delivery attempt to a single subscriber, guarded by
    /// that subscriber's breaker. Never deletes the ledger entry on
    /// failure — the republish scheduler owns retrying it.
    pub async fn deliver_once(&self, topic: Topic, event_id: &str, subscriber_id: &str, payload: &serde_json::Value) {
        let breaker = self.breaker_for(subscriber_id);
        let transport = Arc::clone(&self.transport);
        let payload = payload.clone();
        let result = breaker
            .call(|| async move { transport.send(subscriber_id, topic, &payload).await })
            .await;

        match result {
            Ok(()) => {
                info!(event_id, subscriber_id, "delivered");
            }
            Err(BreakerError::Open(name)) => {
                warn!(event_id, subscriber = %name, "breaker open, delivery skipped");
            }
            Err(BreakerError::Inner(err)) => {
                warn!(event_id, subscriber_id, error = %err, "delivery attempt failed");
            }
        }
    }

    /// Acknowledgement path (§4.5): a subscriber reports the outcome of
    /// consuming `eventId`; overall status is recomputed and never
    /// regresses (enforced by `OverallStatus::derive`, which only reaches
    /// `delivered` once every subscriber is `received`).
    pub fn acknowledge(&self, event_id: &str, subscriber_id: &str, success: bool) -> AppResult<()> {
        let now = now_millis();
        if self.ledger.get(event_id).is_none() {
            return Err(AppError::not_found(format!("no delivery record for event {event_id}")));
        }
        self.ledger
            .update(event_id, &mut |status| status.record(subscriber_id, success, now));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedgerStore;
    use pos_shared::event::OverallStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SidecarTransport for StubTransport {
        async fn send(&self, _subscriber_id: &str, _topic: Topic, _payload: &serde_json::Value) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("stub failure")
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn publish_then_all_subscribers_ack_reaches_delivered() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0), fail: false });
        let mut subs = HashMap::new();
        subs.insert(Topic::TranLog, vec!["journal".to_string(), "report".to_string()]);
        let fabric = Arc::new(EventFabric::new(ledger, transport, subs));

        fabric.publish(Topic::TranLog, "evt-1", serde_json::json!({"x": 1})).await.unwrap();

        fabric.acknowledge("evt-1", "journal", true).unwrap();
        fabric.acknowledge("evt-1", "report", true).unwrap();

        let status = fabric.ledger().get("evt-1").unwrap();
        assert_eq!(status.overall_status, OverallStatus::Delivered);
    }

    #[tokio::test]
    async fn acknowledge_unknown_event_is_not_found() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let transport = Arc::new(StubTransport { calls: AtomicUsize::new(0), fail: false });
        let fabric = Arc::new(EventFabric::new(ledger, transport, HashMap::new()));

        let err = fabric.acknowledge("missing", "journal", true).unwrap_err();
        assert_eq!(err.kind(), pos_shared::ErrorKind::NotFound);
    }
}
