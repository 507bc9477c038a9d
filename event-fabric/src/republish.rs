//! The republish scheduler (§4.5): a periodic task that retries
//! undelivered events and marks ones that have aged out of the lookback
//! window as permanently `failed`.
//!
//! Shaped on the reconnect-loop workers elsewhere in this lineage: a
//! `tokio::select!` between the shutdown signal and an interval tick, so
//! the task exits promptly on shutdown instead of waiting out its period.

use std::sync::Arc;
use std::time::Duration;

use pos_shared::event::{OverallStatus, SubscriberStatus};
use pos_shared::util::now_millis;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ledger::{stale_since, LedgerStore};
use crate::publisher::EventFabric;

/// Default republish cadence (§4.5).
pub const DEFAULT_INTERVAL_SECS: u64 = 300;
/// Default lookback window: records older than this with no success are
/// marked permanently failed (§4.5, §9 "dedup marker TTL" baseline).
pub const DEFAULT_LOOKBACK_MILLIS: i64 = 24 * 3_600_000;
/// Default staleness threshold before a pending record is retried (§4.5).
pub const DEFAULT_FAILURE_THRESHOLD_MILLIS: i64 = 30 * 60_000;

pub struct RepublishScheduler<L: LedgerStore> {
    fabric: Arc<EventFabric<L>>,
    interval: Duration,
    lookback_millis: i64,
    failure_threshold_millis: i64,
}

impl<L: LedgerStore + 'static> RepublishScheduler<L> {
    pub fn new(fabric: Arc<EventFabric<L>>) -> Self {
        Self {
            fabric,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            lookback_millis: DEFAULT_LOOKBACK_MILLIS,
            failure_threshold_millis: DEFAULT_FAILURE_THRESHOLD_MILLIS,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_lookback_millis(mut self, lookback_millis: i64) -> Self {
        self.lookback_millis = lookback_millis;
        self
    }

    pub fn with_failure_threshold_millis(mut self, failure_threshold_millis: i64) -> Self {
        self.failure_threshold_millis = failure_threshold_millis;
        self
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("republish scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        info!("republish scheduler stopped");
    }

    async fn sweep(&self) {
        let now = now_millis();
        let undelivered = self.fabric.ledger().scan_undelivered();

        for status in undelivered {
            if now.saturating_sub(status.published_at) >= self.lookback_millis {
                error!(event_id = %status.event_id, "delivery aged past lookback with no success, marking failed");
                self.fabric
                    .ledger()
                    .update(&status.event_id, &mut |s| {
                        for sub in s.subscribers.iter_mut() {
                            if sub.status != SubscriberStatus::Received {
                                sub.status = SubscriberStatus::Failed;
                            }
                        }
                        s.overall_status = OverallStatus::Failed;
                        s.last_updated_at = now_millis();
                    });
                continue;
            }

            if !stale_since(&status, now, self.failure_threshold_millis) {
                continue;
            }

            warn!(event_id = %status.event_id, "republishing to pending subscribers");
            let pending_ids: Vec<String> = status
                .pending_subscribers()
                .map(|s| s.subscriber_id.clone())
                .collect();
            for subscriber_id in pending_ids {
                self.fabric
                    .deliver_once(status.topic, &status.event_id, &subscriber_id, &status.payload)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedgerStore, LedgerStore};
    use crate::publisher::{EventFabric, SidecarTransport};
    use async_trait::async_trait;
    use pos_shared::event::{DeliveryStatus, Topic};
    use std::collections::HashMap;

    struct NoopTransport;

    #[async_trait]
    impl SidecarTransport for NoopTransport {
        async fn send(&self, _subscriber_id: &str, _topic: Topic, _payload: &serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// A record whose `publishedAt` is already past the lookback window on
    /// the very first sweep must be marked `failed` — this is the path
    /// `scan_undelivered` previously filtered out before the scheduler
    /// ever saw it (§4.5, §8.1 invariant 3).
    #[tokio::test]
    async fn sweep_marks_a_record_aged_past_lookback_as_failed() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let ancient = now_millis() - 1_000_000;
        ledger.insert(DeliveryStatus::new("evt-stale", Topic::TranLog, serde_json::json!({}), &["journal".to_string()], ancient));

        let fabric = Arc::new(EventFabric::new(ledger, Arc::new(NoopTransport), HashMap::new()));
        let scheduler = RepublishScheduler::new(Arc::clone(&fabric)).with_lookback_millis(100);

        scheduler.sweep().await;

        let status = fabric.ledger().get("evt-stale").unwrap();
        assert_eq!(status.overall_status, OverallStatus::Failed);
        assert!(status.subscribers.iter().all(|s| s.status == SubscriberStatus::Failed));
    }

    /// A record that is merely stale (past the failure threshold but
    /// still within the lookback window) gets retried, not failed.
    #[tokio::test]
    async fn sweep_republishes_a_record_within_lookback_but_past_failure_threshold() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let recent = now_millis() - 1_000;
        ledger.insert(DeliveryStatus::new("evt-pending", Topic::TranLog, serde_json::json!({}), &["journal".to_string()], recent));

        let fabric = Arc::new(EventFabric::new(ledger, Arc::new(NoopTransport), HashMap::new()));
        let scheduler = RepublishScheduler::new(Arc::clone(&fabric))
            .with_lookback_millis(1_000_000)
            .with_failure_threshold_millis(100);

        scheduler.sweep().await;

        let status = fabric.ledger().get("evt-pending").unwrap();
        assert_ne!(status.overall_status, OverallStatus::Failed);
    }
}
