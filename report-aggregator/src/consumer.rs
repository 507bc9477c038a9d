//! The idempotent consumption template (§4.6) applied to C11. A
//! transaction event is deduped via the state store (C2) and written,
//! once, into this service's own `report_transaction` table — report
//! aggregation never reads cart-engine's `transaction` table directly,
//! per §6.4's "each service owns its collections; no cross-tenant joins."
//!
//! Grounded on `journal-consumer::consumer`'s two-phase shape, narrowed
//! down to the one topic this service actually subscribes to (the
//! `tran_log` fan-out entry in `cart-engine::main::subscribers_by_topic`).

use std::sync::Arc;

use cart_engine::cache::{dedup_key, dedup_ttl, StateStore};
use cart_engine::store::{with_optimistic_retry, RetryConfig, TenantStore};
use pos_shared::event::{Topic, TransactionEvent};
use pos_shared::{AppError, AppResult, ErrorCode};

/// This service's own copy of finalized transaction documents (§6.4),
/// queried by the aggregation pipeline — never cart-engine's `transaction`
/// table.
pub const REPORT_TRANSACTION_TABLE: &str = "report_transaction";

/// What happened to one incoming fabric event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Missing/empty `eventId`, or a topic this service has no use for —
    /// dropped without touching the store.
    Dropped,
    /// A dedup marker already existed for this event; no side effects were
    /// (re-)applied.
    Duplicate { event_id: String },
    /// First time seen; the transaction document was stored.
    Processed { event_id: String },
}

fn extract_event_id(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("eventId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Apply the §4.6 template to one delivered event. Never returns `Err` for
/// the benign drop/duplicate paths — only for genuine processing failures
/// (a payload that doesn't match `TransactionEvent`, or a store write
/// failure).
pub async fn consume(store: &TenantStore, state: &Arc<dyn StateStore>, topic: Topic, payload: serde_json::Value) -> AppResult<ConsumeOutcome> {
    let Some(event_id) = extract_event_id(&payload) else {
        tracing::info!(code = ErrorCode::MalformedEvent.code(), topic = topic.as_str(), "dropping health-probe/missing-eventId delivery");
        return Ok(ConsumeOutcome::Dropped);
    };

    if !matches!(topic, Topic::TranLog) {
        tracing::info!(event_id, topic = topic.as_str(), "report-aggregator has no subscription to this topic, dropping");
        return Ok(ConsumeOutcome::Dropped);
    }

    let reserved = state.set_if_absent(&dedup_key(&event_id), event_id.clone().into_bytes(), dedup_ttl()).await;
    if !reserved {
        tracing::info!(code = ErrorCode::DuplicateEventDropped.code(), event_id, "duplicate event, skipping side effects");
        return Ok(ConsumeOutcome::Duplicate { event_id });
    }

    let event: TransactionEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            // Same rollback as a failed write: the marker was reserved
            // before the payload proved malformed, so a corrected
            // republish must not be dropped as a duplicate.
            state.delete(&dedup_key(&event_id)).await;
            return Err(AppError::new(ErrorCode::MalformedEvent, format!("invalid transaction event: {e}")));
        }
    };
    let tenant_id = event.terminal_ref.tenant_id.clone();
    let transaction = event.transaction;

    let write_result = with_optimistic_retry(RetryConfig::default(), || {
        let store = store.clone();
        let tenant_id = tenant_id.clone();
        let transaction = transaction.clone();
        let event_id = event_id.clone();
        async move {
            store
                .put(&tenant_id, REPORT_TRANSACTION_TABLE, &event_id, transaction)
                .await
                .map_err(|e| AppError::new(ErrorCode::DedupWriteFailed, format!("writing report_transaction entry failed: {}", e.system_message)))
        }
    })
    .await;

    if let Err(err) = write_result {
        // The side effect never landed; drop the dedup marker so a
        // retried delivery of the same event is not swallowed with
        // nothing ever persisted (§8.1 invariant 4).
        state.delete(&dedup_key(&event_id)).await;
        return Err(err);
    }

    Ok(ConsumeOutcome::Processed { event_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cart_engine::cache::InMemoryStateStore;
    use pos_shared::ids::{Ambient, SessionCounters, TerminalRef};
    use pos_shared::transaction::{Transaction, TransactionType};

    fn sample_transaction_payload(event_id: &str, total_with_tax: f64) -> serde_json::Value {
        let tx = Transaction {
            transaction_no: 1,
            receipt_no: 1,
            terminal_ref: TerminalRef::new("t1", "s1", "1"),
            transaction_type: TransactionType::NormalSale,
            origin_transaction_no: None,
            session: SessionCounters::opening("20260101", 1),
            line_items: vec![],
            subtotal_discounts: vec![],
            tax_allocations: vec![],
            payments: vec![],
            total_with_tax,
            net_due: 0.0,
            staff_ref: None,
            is_cancelled: false,
            ambient: Ambient::new(0, "transaction"),
        };
        let event = TransactionEvent {
            event_id: event_id.to_string(),
            terminal_ref: tx.terminal_ref.clone(),
            transaction: tx,
            receipt_text: "receipt".to_string(),
            journal_text: "journal".to_string(),
            published_at: 0,
        };
        serde_json::to_value(event).unwrap()
    }

    async fn store() -> TenantStore {
        let dir = tempfile::tempdir().unwrap();
        TenantStore::connect(dir.path().to_str().unwrap(), "test".to_string()).await.unwrap()
    }

    #[tokio::test]
    async fn drops_events_with_no_event_id() {
        let store = store().await;
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let outcome = consume(&store, &state, Topic::TranLog, serde_json::json!({"ping": true})).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Dropped);
    }

    #[tokio::test]
    async fn drops_topics_it_does_not_subscribe_to() {
        let store = store().await;
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let payload = serde_json::json!({"eventId": "evt-cash-1"});
        let outcome = consume(&store, &state, Topic::CashLog, payload).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Dropped);
    }

    #[tokio::test]
    async fn second_consume_of_same_event_is_duplicate() {
        let store = store().await;
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let payload = sample_transaction_payload("evt-dup", 100.0);

        let first = consume(&store, &state, Topic::TranLog, payload.clone()).await.unwrap();
        assert!(matches!(first, ConsumeOutcome::Processed { .. }));

        let second = consume(&store, &state, Topic::TranLog, payload).await.unwrap();
        assert!(matches!(second, ConsumeOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn processed_transaction_is_queryable_from_its_own_table() {
        let store = store().await;
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let payload = sample_transaction_payload("evt-query", 250.0);
        consume(&store, &state, Topic::TranLog, payload).await.unwrap();

        let stored: Option<Transaction> = store.get("t1", REPORT_TRANSACTION_TABLE, "evt-query").await.unwrap();
        assert_eq!(stored.unwrap().total_with_tax, 250.0);
    }

    #[tokio::test]
    async fn malformed_transaction_payload_is_rejected() {
        let store = store().await;
        let state: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let payload = serde_json::json!({"eventId": "evt-1", "notATransaction": true});
        let err = consume(&store, &state, Topic::TranLog, payload).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MalformedEvent);
    }
}
