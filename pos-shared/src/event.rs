//! Wire events published onto the event fabric (§3.4, C3) and the
//! per-subscriber delivery ledger (§3.5, C4).

use serde::{Deserialize, Serialize};

use crate::ids::{SessionCounters, TerminalRef};
use crate::transaction::{Transaction, TransactionType};

/// The three publication topics (§3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    TranLog,
    CashLog,
    OpenCloseLog,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::TranLog => "tran_log",
            Topic::CashLog => "cash_log",
            Topic::OpenCloseLog => "open_close_log",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized topic: {0}")]
pub struct InvalidTopic(pub String);

impl std::str::FromStr for Topic {
    type Err = InvalidTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tran_log" => Ok(Topic::TranLog),
            "cash_log" => Ok(Topic::CashLog),
            "open_close_log" => Ok(Topic::OpenCloseLog),
            other => Err(InvalidTopic(other.to_string())),
        }
    }
}

/// A sale/return/void event, published to `tran_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub event_id: String,
    pub terminal_ref: TerminalRef,
    pub transaction: Transaction,
    /// Rendered once at finalize by C9's formatter registry (§4.4 step 3)
    /// so the journal consumer (§3.6) doesn't need to re-derive them.
    pub receipt_text: String,
    pub journal_text: String,
    pub published_at: i64,
}

/// A cash-in/cash-out event, published to `cash_log` (§3.4, C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashEvent {
    pub event_id: String,
    pub terminal_ref: TerminalRef,
    pub session: SessionCounters,
    /// `CashIn` or `CashOut` — the sign lives in `amount`, the type code
    /// lives here so the journal consumer (§4.6) doesn't have to re-derive it.
    pub transaction_type: TransactionType,
    /// Positive for cash-in, negative for cash-out (§3.4).
    pub amount: f64,
    pub reason: Option<String>,
    pub staff_ref: Option<String>,
    pub published_at: i64,
}

/// The reconciliation block carried by a close `SessionEvent` (§3.4, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReconciliation {
    pub transaction_count: u64,
    pub last_transaction_no: Option<i64>,
    pub cash_movement_count: u64,
    pub theoretical_cash: f64,
    pub difference: f64,
}

/// A terminal open/close/business-date-advance event, published to
/// `open_close_log` (§3.4, C12).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub event_id: String,
    pub terminal_ref: TerminalRef,
    pub session: SessionCounters,
    /// `SessionOpen` or `SessionClose`.
    pub transaction_type: TransactionType,
    pub initial_cash: f64,
    /// Only set on close (§4.7).
    pub counted_cash: Option<f64>,
    /// Only set on close (§4.7).
    pub reconciliation: Option<SessionReconciliation>,
    pub published_at: i64,
}

/// One subscriber's delivery state for a published event (§3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    Pending,
    Received,
    Failed,
}

/// Aggregate status across all subscribers of one event (§3.5). Transitions
/// are forward-only: an event's overall status never regresses once every
/// subscriber has reported (§8.1 invariant 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Published,
    Delivered,
    PartiallyDelivered,
    Failed,
}

impl OverallStatus {
    /// Recompute the overall status from the current per-subscriber states.
    pub fn derive(subscribers: &[SubscriberEntry]) -> Self {
        if subscribers.is_empty() {
            return OverallStatus::Published;
        }
        let received = subscribers
            .iter()
            .filter(|s| s.status == SubscriberStatus::Received)
            .count();
        let failed = subscribers
            .iter()
            .filter(|s| s.status == SubscriberStatus::Failed)
            .count();
        if received == subscribers.len() {
            OverallStatus::Delivered
        } else if failed == subscribers.len() {
            OverallStatus::Failed
        } else if received > 0 || failed > 0 {
            OverallStatus::PartiallyDelivered
        } else {
            OverallStatus::Published
        }
    }
}

/// One subscriber's record within a `DeliveryStatus` (§3.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberEntry {
    pub subscriber_id: String,
    pub status: SubscriberStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
}

impl SubscriberEntry {
    pub fn pending(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            status: SubscriberStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
        }
    }
}

/// The per-event delivery ledger entry maintained by C4 (§3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub event_id: String,
    pub topic: Topic,
    pub payload: serde_json::Value,
    pub overall_status: OverallStatus,
    pub subscribers: Vec<SubscriberEntry>,
    pub published_at: i64,
    pub last_updated_at: i64,
}

impl DeliveryStatus {
    pub fn new(
        event_id: impl Into<String>,
        topic: Topic,
        payload: serde_json::Value,
        subscriber_ids: &[String],
        now: i64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            topic,
            payload,
            overall_status: OverallStatus::Published,
            subscribers: subscriber_ids.iter().map(SubscriberEntry::pending).collect(),
            published_at: now,
            last_updated_at: now,
        }
    }

    /// Record a delivery attempt outcome for one subscriber and recompute
    /// the overall status (§4.5 forward-only rule).
    pub fn record(&mut self, subscriber_id: &str, succeeded: bool, now: i64) {
        if let Some(entry) = self.subscribers.iter_mut().find(|s| s.subscriber_id == subscriber_id) {
            entry.attempts += 1;
            entry.last_attempt_at = Some(now);
            entry.status = if succeeded {
                SubscriberStatus::Received
            } else {
                SubscriberStatus::Failed
            };
        }
        self.overall_status = OverallStatus::derive(&self.subscribers);
        self.last_updated_at = now;
    }

    pub fn pending_subscribers(&self) -> impl Iterator<Item = &SubscriberEntry> {
        self.subscribers
            .iter()
            .filter(|s| s.status != SubscriberStatus::Received)
    }
}
