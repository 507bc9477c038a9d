//! The unified journal entry (§3.6): one immutable record per consumed
//! event, independent of which topic it arrived on. No update path is
//! exposed — each entry is written once, keyed by `eventId`, and never
//! touched again.

use pos_shared::ids::TerminalRef;
use pos_shared::transaction::TransactionType;
use serde::{Deserialize, Serialize};

pub const JOURNAL_TABLE: &str = "journal_entry";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub event_id: String,
    pub terminal_ref: TerminalRef,
    pub transaction_type_code: i32,
    pub business_date: String,
    pub open_counter: u64,
    pub business_counter: u64,
    pub transaction_no: Option<i64>,
    pub receipt_no: Option<i64>,
    pub total_with_tax: f64,
    pub receipt_text: String,
    pub journal_text: String,
    pub recorded_at: i64,
}

/// Transaction-type code derivation (§4.6, §6.3): a normal sale becomes
/// `-101` once the source transaction is cancelled (the tombstone code);
/// every other transaction type carries its own fixed code.
pub fn transaction_code(transaction: &pos_shared::transaction::Transaction) -> i32 {
    if transaction.is_cancelled {
        TransactionType::CancelledSale.code()
    } else {
        transaction.transaction_type.code()
    }
}
