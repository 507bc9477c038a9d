//! Completed transactions and their type taxonomy (§3.3, §6.3).

use serde::{Deserialize, Serialize};

use crate::cart::{Discount, LineItem, PaymentEntry, TaxAllocation};
use crate::ids::{Ambient, SessionCounters, TerminalRef};

/// Transaction type codes, fixed by §6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum TransactionType {
    NormalSale,
    /// Tombstone written onto the original sale once it has been voided or
    /// returned (§4.4) — never published on its own.
    CancelledSale,
    ReturnSale,
    VoidSale,
    VoidReturn,
    SessionOpen,
    SessionClose,
    CashIn,
    CashOut,
    FlashReport,
    DailyReport,
}

impl TransactionType {
    pub fn code(&self) -> i32 {
        match self {
            TransactionType::NormalSale => 101,
            TransactionType::CancelledSale => -101,
            TransactionType::ReturnSale => 102,
            TransactionType::VoidSale => 201,
            TransactionType::VoidReturn => 202,
            TransactionType::SessionOpen => 301,
            TransactionType::SessionClose => 302,
            TransactionType::CashIn => 401,
            TransactionType::CashOut => 402,
            TransactionType::FlashReport => 701,
            TransactionType::DailyReport => 702,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            101 => TransactionType::NormalSale,
            -101 => TransactionType::CancelledSale,
            102 => TransactionType::ReturnSale,
            201 => TransactionType::VoidSale,
            202 => TransactionType::VoidReturn,
            301 => TransactionType::SessionOpen,
            302 => TransactionType::SessionClose,
            401 => TransactionType::CashIn,
            402 => TransactionType::CashOut,
            701 => TransactionType::FlashReport,
            702 => TransactionType::DailyReport,
            _ => return None,
        })
    }

    /// The report-aggregation factor applied when summing net sales (§4.6).
    /// `CancelledSale` is excluded from aggregation entirely (factor 0) —
    /// it exists only as a tombstone on the original transaction.
    pub fn report_factor(&self) -> i32 {
        match self {
            TransactionType::NormalSale => 1,
            TransactionType::ReturnSale => -1,
            TransactionType::VoidSale => -1,
            TransactionType::VoidReturn => 1,
            TransactionType::CancelledSale => 0,
            _ => 0,
        }
    }
}

impl From<TransactionType> for i32 {
    fn from(t: TransactionType) -> Self {
        t.code()
    }
}

impl TryFrom<i32> for TransactionType {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        TransactionType::from_code(code).ok_or(code)
    }
}

/// A finalized, immutable record of a completed cart (§3.3). Produced once
/// a cart reaches `Completed`; voids and returns create a *new* transaction
/// referencing the original rather than mutating it (§4.4 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_no: i64,
    pub receipt_no: i64,
    pub terminal_ref: TerminalRef,
    pub transaction_type: TransactionType,
    /// The transaction this one reverses, if it is a void or return
    pub origin_transaction_no: Option<i64>,
    pub session: SessionCounters,
    pub line_items: Vec<LineItem>,
    pub subtotal_discounts: Vec<Discount>,
    pub tax_allocations: Vec<TaxAllocation>,
    pub payments: Vec<PaymentEntry>,
    pub total_with_tax: f64,
    pub net_due: f64,
    pub staff_ref: Option<String>,
    /// Set via compare-and-swap when a later void/return tombstones this
    /// transaction (§4.4) — the transaction itself is never rewritten.
    pub is_cancelled: bool,
    pub ambient: Ambient,
}

impl Transaction {
    /// This transaction's contribution to reported net sales (§4.6),
    /// `totalWithTax * factor`, or zero once cancelled.
    pub fn net_sales_contribution(&self) -> f64 {
        if self.is_cancelled {
            return 0.0;
        }
        self.total_with_tax * self.transaction_type.report_factor() as f64
    }
}
