//! Receipt/journal text rendering (C9, §4.4 step 3): a second closed
//! registry alongside the payment-method one (§4.3, `payment.rs`),
//! resolved by a tenant-configured formatter code instead of a payment
//! code — the same `{code -> fn}` shape, grounded the same way.

use std::collections::HashMap;

use pos_shared::transaction::Transaction;

pub type FormatFn = fn(&Transaction) -> (String, String);

pub struct FormatterRegistry {
    formatters: HashMap<String, FormatFn>,
    default_code: String,
}

/// The only formatter configured out of the box: a compact pipe-delimited
/// line for the journal and a human-readable summary for the receipt.
/// Real receipt layout (line wrapping, logo, barcode) is printer-specific
/// and out of scope here (§1: "HTTP transport details" / printing glue).
fn standard_formatter(txn: &Transaction) -> (String, String) {
    let receipt_text = format!(
        "Receipt #{} | Txn #{} | {:?} | total {:.2}",
        txn.receipt_no, txn.transaction_no, txn.transaction_type, txn.total_with_tax
    );
    let journal_text = format!(
        "{}|{}|{}|{:.2}",
        txn.terminal_ref.canonical(),
        txn.transaction_no,
        txn.transaction_type.code(),
        txn.total_with_tax
    );
    (receipt_text, journal_text)
}

impl FormatterRegistry {
    pub fn standard() -> Self {
        let mut formatters: HashMap<String, FormatFn> = HashMap::new();
        formatters.insert("standard".to_string(), standard_formatter as FormatFn);
        Self { formatters, default_code: "standard".to_string() }
    }

    pub fn render(&self, txn: &Transaction) -> (String, String) {
        let f = self
            .formatters
            .get(&self.default_code)
            .copied()
            .unwrap_or(standard_formatter);
        f(txn)
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pos_shared::ids::{Ambient, SessionCounters, TerminalRef};
    use pos_shared::TransactionType;

    fn sample() -> Transaction {
        Transaction {
            transaction_no: 7,
            receipt_no: 7,
            terminal_ref: TerminalRef::new("t", "s", "1"),
            transaction_type: TransactionType::NormalSale,
            origin_transaction_no: None,
            session: SessionCounters::opening("20260101", 1),
            line_items: vec![],
            subtotal_discounts: vec![],
            tax_allocations: vec![],
            payments: vec![],
            total_with_tax: 1234.5,
            net_due: 0.0,
            staff_ref: None,
            is_cancelled: false,
            ambient: Ambient::new(0, "transaction"),
        }
    }

    #[test]
    fn renders_both_strings() {
        let registry = FormatterRegistry::standard();
        let (receipt, journal) = registry.render(&sample());
        assert!(receipt.contains("Receipt #7"));
        assert!(journal.contains("101"));
    }
}
