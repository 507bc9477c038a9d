//! The flash/daily sales aggregation pipeline (C11, §4.6, §8.3 S3/S6).
//!
//! Flash and daily reports share this one function, parameterized by a time
//! window and a `require_all_terminals_closed` flag — only the daily report
//! sets it — rather than two code paths, to keep the set-union / fold
//! contract below in one audited place.
//!
//! Grounded on `cart-engine::pricing`'s resolve-then-fold shape (resolve
//! each line once, then fold into cart-level totals) and on
//! `journal::transaction_code`'s cancelled-sale tombstone handling, applied
//! here across transactions instead of within one.

use std::collections::HashMap;

use cart_engine::store::TenantStore;
use pos_shared::transaction::{Transaction, TransactionType};
use pos_shared::{AppError, AppResult, ErrorCode};
use serde::{Deserialize, Serialize};

use crate::consumer::REPORT_TRANSACTION_TABLE;

/// The `open_close_log` table journal-consumer writes raw session events
/// into (§3.4, C12) — shared physical store, read here without
/// re-subscribing report-aggregator to `open_close_log` (§6.4).
const OPEN_CLOSE_LOG_TABLE: &str = "open_close_log";

/// One period to aggregate over: a single business date for one store,
/// optionally narrowed to a single terminal (a flash report mid-session).
/// A daily report always covers the whole store (`terminal_no: None`).
#[derive(Debug, Clone)]
pub struct ReportWindow {
    pub tenant_id: String,
    pub store_code: String,
    pub business_date: String,
    pub terminal_no: Option<String>,
}

impl ReportWindow {
    fn validate(&self) -> AppResult<()> {
        let valid_date = self.business_date.len() == 8 && self.business_date.chars().all(|c| c.is_ascii_digit());
        if !valid_date {
            return Err(AppError::new(
                ErrorCode::ReportWindowInvalid,
                format!("business date '{}' is not YYYYMMDD", self.business_date),
            ));
        }
        if self.store_code.is_empty() {
            return Err(AppError::new(ErrorCode::ReportWindowInvalid, "storeCode must not be empty"));
        }
        Ok(())
    }
}

/// The reportable totals produced by one pipeline run (§4.6's canonical
/// net-sales formula). Every monetary field is tax-inclusive where noted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub store_code: String,
    pub business_date: String,
    pub terminal_no: Option<String>,
    pub transaction_count: u64,
    /// Tax-inclusive total of all forward-moving sales (normal sales, void
    /// returns).
    pub gross_sales: f64,
    /// Tax-inclusive total of all backward-moving sales (returns, voided
    /// sales) — always non-negative.
    pub returns: f64,
    pub line_discounts: f64,
    pub subtotal_discounts: f64,
    pub total_tax: f64,
    pub sum_payments: f64,
    /// `grossSales − returns − lineDiscounts − subtotalDiscounts − totalTax`.
    pub net_sales: f64,
}

/// Per-transaction reduced figures, computed once per transaction before
/// any cross-transaction summation (§4.6: reducing a transaction's nested
/// payment/tax arrays before folding avoids multiplying one array's sum by
/// the other array's cardinality — the "cartesian blow-up" this pipeline
/// is built to avoid by never flattening both arrays together).
struct TransactionFigures {
    factor: i32,
    total_with_tax: f64,
    tax: f64,
    line_discounts: f64,
    subtotal_discounts: f64,
    payments: f64,
}

fn reduce_transaction(tx: &Transaction) -> TransactionFigures {
    let factor = if tx.is_cancelled { 0 } else { tx.transaction_type.report_factor() };
    let tax = tx.tax_allocations.iter().map(|t| t.tax_amount).sum();
    let line_discounts = tx
        .line_items
        .iter()
        .flat_map(|line| line.line_discounts.iter())
        .map(|d| d.resolved_amount)
        .sum();
    let subtotal_discounts = tx.subtotal_discounts.iter().map(|d| d.resolved_amount).sum();
    let payments = tx.payments.iter().map(|p| p.amount).sum();
    TransactionFigures {
        factor,
        total_with_tax: tx.total_with_tax,
        tax,
        line_discounts,
        subtotal_discounts,
        payments,
    }
}

fn fold(transactions: &[Transaction], window: &ReportWindow) -> SalesReport {
    let mut report = SalesReport {
        store_code: window.store_code.clone(),
        business_date: window.business_date.clone(),
        terminal_no: window.terminal_no.clone(),
        ..Default::default()
    };

    for tx in transactions {
        let figures = reduce_transaction(tx);
        if figures.factor == 0 {
            continue;
        }
        report.transaction_count += 1;
        match figures.factor {
            1 => report.gross_sales += figures.total_with_tax,
            -1 => report.returns += figures.total_with_tax,
            _ => unreachable!("report_factor only ever returns -1, 0 or 1"),
        }
        report.total_tax += figures.tax * figures.factor as f64;
        report.line_discounts += figures.line_discounts * figures.factor as f64;
        report.subtotal_discounts += figures.subtotal_discounts * figures.factor as f64;
        report.sum_payments += figures.payments * figures.factor as f64;
    }

    report.net_sales = report.gross_sales - report.returns - report.line_discounts - report.subtotal_discounts - report.total_tax;
    report
}

async fn fetch_transactions(store: &TenantStore, window: &ReportWindow) -> AppResult<Vec<Transaction>> {
    let mut sql = format!(
        "SELECT * FROM {REPORT_TRANSACTION_TABLE} WHERE terminal_ref.store_code = $store_code AND session.business_date = $business_date"
    );
    let mut bindings = vec![
        ("store_code", serde_json::json!(window.store_code)),
        ("business_date", serde_json::json!(window.business_date)),
    ];
    if let Some(terminal_no) = &window.terminal_no {
        sql.push_str(" AND terminal_ref.terminal_no = $terminal_no");
        bindings.push(("terminal_no", serde_json::json!(terminal_no)));
    }
    store.query(&window.tenant_id, &sql, bindings).await
}

/// Raw open/close events read straight out of journal-consumer's table
/// (§6.4), decoded just enough to tell open from close per terminal.
#[derive(Debug, Deserialize)]
struct RawSessionEvent {
    #[serde(rename = "terminalRef")]
    terminal_ref: pos_shared::ids::TerminalRef,
    #[serde(rename = "transactionType")]
    transaction_type: TransactionType,
}

/// §8.3 S6: a daily report is refused unless every terminal that opened a
/// session on `window.business_date` has also closed it.
async fn verify_all_terminals_closed(store: &TenantStore, window: &ReportWindow) -> AppResult<()> {
    let sql = format!("SELECT * FROM {OPEN_CLOSE_LOG_TABLE} WHERE terminal_ref.store_code = $store_code AND session.business_date = $business_date");
    let bindings = vec![
        ("store_code", serde_json::json!(window.store_code)),
        ("business_date", serde_json::json!(window.business_date)),
    ];
    let events: Vec<RawSessionEvent> = store.query(&window.tenant_id, &sql, bindings).await?;

    if events.is_empty() {
        return Err(AppError::new(
            ErrorCode::TerminalsNotAllClosed,
            format!("no terminal sessions recorded for store {} on {}", window.store_code, window.business_date),
        ));
    }

    // (has_open, has_close) per terminal — a set-union style reduction so a
    // terminal that opened and closed twice in one day is still one entry.
    let mut by_terminal: HashMap<String, (bool, bool)> = HashMap::new();
    for event in events {
        let entry = by_terminal.entry(event.terminal_ref.terminal_no).or_insert((false, false));
        match event.transaction_type {
            TransactionType::SessionOpen => entry.0 = true,
            TransactionType::SessionClose => entry.1 = true,
            _ => {}
        }
    }

    let mut unclosed: Vec<String> = by_terminal
        .into_iter()
        .filter(|(_, (opened, closed))| *opened && !*closed)
        .map(|(terminal_no, _)| terminal_no)
        .collect();
    unclosed.sort();

    if unclosed.is_empty() {
        Ok(())
    } else {
        Err(AppError::new(
            ErrorCode::TerminalsNotAllClosed,
            format!("terminals still open for store {} on {}: {}", window.store_code, window.business_date, unclosed.join(", ")),
        )
        .with_user_message("Close all terminals before generating the daily report"))
    }
}

/// Run the shared pipeline: validate the window, optionally verify every
/// terminal in the store has closed (daily reports only), then fetch and
/// fold this service's own transaction documents.
pub async fn aggregate(store: &TenantStore, window: &ReportWindow, require_all_terminals_closed: bool) -> AppResult<SalesReport> {
    window.validate()?;
    if require_all_terminals_closed {
        verify_all_terminals_closed(store, window).await?;
    }
    let transactions = fetch_transactions(store, window).await?;
    Ok(fold(&transactions, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pos_shared::cart::{Discount, DiscountKind, LineItem, PaymentEntry, TaxAllocation, TaxKind};
    use pos_shared::ids::{Ambient, SessionCounters, TerminalRef};

    fn base_transaction(transaction_no: i64, transaction_type: TransactionType, total_with_tax: f64) -> Transaction {
        Transaction {
            transaction_no,
            receipt_no: transaction_no,
            terminal_ref: TerminalRef::new("t1", "store-1", "1"),
            transaction_type,
            origin_transaction_no: None,
            session: SessionCounters::opening("20260215", 1),
            line_items: vec![],
            subtotal_discounts: vec![],
            tax_allocations: vec![],
            payments: vec![],
            total_with_tax,
            net_due: 0.0,
            staff_ref: None,
            is_cancelled: false,
            ambient: Ambient::new(0, "transaction"),
        }
    }

    fn window() -> ReportWindow {
        ReportWindow {
            tenant_id: "t1".to_string(),
            store_code: "store-1".to_string(),
            business_date: "20260215".to_string(),
            terminal_no: None,
        }
    }

    #[test]
    fn rejects_a_malformed_business_date() {
        let mut w = window();
        w.business_date = "2026-02-15".to_string();
        assert!(w.validate().is_err());
    }

    /// §8.3 S3: a single normal sale carrying two tax allocations and two
    /// payment lines must not have its tax or payment totals multiplied by
    /// the other array's length when both are reduced into the report.
    #[test]
    fn multi_line_multi_tax_transaction_is_not_double_counted() {
        let mut tx = base_transaction(1, TransactionType::NormalSale, 2180.0);
        tx.line_items = vec![LineItem::new(1, "sku-1", "Widget", 1000.0, 1, "vat8")];
        tx.tax_allocations = vec![
            TaxAllocation { tax_code: "vat8".to_string(), kind: TaxKind::External, target_amount: 1000.0, tax_amount: 80.0 },
            TaxAllocation { tax_code: "vat10".to_string(), kind: TaxKind::External, target_amount: 1000.0, tax_amount: 100.0 },
        ];
        tx.payments = vec![
            PaymentEntry { method_code: "cash".to_string(), amount: 1000.0, tendered: 1000.0, change: 0.0, timestamp: 0 },
            PaymentEntry { method_code: "card".to_string(), amount: 1180.0, tendered: 1180.0, change: 0.0, timestamp: 0 },
        ];

        let report = fold(&[tx], &window());
        assert_eq!(report.transaction_count, 1);
        assert_eq!(report.total_tax, 180.0);
        assert_eq!(report.sum_payments, 2180.0);
        assert_eq!(report.gross_sales, 2180.0);
        assert_eq!(report.net_sales, 2000.0);
    }

    #[test]
    fn sale_followed_by_exact_return_nets_to_zero() {
        let mut sale = base_transaction(1, TransactionType::NormalSale, 3300.0);
        sale.subtotal_discounts = vec![Discount { code: "promo".to_string(), kind: DiscountKind::Absolute, value: 500.0, resolved_amount: 500.0 }];
        sale.tax_allocations = vec![TaxAllocation { tax_code: "vat10".to_string(), kind: TaxKind::External, target_amount: 3000.0, tax_amount: 300.0 }];

        let mut ret = base_transaction(2, TransactionType::ReturnSale, 3300.0);
        ret.origin_transaction_no = Some(1);
        ret.subtotal_discounts = sale.subtotal_discounts.clone();
        ret.tax_allocations = sale.tax_allocations.clone();

        let report = fold(&[sale, ret], &window());
        assert_eq!(report.gross_sales, 3300.0);
        assert_eq!(report.returns, 3300.0);
        assert_eq!(report.net_sales, 0.0);
        assert_eq!(report.total_tax, 0.0);
        assert_eq!(report.subtotal_discounts, 0.0);
    }

    /// `cart_engine::transaction_service::tombstone_original` republishes
    /// the original transaction with `isCancelled` flipped as a second
    /// `TranLog` event (it never rewrites the row this service already
    /// stored for the first event). So a voided sale leaves this table
    /// with *three* rows for one logical transaction_no: the original sale
    /// (factor +1), the void itself (factor −1), and the cancelled-sale
    /// correction (factor 0, excluded). The correction row contributes
    /// nothing on its own; it is the void row's −1 that nets the sale out.
    #[test]
    fn cancelled_sale_correction_row_contributes_nothing() {
        let mut correction = base_transaction(1, TransactionType::NormalSale, 500.0);
        correction.is_cancelled = true;
        let report = fold(&[correction], &window());
        assert_eq!(report.transaction_count, 0);
        assert_eq!(report.gross_sales, 0.0);
        assert_eq!(report.net_sales, 0.0);
    }

    #[test]
    fn voided_sale_nets_to_zero_even_with_the_cancelled_correction_row_present() {
        let sale = base_transaction(1, TransactionType::NormalSale, 500.0);
        let void = base_transaction(2, TransactionType::VoidSale, 500.0);
        let mut correction = sale.clone();
        correction.is_cancelled = true;

        let report = fold(&[sale, void, correction], &window());
        assert_eq!(report.transaction_count, 2);
        assert_eq!(report.gross_sales, 500.0);
        assert_eq!(report.returns, 500.0);
        assert_eq!(report.net_sales, 0.0);
    }

    /// §8.2 "aggregating one period covering two sub-periods equals summing
    /// the two sub-period aggregations" — checked here at the fold level
    /// since the period split happens purely in which rows are passed in.
    #[test]
    fn aggregating_in_two_batches_equals_aggregating_once() {
        let t1 = base_transaction(1, TransactionType::NormalSale, 1000.0);
        let t2 = base_transaction(2, TransactionType::NormalSale, 2000.0);
        let t3 = base_transaction(3, TransactionType::ReturnSale, 500.0);

        let whole = fold(&[t1.clone(), t2.clone(), t3.clone()], &window());
        let first_half = fold(&[t1], &window());
        let second_half = fold(&[t2, t3], &window());

        assert_eq!(whole.gross_sales, first_half.gross_sales + second_half.gross_sales);
        assert_eq!(whole.returns, first_half.returns + second_half.returns);
        assert_eq!(whole.net_sales, first_half.net_sales + second_half.net_sales);
        assert_eq!(whole.transaction_count, first_half.transaction_count + second_half.transaction_count);
    }
}
