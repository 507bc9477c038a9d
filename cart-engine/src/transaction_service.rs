//! The transaction service (C9, §4.4): assigns transaction/receipt
//! numbers, renders receipt/journal text, persists the finalized
//! transaction, and enqueues the publish event. Void and return are
//! modeled as new transactions referencing the original rather than
//! rewrites (§4.4 invariant, §8.1 invariant 6's sibling: a transaction is
//! never rewritten either, only tombstoned).

use std::sync::Arc;

use event_fabric::publisher::EventFabric;
use event_fabric::ledger::InMemoryLedgerStore;
use pos_shared::cart::Cart;
use pos_shared::event::{Topic, TransactionEvent};
use pos_shared::ids::{Ambient, TerminalRef};
use pos_shared::transaction::{Transaction, TransactionType};
use pos_shared::util::{new_id, now_millis};
use pos_shared::{AppError, AppResult, ErrorCode};

use crate::formatter::FormatterRegistry;
use crate::session::TerminalSessionController;
use crate::store::TenantStore;

const TABLE: &str = "transaction";

/// Deterministic document id for a transaction: unique per terminal,
/// business date and transaction number (§3.3).
pub fn transaction_doc_id(terminal_ref: &TerminalRef, business_date: &str, transaction_no: i64) -> String {
    format!("{}_{business_date}_{transaction_no}", terminal_ref.canonical())
}

pub struct TransactionService {
    store: TenantStore,
    fabric: Arc<EventFabric<InMemoryLedgerStore>>,
    sessions: Arc<TerminalSessionController>,
    formatters: FormatterRegistry,
}

/// Builds the cart-shaped content a void/return finalizes from: the
/// original transaction's line items and payments, carried over verbatim
/// (§4.4 — void/return are new transactions, not edits, so they reuse the
/// original's content rather than re-deriving it from a live cart).
pub fn reversal_cart_from(original: &Transaction, cart_id: String) -> Cart {
    Cart {
        cart_id,
        terminal_ref: original.terminal_ref.clone(),
        state: pos_shared::cart::CartState::Completed,
        line_items: original.line_items.clone(),
        subtotal_discounts: original.subtotal_discounts.clone(),
        payments: original.payments.clone(),
        staff_ref: original.staff_ref.clone(),
        session: original.session.clone(),
        receipt_no: None,
        transaction_no: None,
        ambient: Ambient::new(now_millis(), "cart"),
        total_with_tax: original.total_with_tax,
        taxable_total: original.total_with_tax,
        net_due: original.net_due,
    }
}

impl TransactionService {
    pub fn new(store: TenantStore, fabric: Arc<EventFabric<InMemoryLedgerStore>>, sessions: Arc<TerminalSessionController>) -> Self {
        Self { store, fabric, sessions, formatters: FormatterRegistry::standard() }
    }

    /// Assign numbers, build the transaction, persist it and publish the
    /// event (§4.4 steps 1-5). `origin_transaction_no` is set for
    /// void/return transactions (§4.4); `None` for a normal sale.
    async fn finalize(
        &self,
        tenant_id: &str,
        cart: &Cart,
        transaction_type: TransactionType,
        origin_transaction_no: Option<i64>,
    ) -> AppResult<Transaction> {
        let counter_scope = format!("{}-{}", cart.terminal_ref.canonical(), cart.session.business_date);
        let transaction_no = self.store.next_counter(tenant_id, &format!("txn-{counter_scope}")).await?;
        let receipt_no = self.store.next_counter(tenant_id, &format!("receipt-{counter_scope}")).await?;

        let now = now_millis();
        let tax_allocations = cart
            .line_items
            .iter()
            .flat_map(|li| li.tax_allocations.iter().cloned())
            .collect();

        let transaction = Transaction {
            transaction_no,
            receipt_no,
            terminal_ref: cart.terminal_ref.clone(),
            transaction_type,
            origin_transaction_no,
            session: cart.session.clone(),
            line_items: cart.line_items.clone(),
            subtotal_discounts: cart.subtotal_discounts.clone(),
            tax_allocations,
            payments: cart.payments.clone(),
            total_with_tax: cart.total_with_tax,
            net_due: cart.net_due,
            staff_ref: cart.staff_ref.clone(),
            is_cancelled: false,
            ambient: Ambient::new(now, "transaction"),
        };

        let id = transaction_doc_id(&transaction.terminal_ref, &transaction.session.business_date, transaction_no);
        self.store.put(tenant_id, TABLE, &id, transaction.clone()).await?;

        let (receipt_text, journal_text) = self.formatters.render(&transaction);
        let event_id = new_id();
        let event = TransactionEvent {
            event_id: event_id.clone(),
            terminal_ref: transaction.terminal_ref.clone(),
            transaction: transaction.clone(),
            receipt_text,
            journal_text,
            published_at: now,
        };
        self.fabric
            .publish(Topic::TranLog, &event_id, serde_json::to_value(&event).unwrap_or_default())
            .await?;

        // §3.1: businessCounter advances on every operation, not only cash
        // movements; a transaction that finalizes after its terminal closed
        // mid-flight is an anomaly the session layer surfaces, not one this
        // write should be rolled back for.
        if let Err(err) = self.sessions.bump_business_counter(tenant_id, &transaction.terminal_ref).await {
            tracing::warn!(transaction_no, error = %err.system_message, "failed to advance business counter after finalize");
        }

        Ok(transaction)
    }

    /// Finalize a normal sale from a cart that just reached `Completed`
    /// (§4.1, §4.4).
    pub async fn finalize_sale(&self, tenant_id: &str, cart: &Cart) -> AppResult<Transaction> {
        self.finalize(tenant_id, cart, TransactionType::NormalSale, None).await
    }

    /// Finalize a return: a new sale-shaped cart referencing the original
    /// by transaction number (§4.4), tombstoning the original afterward.
    pub async fn finalize_return(&self, tenant_id: &str, cart: &Cart, original_no: i64) -> AppResult<Transaction> {
        let transaction = self.finalize(tenant_id, cart, TransactionType::ReturnSale, Some(original_no)).await?;
        self.tombstone_original(tenant_id, &cart.terminal_ref, &cart.session.business_date, original_no)
            .await?;
        Ok(transaction)
    }

    /// Void a previously completed transaction: a new void-shaped cart
    /// referencing the original (§4.4), tombstoning the original. §6.3
    /// distinguishes voiding a normal sale (201) from voiding a return
    /// (202) — the report factor differs (−1 vs +1), so the original's
    /// own type decides which code this reversal gets.
    pub async fn finalize_void(&self, tenant_id: &str, cart: &Cart, original: &Transaction) -> AppResult<Transaction> {
        let void_type = match original.transaction_type {
            TransactionType::ReturnSale => TransactionType::VoidReturn,
            _ => TransactionType::VoidSale,
        };
        let transaction = self.finalize(tenant_id, cart, void_type, Some(original.transaction_no)).await?;
        self.tombstone_original(tenant_id, &cart.terminal_ref, &cart.session.business_date, original.transaction_no)
            .await?;
        Ok(transaction)
    }

    pub async fn get(&self, tenant_id: &str, terminal_ref: &TerminalRef, business_date: &str, transaction_no: i64) -> AppResult<Transaction> {
        let id = transaction_doc_id(terminal_ref, business_date, transaction_no);
        self.store
            .get(tenant_id, TABLE, &id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::TransactionNotFound, format!("transaction {transaction_no} not found")))
    }

    /// Set `isCancelled` on the original transaction via compare-and-swap;
    /// fails if it is already set (§4.4), bounded-retried on a benign
    /// version race the same way every other CAS write in this crate is.
    ///
    /// The CAS only flips the stored document — nothing downstream of the
    /// fabric ever re-reads it. So once it lands, publish a second
    /// `TranLog` event carrying the now-cancelled original: this is the
    /// only way journal-consumer's §6.3 cancelled-sale (−101) derivation
    /// and report-aggregator's matching factor-0 exclusion ever see
    /// `isCancelled = true` rather than staying permanently unreachable.
    /// The original's own report-factor row is left untouched; the
    /// void/return transaction's −1/+1 factor already nets the pair to
    /// zero, so this event is a journal/report annotation, not a second
    /// correction to the arithmetic.
    async fn tombstone_original(
        &self,
        tenant_id: &str,
        terminal_ref: &TerminalRef,
        business_date: &str,
        original_no: i64,
    ) -> AppResult<()> {
        let id = transaction_doc_id(terminal_ref, business_date, original_no);
        let cancelled = crate::store::with_optimistic_retry(crate::store::RetryConfig::default(), || async {
            let mut original: Transaction = self
                .store
                .get(tenant_id, TABLE, &id)
                .await?
                .ok_or_else(|| AppError::new(ErrorCode::TransactionNotFound, format!("transaction {original_no} not found")))?;
            if original.is_cancelled {
                return Err(AppError::new(
                    ErrorCode::TransactionAlreadyCancelled,
                    format!("transaction {original_no} already cancelled"),
                ));
            }
            let expected_version = original.ambient.version;
            original.is_cancelled = true;
            original.ambient.touch(now_millis());
            self.store.cas_put(tenant_id, TABLE, &id, expected_version, original.clone()).await?;
            Ok(original)
        })
        .await?;

        let (receipt_text, journal_text) = self.formatters.render(&cancelled);
        let event_id = new_id();
        let event = TransactionEvent {
            event_id: event_id.clone(),
            terminal_ref: cancelled.terminal_ref.clone(),
            transaction: cancelled,
            receipt_text,
            journal_text,
            published_at: now_millis(),
        };
        self.fabric
            .publish(Topic::TranLog, &event_id, serde_json::to_value(&event).unwrap_or_default())
            .await?;

        Ok(())
    }
}
