//! The cart state machine (C6, §4.1): the orchestrator binding the cache
//! (C2), document store (C1), master-data cache (C5), pricing engine (C7),
//! payment engine (C8) and transaction service (C9) behind one API per
//! operation. Every mutation is guarded by state, serialized by `cartId`
//! (the per-cart lock, `lock.rs`), and persisted with the same
//! optimistic-CAS-retry discipline as the rest of the store layer.

use std::sync::Arc;

use pos_shared::cart::{Cart, CartState, Discount, DiscountKind, LineItem};
use pos_shared::ids::{SessionCounters, TerminalRef};
use pos_shared::money::to_decimal;
use pos_shared::payment::PaymentMethodCode;
use pos_shared::transaction::Transaction;
use pos_shared::util::now_millis;
use pos_shared::{AppError, AppResult, ErrorCode};
use rust_decimal::Decimal;

use crate::cache::{cart_cache_key, StateStore};
use crate::lock::CartLockManager;
use crate::masterdata::MasterDataCache;
use crate::payment::PaymentMethodRegistry;
use crate::pricing::PricingEngine;
use crate::store::{with_optimistic_retry, RetryConfig, TenantStore};
use crate::transaction_service::TransactionService;

const CART_TABLE: &str = "cart";
const CART_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(6 * 3600);

/// Result of a mutation that may or may not finalize the cart (§4.1
/// `subtotal`/`addPayment` can reach `completed` directly).
pub enum CartOutcome {
    Cart(Cart),
    Finalized(Transaction),
}

/// Rejects an operation not legal in the cart's current state, reporting
/// the state, the operation and the legal-operation set (§4.1 "the
/// rejection reports the current state, the disallowed operation, and the
/// legal-operation set").
fn guard(cart: &Cart, operation: &str, allowed: &[CartState]) -> AppResult<()> {
    if allowed.contains(&cart.state) {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCode::InvalidCartOperation,
        format!("{operation} not allowed in state {:?}; legal states are {allowed:?}", cart.state),
    ))
}

fn find_line_mut<'a>(cart: &'a mut Cart, line_no: u32) -> AppResult<&'a mut LineItem> {
    cart.line_items
        .iter_mut()
        .find(|li| li.line_no == line_no)
        .ok_or_else(|| AppError::new(ErrorCode::InvalidCartOperation, format!("no such line {line_no}")))
}

pub struct CartEngine {
    store: TenantStore,
    cache: Arc<dyn StateStore>,
    masterdata: MasterDataCache,
    locks: Arc<CartLockManager>,
    payments: PaymentMethodRegistry,
    transactions: Arc<TransactionService>,
}

impl CartEngine {
    pub fn new(
        store: TenantStore,
        cache: Arc<dyn StateStore>,
        masterdata: MasterDataCache,
        locks: Arc<CartLockManager>,
        transactions: Arc<TransactionService>,
    ) -> Self {
        Self {
            store,
            cache,
            masterdata,
            locks,
            payments: PaymentMethodRegistry::configured(),
            transactions,
        }
    }

    async fn write_cache(&self, cart: &Cart) {
        if let Ok(bytes) = serde_json::to_vec(cart) {
            self.cache.set(&cart_cache_key(&cart.cart_id), bytes, CART_CACHE_TTL).await;
        }
    }

    /// Cache-first, document-store-on-miss read, repopulating the cache
    /// (§4.1 "reads are cache-first, document-store on miss").
    async fn load(&self, tenant_id: &str, cart_id: &str) -> AppResult<Cart> {
        if let Some(bytes) = self.cache.get(&cart_cache_key(cart_id)).await {
            if let Ok(cart) = serde_json::from_slice::<Cart>(&bytes) {
                return Ok(cart);
            }
        }
        let cart: Cart = self
            .store
            .get(tenant_id, CART_TABLE, cart_id)
            .await?
            .ok_or_else(|| AppError::new(ErrorCode::CartNotFound, format!("cart {cart_id} not found")))?;
        self.write_cache(&cart).await;
        Ok(cart)
    }

    /// Write-through persist guarded by the entity tag: fails with
    /// `ConcurrentModification` if `cart.ambient.version` no longer
    /// matches the stored document, letting the caller's
    /// `with_optimistic_retry` wrapper reload and retry (§5).
    async fn persist(&self, tenant_id: &str, cart: &mut Cart) -> AppResult<()> {
        let expected_version = cart.ambient.version;
        cart.ambient.touch(now_millis());
        self.store.cas_put(tenant_id, CART_TABLE, &cart.cart_id, expected_version, cart.clone()).await?;
        self.write_cache(cart).await;
        Ok(())
    }

    /// Read-only cart lookup for callers outside the FSM (the HTTP `bill`
    /// endpoint, void/return wiring).
    pub async fn get_cart(&self, tenant_id: &str, cart_id: &str) -> AppResult<Cart> {
        self.load(tenant_id, cart_id).await
    }

    /// `createCart` (§4.1): `initial -> idle`. No prior document exists, so
    /// this is a plain write rather than a CAS.
    pub async fn create_cart(
        &self,
        tenant_id: &str,
        cart_id: String,
        terminal_ref: TerminalRef,
        session: SessionCounters,
        staff_ref: Option<String>,
    ) -> AppResult<Cart> {
        let _guard = self.locks.acquire(&cart_id).await;
        let mut cart = Cart::new(cart_id, terminal_ref, session, now_millis());
        cart.staff_ref = staff_ref;
        cart.state = CartState::Idle;
        self.store.put(tenant_id, CART_TABLE, &cart.cart_id, cart.clone()).await?;
        self.write_cache(&cart).await;
        Ok(cart)
    }

    /// `addLineItem` (§4.1): allowed from `idle` or `enteringItem`, always
    /// lands in `enteringItem`.
    pub async fn add_line_item(&self, tenant_id: &str, cart_id: &str, item_code: &str, quantity: i32) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "addLineItem", &[CartState::Idle, CartState::EnteringItem])?;
            let item = self.masterdata.item(tenant_id, item_code).await?;
            let line = LineItem::new(cart.next_line_no(), item.item_code.clone(), item.description.clone(), item.unit_price, quantity, item.tax_code.clone());
            cart.line_items.push(line);
            cart.state = CartState::EnteringItem;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `cancelLineItem` (§4.1): `enteringItem` only.
    pub async fn cancel_line_item(&self, tenant_id: &str, cart_id: &str, line_no: u32) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "cancelLineItem", &[CartState::EnteringItem])?;
            find_line_mut(&mut cart, line_no)?.is_cancelled = true;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `updateUnitPrice` (§4.1): `enteringItem` only.
    pub async fn update_unit_price(&self, tenant_id: &str, cart_id: &str, line_no: u32, new_unit_price: f64) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "updateUnitPrice", &[CartState::EnteringItem])?;
            let line = find_line_mut(&mut cart, line_no)?;
            line.unit_price = new_unit_price;
            line.amount = new_unit_price * line.quantity as f64;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `updateQuantity` (§4.1): `enteringItem` only.
    pub async fn update_quantity(&self, tenant_id: &str, cart_id: &str, line_no: u32, new_quantity: i32) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "updateQuantity", &[CartState::EnteringItem])?;
            let line = find_line_mut(&mut cart, line_no)?;
            line.quantity = new_quantity;
            line.amount = line.unit_price * new_quantity as f64;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `addLineDiscount` (§4.1): `enteringItem` only.
    pub async fn add_line_discount(
        &self,
        tenant_id: &str,
        cart_id: &str,
        line_no: u32,
        code: String,
        kind: DiscountKind,
        value: f64,
    ) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "addLineDiscount", &[CartState::EnteringItem])?;
            find_line_mut(&mut cart, line_no)?.line_discounts.push(Discount::new(code.clone(), kind, value));
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `addSubtotalDiscount` (§4.1): `idle` or `enteringItem`, state unchanged.
    pub async fn add_subtotal_discount(&self, tenant_id: &str, cart_id: &str, code: String, kind: DiscountKind, value: f64) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "addSubtotalDiscount", &[CartState::Idle, CartState::EnteringItem])?;
            cart.subtotal_discounts.push(Discount::new(code.clone(), kind, value));
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `subtotal` (§4.1, §4.2): `enteringItem` only. Prices the cart; moves
    /// to `paying` if net-due is strictly positive, otherwise finalizes a
    /// zero-payment transaction straight from `completed`. The rounding
    /// mode is a per-tenant terminal setting (§4.2 rule 4), looked up
    /// rather than supplied by the caller.
    pub async fn subtotal(&self, tenant_id: &str, cart_id: &str) -> AppResult<CartOutcome> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            PricingEngine::check_state(&cart)?;
            let rounding_mode = self.masterdata.terminal(tenant_id, &cart.terminal_ref.terminal_no).await?.rounding_mode;
            let engine = PricingEngine::new(&self.masterdata);
            let net_due = engine.price(tenant_id, &mut cart, rounding_mode).await?;

            if net_due > Decimal::ZERO {
                cart.state = CartState::Paying;
                self.persist(tenant_id, &mut cart).await?;
                Ok(CartOutcome::Cart(cart))
            } else {
                cart.state = CartState::Completed;
                let transaction = self.transactions.finalize_sale(tenant_id, &cart).await?;
                cart.transaction_no = Some(transaction.transaction_no);
                cart.receipt_no = Some(transaction.receipt_no);
                self.persist(tenant_id, &mut cart).await?;
                self.locks.release(cart_id);
                Ok(CartOutcome::Finalized(transaction))
            }
        })
        .await
    }

    /// `addPayment` (§4.1, §4.3): `paying` only. Transitions to
    /// `completed` once cumulative tendered reaches `totalWithTax`.
    pub async fn add_payment(&self, tenant_id: &str, cart_id: &str, method_code: PaymentMethodCode, tendered: f64) -> AppResult<CartOutcome> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "addPayment", &[CartState::Paying])?;

            let remaining_due = to_decimal(cart.total_with_tax) - to_decimal(cart.cumulative_tendered());
            let outcome = self.payments.apply(method_code, tendered, pos_shared::money::to_f64(remaining_due))?;
            cart.payments.push(pos_shared::cart::PaymentEntry {
                method_code: method_code.wire_code().to_string(),
                amount: pos_shared::money::to_f64(outcome.accepted_amount),
                tendered,
                change: pos_shared::money::to_f64(outcome.change),
                timestamp: now_millis(),
            });
            let new_remaining = to_decimal(cart.total_with_tax) - to_decimal(cart.cumulative_tendered());
            cart.net_due = pos_shared::money::to_f64(new_remaining.max(Decimal::ZERO));

            if new_remaining <= Decimal::ZERO {
                cart.state = CartState::Completed;
                let transaction = self.transactions.finalize_sale(tenant_id, &cart).await?;
                cart.transaction_no = Some(transaction.transaction_no);
                cart.receipt_no = Some(transaction.receipt_no);
                self.persist(tenant_id, &mut cart).await?;
                self.locks.release(cart_id);
                Ok(CartOutcome::Finalized(transaction))
            } else {
                self.persist(tenant_id, &mut cart).await?;
                Ok(CartOutcome::Cart(cart))
            }
        })
        .await
    }

    /// `resumeItemEntry` (§4.1): `paying` only, clears payments and
    /// returns to `enteringItem`.
    pub async fn resume_item_entry(&self, tenant_id: &str, cart_id: &str) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "resumeItemEntry", &[CartState::Paying])?;
            cart.payments.clear();
            cart.net_due = cart.total_with_tax;
            cart.state = CartState::EnteringItem;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await
    }

    /// `cancelCart` (§4.1): any non-terminal state, irreversible.
    pub async fn cancel_cart(&self, tenant_id: &str, cart_id: &str) -> AppResult<Cart> {
        let _guard = self.locks.acquire(cart_id).await;
        let result = with_optimistic_retry(RetryConfig::default(), || async {
            let mut cart = self.load(tenant_id, cart_id).await?;
            guard(&cart, "cancelCart", &[CartState::Idle, CartState::EnteringItem, CartState::Paying])?;
            cart.state = CartState::Cancelled;
            self.persist(tenant_id, &mut cart).await?;
            Ok(cart)
        })
        .await;
        self.locks.release(cart_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use event_fabric::ledger::InMemoryLedgerStore;
    use event_fabric::publisher::{EventFabric, SidecarTransport};
    use pos_shared::cart::TaxKind;
    use pos_shared::event::Topic;
    use pos_shared::money::RoundingMode as RM;
    use std::collections::HashMap;
    use tempfile::tempdir;

    use crate::cache::InMemoryStateStore;
    use crate::masterdata::{ItemMeta, MasterDataSource, TaxCodeMeta, TerminalMeta};

    struct FixtureSource;

    #[async_trait]
    impl MasterDataSource for FixtureSource {
        async fn load_item(&self, _tenant_id: &str, item_code: &str) -> AppResult<ItemMeta> {
            Ok(ItemMeta { item_code: item_code.to_string(), description: "widget".into(), unit_price: 1000.0, tax_code: "EXEMPT".into() })
        }

        async fn load_tax_code(&self, _tenant_id: &str, tax_code: &str) -> AppResult<TaxCodeMeta> {
            Ok(TaxCodeMeta { tax_code: tax_code.to_string(), kind: TaxKind::Exempt, rate: Decimal::ZERO })
        }

        async fn load_terminal(&self, _tenant_id: &str, _terminal_no: &str) -> AppResult<TerminalMeta> {
            Ok(TerminalMeta { rounding_mode: RM::HalfUp })
        }
    }

    struct NoopTransport;

    #[async_trait]
    impl SidecarTransport for NoopTransport {
        async fn send(&self, _subscriber_id: &str, _topic: Topic, _payload: &serde_json::Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn engine() -> CartEngine {
        let dir = tempdir().unwrap();
        let store = TenantStore::connect(dir.path().to_str().unwrap(), "test").await.unwrap();
        let cache: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let masterdata = MasterDataCache::new(Arc::new(FixtureSource));
        let locks = Arc::new(CartLockManager::new());
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let fabric = Arc::new(EventFabric::new(ledger, Arc::new(NoopTransport), HashMap::new()));
        let sessions = Arc::new(crate::session::TerminalSessionController::new(store.clone(), Arc::clone(&fabric), Arc::clone(&locks)));
        let transactions = Arc::new(TransactionService::new(store.clone(), fabric, sessions));
        CartEngine::new(store, cache, masterdata, locks, transactions)
    }

    fn terminal() -> TerminalRef {
        TerminalRef::new("tenant-a", "store-1", "t1")
    }

    #[tokio::test]
    async fn guard_rejects_addpayment_outside_paying() {
        let engine = engine().await;
        let cart = engine
            .create_cart("tenant-a", "cart-1".into(), terminal(), SessionCounters::opening("20260101", 1), None)
            .await
            .unwrap();
        assert_eq!(cart.state, CartState::Idle);
        let err = engine.add_payment("tenant-a", "cart-1", PaymentMethodCode::Cash, 100.0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidCartOperation);
    }

    #[tokio::test]
    async fn full_cart_lifecycle_reaches_completed_on_exact_payment() {
        let engine = engine().await;
        engine
            .create_cart("tenant-a", "cart-2".into(), terminal(), SessionCounters::opening("20260101", 1), None)
            .await
            .unwrap();
        engine.add_line_item("tenant-a", "cart-2", "sku-1", 2).await.unwrap();

        let outcome = engine.subtotal("tenant-a", "cart-2").await.unwrap();
        let cart = match outcome {
            CartOutcome::Cart(cart) => cart,
            CartOutcome::Finalized(_) => panic!("expected paying, not finalized"),
        };
        assert_eq!(cart.state, CartState::Paying);
        assert_eq!(cart.total_with_tax, 2000.0);

        let outcome = engine.add_payment("tenant-a", "cart-2", PaymentMethodCode::Cash, 2000.0).await.unwrap();
        match outcome {
            CartOutcome::Finalized(transaction) => assert_eq!(transaction.total_with_tax, 2000.0),
            CartOutcome::Cart(_) => panic!("expected finalized"),
        }
    }

    #[tokio::test]
    async fn zero_due_subtotal_finalizes_directly() {
        let engine = engine().await;
        engine
            .create_cart("tenant-a", "cart-3".into(), terminal(), SessionCounters::opening("20260101", 1), None)
            .await
            .unwrap();
        engine.add_line_item("tenant-a", "cart-3", "sku-1", 1).await.unwrap();
        engine
            .add_subtotal_discount("tenant-a", "cart-3", "FULL".into(), DiscountKind::Percent, 100.0)
            .await
            .unwrap();

        let outcome = engine.subtotal("tenant-a", "cart-3").await.unwrap();
        match outcome {
            CartOutcome::Finalized(transaction) => assert_eq!(transaction.total_with_tax, 0.0),
            CartOutcome::Cart(_) => panic!("expected zero-due cart to finalize"),
        }
    }
}
