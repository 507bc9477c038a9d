//! The terminal session controller (C12, §4.7): open/close, cash in/out,
//! and business-date advancement. Reuses the document store for both the
//! session record and the cash-movement log it reconciles against at
//! close, and publishes through the same event fabric as the cart FSM.

use std::sync::Arc;

use event_fabric::ledger::InMemoryLedgerStore;
use event_fabric::publisher::EventFabric;
use pos_shared::event::{CashEvent, SessionEvent, SessionReconciliation, Topic};
use pos_shared::ids::{SessionCounters, TerminalRef};
use pos_shared::money::{to_decimal, to_f64};
use pos_shared::payment::PaymentMethodCode;
use pos_shared::terminal::{TerminalSession, TerminalSessionState};
use pos_shared::transaction::{Transaction, TransactionType};
use pos_shared::util::{new_id, now_millis};
use pos_shared::{AppError, AppResult, ErrorCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lock::CartLockManager;
use crate::store::TenantStore;

const SESSION_TABLE: &str = "terminal_session";
const CASH_MOVEMENT_TABLE: &str = "cash_movement";
const TRANSACTION_TABLE: &str = "transaction";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashMovement {
    movement_id: String,
    terminal_ref: TerminalRef,
    session: SessionCounters,
    transaction_type: TransactionType,
    amount: f64,
    reason: Option<String>,
    staff_ref: Option<String>,
    created_at: i64,
}

pub struct TerminalSessionController {
    store: TenantStore,
    fabric: Arc<EventFabric<InMemoryLedgerStore>>,
    locks: Arc<CartLockManager>,
}

impl TerminalSessionController {
    pub fn new(store: TenantStore, fabric: Arc<EventFabric<InMemoryLedgerStore>>, locks: Arc<CartLockManager>) -> Self {
        Self { store, fabric, locks }
    }

    async fn load_or_create(&self, tenant_id: &str, terminal_ref: &TerminalRef) -> AppResult<TerminalSession> {
        let id = terminal_ref.canonical();
        match self.store.get::<TerminalSession>(tenant_id, SESSION_TABLE, &id).await? {
            Some(session) => Ok(session),
            None => Ok(TerminalSession::new(terminal_ref.clone(), now_millis())),
        }
    }

    async fn save(&self, tenant_id: &str, session: &TerminalSession) -> AppResult<()> {
        let id = session.terminal_ref.canonical();
        self.store.put(tenant_id, SESSION_TABLE, &id, session.clone()).await
    }

    /// The live session counters for a terminal that must already be
    /// `Opened` (§3.2: a cart's `session` field is copied from the
    /// terminal session at creation time).
    pub async fn current_session(&self, tenant_id: &str, terminal_ref: &TerminalRef) -> AppResult<SessionCounters> {
        let session = self.load_or_create(tenant_id, terminal_ref).await?;
        if session.state != TerminalSessionState::Opened {
            return Err(AppError::new(ErrorCode::TerminalNotOpen, format!("terminal {terminal_ref} is not open")));
        }
        Ok(session.session)
    }

    /// `open(initialAmount)` (§4.7): `Idle → Opened`, assigns the business
    /// date on a terminal's very first open (later opens keep it until
    /// `advanceBusinessDate` moves it explicitly), increments
    /// `openCounter`, resets `businessCounter`.
    pub async fn open(&self, tenant_id: &str, terminal_ref: &TerminalRef, initial_cash: f64, business_date_if_unset: &str) -> AppResult<TerminalSession> {
        let _guard = self.locks.acquire(&terminal_ref.canonical()).await;
        let mut session = self.load_or_create(tenant_id, terminal_ref).await?;
        if session.state == TerminalSessionState::Opened {
            return Err(AppError::new(ErrorCode::TerminalAlreadyOpen, format!("terminal {terminal_ref} already open")));
        }

        let business_date = if session.session.business_date == "00000000" {
            business_date_if_unset.to_string()
        } else {
            session.session.business_date.clone()
        };
        session.state = TerminalSessionState::Opened;
        session.session = SessionCounters::opening(business_date, session.session.open_counter + 1);
        session.initial_cash = initial_cash;
        session.counted_cash = None;
        session.ambient.touch(now_millis());
        self.save(tenant_id, &session).await?;

        let event_id = new_id();
        let event = SessionEvent {
            event_id: event_id.clone(),
            terminal_ref: terminal_ref.clone(),
            session: session.session.clone(),
            transaction_type: TransactionType::SessionOpen,
            initial_cash,
            counted_cash: None,
            reconciliation: None,
            published_at: now_millis(),
        };
        self.fabric
            .publish(Topic::OpenCloseLog, &event_id, serde_json::to_value(&event).unwrap_or_default())
            .await?;

        Ok(session)
    }

    /// `cashIn`/`cashOut` (§4.7): only in `Opened`, increments
    /// `businessCounter`, emits a `CashEvent`.
    async fn cash_movement(
        &self,
        tenant_id: &str,
        terminal_ref: &TerminalRef,
        signed_amount: f64,
        reason: Option<String>,
        staff_ref: Option<String>,
    ) -> AppResult<()> {
        let _guard = self.locks.acquire(&terminal_ref.canonical()).await;
        let mut session = self.load_or_create(tenant_id, terminal_ref).await?;
        if session.state != TerminalSessionState::Opened {
            return Err(AppError::new(ErrorCode::TerminalNotOpen, format!("terminal {terminal_ref} is not open")));
        }
        session.session.next_operation();
        session.ambient.touch(now_millis());
        self.save(tenant_id, &session).await?;

        let transaction_type = if signed_amount >= 0.0 { TransactionType::CashIn } else { TransactionType::CashOut };
        let movement = CashMovement {
            movement_id: new_id(),
            terminal_ref: terminal_ref.clone(),
            session: session.session.clone(),
            transaction_type,
            amount: signed_amount,
            reason: reason.clone(),
            staff_ref: staff_ref.clone(),
            created_at: now_millis(),
        };
        let movement_id = movement.movement_id.clone();
        self.store.put(tenant_id, CASH_MOVEMENT_TABLE, &movement_id, movement).await?;

        let event_id = new_id();
        let event = CashEvent {
            event_id: event_id.clone(),
            terminal_ref: terminal_ref.clone(),
            session: session.session.clone(),
            transaction_type,
            amount: signed_amount,
            reason,
            staff_ref,
            published_at: now_millis(),
        };
        self.fabric
            .publish(Topic::CashLog, &event_id, serde_json::to_value(&event).unwrap_or_default())
            .await?;

        Ok(())
    }

    /// Bump `businessCounter` for an operation that isn't itself a session
    /// write — a finalized transaction (§3.1: the counter advances "on each
    /// operation (transactions + cash movements)"). CAS-retried the same
    /// way `tombstone_original` is, since this races the session record
    /// against concurrent carts on other lanes of the same terminal.
    pub async fn bump_business_counter(&self, tenant_id: &str, terminal_ref: &TerminalRef) -> AppResult<u64> {
        let id = terminal_ref.canonical();
        crate::store::with_optimistic_retry(crate::store::RetryConfig::default(), || async {
            let mut session: TerminalSession = self
                .store
                .get(tenant_id, SESSION_TABLE, &id)
                .await?
                .ok_or_else(|| AppError::new(ErrorCode::TerminalNotOpen, format!("terminal {terminal_ref} is not open")))?;
            if session.state != TerminalSessionState::Opened {
                return Err(AppError::new(ErrorCode::TerminalNotOpen, format!("terminal {terminal_ref} is not open")));
            }
            let expected_version = session.ambient.version;
            let counter = session.session.next_operation();
            session.ambient.touch(now_millis());
            self.store.cas_put(tenant_id, SESSION_TABLE, &id, expected_version, session).await?;
            Ok(counter)
        })
        .await
    }

    pub async fn cash_in(&self, tenant_id: &str, terminal_ref: &TerminalRef, amount: f64, reason: Option<String>, staff_ref: Option<String>) -> AppResult<()> {
        if amount <= 0.0 {
            return Err(AppError::new(ErrorCode::PaymentAmountInvalid, "cash-in amount must be positive"));
        }
        self.cash_movement(tenant_id, terminal_ref, amount, reason, staff_ref).await
    }

    pub async fn cash_out(&self, tenant_id: &str, terminal_ref: &TerminalRef, amount: f64, reason: Option<String>, staff_ref: Option<String>) -> AppResult<()> {
        if amount <= 0.0 {
            return Err(AppError::new(ErrorCode::PaymentAmountInvalid, "cash-out amount must be positive"));
        }
        self.cash_movement(tenant_id, terminal_ref, -amount, reason, staff_ref).await
    }

    /// `close(countedAmount)` (§4.7): `Opened → Closed`, computes
    /// theoretical cash (`initial + cashIn - cashOut + cashSales -
    /// cashRefunds`), the difference, and emits a `SessionEvent(close)`
    /// carrying the reconciliation block (§3.4).
    pub async fn close(&self, tenant_id: &str, terminal_ref: &TerminalRef, counted_cash: f64) -> AppResult<SessionReconciliation> {
        let _guard = self.locks.acquire(&terminal_ref.canonical()).await;
        let mut session = self.load_or_create(tenant_id, terminal_ref).await?;
        if session.state != TerminalSessionState::Opened {
            return Err(AppError::new(ErrorCode::TerminalNotOpen, format!("terminal {terminal_ref} is not open")));
        }

        let movements: Vec<CashMovement> = self
            .store
            .query(
                tenant_id,
                "SELECT * FROM type::table($tb) WHERE session.business_date = $bd AND session.open_counter = $oc AND terminal_ref.tenant_id = $tenant AND terminal_ref.store_code = $store AND terminal_ref.terminal_no = $term",
                vec![
                    ("tb", serde_json::Value::String(CASH_MOVEMENT_TABLE.to_string())),
                    ("bd", serde_json::Value::String(session.session.business_date.clone())),
                    ("oc", serde_json::json!(session.session.open_counter)),
                    ("tenant", serde_json::Value::String(terminal_ref.tenant_id.clone())),
                    ("store", serde_json::Value::String(terminal_ref.store_code.clone())),
                    ("term", serde_json::Value::String(terminal_ref.terminal_no.clone())),
                ],
            )
            .await
            .unwrap_or_default();

        let transactions: Vec<Transaction> = self
            .store
            .query(
                tenant_id,
                "SELECT * FROM type::table($tb) WHERE session.business_date = $bd AND session.open_counter = $oc AND terminal_ref.tenant_id = $tenant AND terminal_ref.store_code = $store AND terminal_ref.terminal_no = $term",
                vec![
                    ("tb", serde_json::Value::String(TRANSACTION_TABLE.to_string())),
                    ("bd", serde_json::Value::String(session.session.business_date.clone())),
                    ("oc", serde_json::json!(session.session.open_counter)),
                    ("tenant", serde_json::Value::String(terminal_ref.tenant_id.clone())),
                    ("store", serde_json::Value::String(terminal_ref.store_code.clone())),
                    ("term", serde_json::Value::String(terminal_ref.terminal_no.clone())),
                ],
            )
            .await
            .unwrap_or_default();

        let cash_in: Decimal = movements.iter().filter(|m| m.amount > 0.0).map(|m| to_decimal(m.amount)).sum();
        let cash_out: Decimal = movements.iter().filter(|m| m.amount < 0.0).map(|m| to_decimal(-m.amount)).sum();

        let cash_wire_code = PaymentMethodCode::Cash.wire_code();
        let mut cash_sales = Decimal::ZERO;
        let mut cash_refunds = Decimal::ZERO;
        let mut last_transaction_no: Option<i64> = None;
        for txn in &transactions {
            if txn.is_cancelled {
                continue;
            }
            let cash_tendered: Decimal = txn
                .payments
                .iter()
                .filter(|p| p.method_code == cash_wire_code)
                .map(|p| to_decimal(p.amount))
                .sum();
            match txn.transaction_type {
                TransactionType::NormalSale | TransactionType::VoidReturn => cash_sales += cash_tendered,
                TransactionType::ReturnSale | TransactionType::VoidSale => cash_refunds += cash_tendered,
                _ => {}
            }
            last_transaction_no = last_transaction_no.max(Some(txn.transaction_no));
        }

        let theoretical_cash = to_decimal(session.initial_cash) + cash_in - cash_out + cash_sales - cash_refunds;
        let difference = to_decimal(counted_cash) - theoretical_cash;

        let reconciliation = SessionReconciliation {
            transaction_count: transactions.len() as u64,
            last_transaction_no,
            cash_movement_count: movements.len() as u64,
            theoretical_cash: to_f64(theoretical_cash),
            difference: to_f64(difference),
        };

        session.state = TerminalSessionState::Closed;
        session.counted_cash = Some(counted_cash);
        session.ambient.touch(now_millis());
        self.save(tenant_id, &session).await?;

        let event_id = new_id();
        let event = SessionEvent {
            event_id: event_id.clone(),
            terminal_ref: terminal_ref.clone(),
            session: session.session.clone(),
            transaction_type: TransactionType::SessionClose,
            initial_cash: session.initial_cash,
            counted_cash: Some(counted_cash),
            reconciliation: Some(reconciliation.clone()),
            published_at: now_millis(),
        };
        self.fabric
            .publish(Topic::OpenCloseLog, &event_id, serde_json::to_value(&event).unwrap_or_default())
            .await?;

        Ok(reconciliation)
    }

    /// `advanceBusinessDate` (§4.7): only in `Closed`, reassigns
    /// `businessDate`, returns to `Idle`.
    pub async fn advance_business_date(&self, tenant_id: &str, terminal_ref: &TerminalRef, new_business_date: &str) -> AppResult<TerminalSession> {
        let _guard = self.locks.acquire(&terminal_ref.canonical()).await;
        let mut session = self.load_or_create(tenant_id, terminal_ref).await?;
        if session.state != TerminalSessionState::Closed {
            return Err(AppError::new(ErrorCode::TerminalNotClosed, format!("terminal {terminal_ref} is not closed")));
        }
        session.session.business_date = new_business_date.to_string();
        session.state = TerminalSessionState::Idle;
        session.ambient.touch(now_millis());
        self.save(tenant_id, &session).await?;
        Ok(session)
    }
}
