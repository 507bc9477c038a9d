//! The illustrative HTTP surface (§6.1): one axum handler per cart-FSM and
//! terminal-session operation, wrapped in the §6.1 response envelope.
//! Transport details (auth scheme, exact path shape) are explicitly
//! non-goals (§1) — this surface exists to exercise the engine end to end,
//! not to fix a wire contract.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use event_fabric::ledger::InMemoryLedgerStore;
use event_fabric::publisher::EventFabric;
use pos_shared::cart::{Cart, DiscountKind};
use pos_shared::ids::TerminalRef;
use pos_shared::payment::PaymentMethodCode;
use pos_shared::transaction::Transaction;
use pos_shared::util::new_id;
use pos_shared::AppError;

use crate::fsm::{CartEngine, CartOutcome};
use crate::session::TerminalSessionController;
use crate::transaction_service::{reversal_cart_from, TransactionService};

#[derive(Clone)]
pub struct AppState {
    pub cart_engine: Arc<CartEngine>,
    pub sessions: Arc<TerminalSessionController>,
    pub transactions: Arc<TransactionService>,
    pub fabric: Arc<EventFabric<InMemoryLedgerStore>>,
}

/// Wraps `AppError` for the axum boundary; everywhere else in the
/// workspace uses the bare `pos_shared::AppError`.
struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status().as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = pos_shared::ApiResponse::<()>::error("request", &self.0);
        (status, Json(body)).into_response()
    }
}

fn ok<T: Serialize>(operation: &str, data: T) -> Json<pos_shared::ApiResponse<T>> {
    Json(pos_shared::ApiResponse::ok(operation, data))
}

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub tenant_id: String,
    pub store_code: String,
    pub terminal_no: String,
}

impl TerminalQuery {
    fn terminal_ref(&self) -> TerminalRef {
        TerminalRef::new(self.tenant_id.clone(), self.store_code.clone(), self.terminal_no.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCartRequest {
    #[serde(default)]
    pub staff_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddLineItemRequest {
    pub item_code: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUnitPriceRequest {
    pub unit_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddDiscountRequest {
    pub code: String,
    pub kind: DiscountKind,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct AddPaymentRequest {
    pub code: PaymentMethodCode,
    pub amount: f64,
}

/// The two shapes a cart operation can resolve to: the cart mid-flow, or
/// the finalized transaction (§4.1 `subtotal`/`addPayment`).
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CartOrTransaction {
    Cart(Cart),
    Transaction(Transaction),
}

impl From<Cart> for CartOrTransaction {
    fn from(cart: Cart) -> Self {
        CartOrTransaction::Cart(cart)
    }
}

impl From<CartOutcome> for CartOrTransaction {
    fn from(outcome: CartOutcome) -> Self {
        match outcome {
            CartOutcome::Cart(cart) => CartOrTransaction::Cart(cart),
            CartOutcome::Finalized(transaction) => CartOrTransaction::Transaction(transaction),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/carts", post(create_cart))
        .route("/carts/{id}/lineItems", post(add_line_item))
        .route("/carts/{id}/lineItems/{n}/quantity", patch(update_quantity))
        .route("/carts/{id}/lineItems/{n}/unitPrice", patch(update_unit_price))
        .route("/carts/{id}/lineItems/{n}/discounts", post(add_line_discount))
        .route("/carts/{id}/lineItems/{n}/cancel", post(cancel_line_item))
        .route("/carts/{id}/subtotalDiscounts", post(add_subtotal_discount))
        .route("/carts/{id}/subtotal", post(subtotal))
        .route("/carts/{id}/payments", post(add_payment))
        .route("/carts/{id}/bill", get(bill))
        .route("/carts/{id}/cancel", post(cancel_cart))
        .route("/carts/{id}/resume-item-entry", post(resume_item_entry))
        .route("/transactions/{no}", get(get_transaction))
        .route("/transactions/{no}/void", post(void_transaction))
        .route("/transactions/{no}/return", post(return_transaction))
        .route("/terminals/open", post(open_terminal))
        .route("/terminals/close", post(close_terminal))
        .route("/terminals/cash-in", post(cash_in))
        .route("/terminals/cash-out", post(cash_out))
        .route("/terminals/advance-business-date", post(advance_business_date))
        .route("/events/{eventId}/ack", post(acknowledge_event))
}

async fn create_cart(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<CreateCartRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let terminal_ref = terminal.terminal_ref();
    let session = state.sessions.current_session(&terminal.tenant_id, &terminal_ref).await?;
    let cart = state
        .cart_engine
        .create_cart(&terminal.tenant_id, new_id(), terminal_ref, session, body.staff_ref)
        .await?;
    Ok(ok("createCart", cart))
}

async fn add_line_item(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
    Json(body): Json<AddLineItemRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.add_line_item(&terminal.tenant_id, &id, &body.item_code, body.quantity).await?;
    Ok(ok("addLineItem", cart))
}

async fn cancel_line_item(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path((id, n)): Path<(String, u32)>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.cancel_line_item(&terminal.tenant_id, &id, n).await?;
    Ok(ok("cancelLineItem", cart))
}

async fn update_quantity(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<UpdateQuantityRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.update_quantity(&terminal.tenant_id, &id, n, body.quantity).await?;
    Ok(ok("updateQuantity", cart))
}

async fn update_unit_price(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<UpdateUnitPriceRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.update_unit_price(&terminal.tenant_id, &id, n, body.unit_price).await?;
    Ok(ok("updateUnitPrice", cart))
}

async fn add_line_discount(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path((id, n)): Path<(String, u32)>,
    Json(body): Json<AddDiscountRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state
        .cart_engine
        .add_line_discount(&terminal.tenant_id, &id, n, body.code, body.kind, body.value)
        .await?;
    Ok(ok("addLineDiscount", cart))
}

async fn add_subtotal_discount(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
    Json(body): Json<AddDiscountRequest>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state
        .cart_engine
        .add_subtotal_discount(&terminal.tenant_id, &id, body.code, body.kind, body.value)
        .await?;
    Ok(ok("addSubtotalDiscount", cart))
}

async fn subtotal(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
) -> Result<Json<pos_shared::ApiResponse<CartOrTransaction>>, ApiError> {
    let outcome = state.cart_engine.subtotal(&terminal.tenant_id, &id).await?;
    Ok(ok("subtotal", outcome.into()))
}

async fn add_payment(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
    Json(body): Json<AddPaymentRequest>,
) -> Result<Json<pos_shared::ApiResponse<CartOrTransaction>>, ApiError> {
    let outcome = state.cart_engine.add_payment(&terminal.tenant_id, &id, body.code, body.amount).await?;
    Ok(ok("addPayment", outcome.into()))
}

async fn bill(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
) -> Result<Json<pos_shared::ApiResponse<Transaction>>, ApiError> {
    let cart = state.cart_engine.get_cart(&terminal.tenant_id, &id).await?;
    let transaction_no = cart
        .transaction_no
        .ok_or_else(|| AppError::validation("cart has not finalized a transaction yet"))?;
    let transaction = state
        .transactions
        .get(&terminal.tenant_id, &cart.terminal_ref, &cart.session.business_date, transaction_no)
        .await?;
    Ok(ok("bill", transaction))
}

async fn cancel_cart(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.cancel_cart(&terminal.tenant_id, &id).await?;
    Ok(ok("cancelCart", cart))
}

async fn resume_item_entry(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Path(id): Path<String>,
) -> Result<Json<pos_shared::ApiResponse<Cart>>, ApiError> {
    let cart = state.cart_engine.resume_item_entry(&terminal.tenant_id, &id).await?;
    Ok(ok("resumeItemEntry", cart))
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    pub tenant_id: String,
    pub store_code: String,
    pub terminal_no: String,
    pub business_date: String,
}

async fn get_transaction(
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
    Path(no): Path<i64>,
) -> Result<Json<pos_shared::ApiResponse<Transaction>>, ApiError> {
    let terminal_ref = TerminalRef::new(q.tenant_id.clone(), q.store_code, q.terminal_no);
    let transaction = state.transactions.get(&q.tenant_id, &terminal_ref, &q.business_date, no).await?;
    Ok(ok("getTransaction", transaction))
}

async fn void_transaction(
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
    Path(no): Path<i64>,
) -> Result<Json<pos_shared::ApiResponse<Transaction>>, ApiError> {
    let terminal_ref = TerminalRef::new(q.tenant_id.clone(), q.store_code.clone(), q.terminal_no.clone());
    let original = state.transactions.get(&q.tenant_id, &terminal_ref, &q.business_date, no).await?;
    let reversal = reversal_cart_from(&original, new_id());
    let transaction = state.transactions.finalize_void(&q.tenant_id, &reversal, &original).await?;
    Ok(ok("voidTransaction", transaction))
}

async fn return_transaction(
    State(state): State<AppState>,
    Query(q): Query<TransactionQuery>,
    Path(no): Path<i64>,
) -> Result<Json<pos_shared::ApiResponse<Transaction>>, ApiError> {
    let terminal_ref = TerminalRef::new(q.tenant_id.clone(), q.store_code.clone(), q.terminal_no.clone());
    let original = state.transactions.get(&q.tenant_id, &terminal_ref, &q.business_date, no).await?;
    let reversal = reversal_cart_from(&original, new_id());
    let transaction = state.transactions.finalize_return(&q.tenant_id, &reversal, no).await?;
    Ok(ok("returnTransaction", transaction))
}

#[derive(Debug, Deserialize)]
pub struct OpenTerminalRequest {
    pub initial_cash: f64,
}

async fn open_terminal(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<OpenTerminalRequest>,
) -> Result<Json<pos_shared::ApiResponse<pos_shared::TerminalSession>>, ApiError> {
    let today = pos_shared::util::business_date(pos_shared::util::now_millis(), chrono_tz::UTC);
    let session = state
        .sessions
        .open(&terminal.tenant_id, &terminal.terminal_ref(), body.initial_cash, &today)
        .await?;
    Ok(ok("openTerminal", session))
}

#[derive(Debug, Deserialize)]
pub struct CloseTerminalRequest {
    pub counted_cash: f64,
}

async fn close_terminal(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<CloseTerminalRequest>,
) -> Result<Json<pos_shared::ApiResponse<pos_shared::event::SessionReconciliation>>, ApiError> {
    let reconciliation = state.sessions.close(&terminal.tenant_id, &terminal.terminal_ref(), body.counted_cash).await?;
    Ok(ok("closeTerminal", reconciliation))
}

#[derive(Debug, Deserialize)]
pub struct CashMovementRequest {
    pub amount: f64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub staff_ref: Option<String>,
}

async fn cash_in(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<CashMovementRequest>,
) -> Result<Json<pos_shared::ApiResponse<()>>, ApiError> {
    state
        .sessions
        .cash_in(&terminal.tenant_id, &terminal.terminal_ref(), body.amount, body.reason, body.staff_ref)
        .await?;
    Ok(ok("cashIn", ()))
}

async fn cash_out(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<CashMovementRequest>,
) -> Result<Json<pos_shared::ApiResponse<()>>, ApiError> {
    state
        .sessions
        .cash_out(&terminal.tenant_id, &terminal.terminal_ref(), body.amount, body.reason, body.staff_ref)
        .await?;
    Ok(ok("cashOut", ()))
}

#[derive(Debug, Deserialize)]
pub struct AdvanceBusinessDateRequest {
    pub new_business_date: String,
}

async fn advance_business_date(
    State(state): State<AppState>,
    Query(terminal): Query<TerminalQuery>,
    Json(body): Json<AdvanceBusinessDateRequest>,
) -> Result<Json<pos_shared::ApiResponse<pos_shared::TerminalSession>>, ApiError> {
    let session = state
        .sessions
        .advance_business_date(&terminal.tenant_id, &terminal.terminal_ref(), &body.new_business_date)
        .await?;
    Ok(ok("advanceBusinessDate", session))
}

/// The §4.5 acknowledgement path: a subscriber reports delivery outcome for
/// one event back to the publisher that sent it, independent of whichever
/// tenant the event belongs to — the delivery ledger is keyed by event id
/// alone.
#[derive(Debug, Deserialize)]
pub struct AckEventRequest {
    pub subscriber_id: String,
    pub success: bool,
}

async fn acknowledge_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Json(body): Json<AckEventRequest>,
) -> Result<Json<pos_shared::ApiResponse<()>>, ApiError> {
    state.fabric.acknowledge(&event_id, &body.subscriber_id, body.success)?;
    Ok(ok("acknowledgeEvent", ()))
}
