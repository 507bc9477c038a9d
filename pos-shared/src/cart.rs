//! The cart aggregate (§3.2) and the states of its finite-state machine (§4.1).

use serde::{Deserialize, Serialize};

use crate::ids::{Ambient, SessionCounters, TerminalRef};

/// States of the cart FSM (§4.1). A cart never leaves a terminal state
/// (`Completed`, `Cancelled`) — invariant 6 of §8.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartState {
    Initial,
    Idle,
    EnteringItem,
    Paying,
    Completed,
    Cancelled,
}

impl CartState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CartState::Completed | CartState::Cancelled)
    }
}

/// Discount kind — acts on the running remainder when percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percent,
    Absolute,
}

/// A discount applied either to a line item or to the cart subtotal (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub code: String,
    pub kind: DiscountKind,
    pub value: f64,
    /// Amount this discount actually reduced, resolved during pricing (§4.2).
    #[serde(default)]
    pub resolved_amount: f64,
}

impl Discount {
    pub fn new(code: impl Into<String>, kind: DiscountKind, value: f64) -> Self {
        Self {
            code: code.into(),
            kind,
            value,
            resolved_amount: 0.0,
        }
    }
}

/// How a tax code applies to the amount it targets (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxKind {
    /// Tax-exclusive: added on top of the tax-exclusive unit price.
    External,
    /// Tax-inclusive: already included in the unit price; base is back-derived.
    Internal,
    Exempt,
}

/// A resolved tax allocation for one line (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxAllocation {
    pub tax_code: String,
    pub kind: TaxKind,
    /// The amount the tax is computed against
    pub target_amount: f64,
    pub tax_amount: f64,
}

/// A single cart line (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// 1-based, dense within the cart
    pub line_no: u32,
    pub item_code: String,
    pub description: String,
    pub unit_price: f64,
    pub quantity: i32,
    /// unit_price * quantity, before discounts
    pub amount: f64,
    pub tax_code: String,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub line_discounts: Vec<Discount>,
    #[serde(default)]
    pub tax_allocations: Vec<TaxAllocation>,
}

impl LineItem {
    pub fn new(
        line_no: u32,
        item_code: impl Into<String>,
        description: impl Into<String>,
        unit_price: f64,
        quantity: i32,
        tax_code: impl Into<String>,
    ) -> Self {
        Self {
            line_no,
            item_code: item_code.into(),
            description: description.into(),
            unit_price,
            quantity,
            amount: unit_price * quantity as f64,
            tax_code: tax_code.into(),
            is_cancelled: false,
            line_discounts: Vec::new(),
            tax_allocations: Vec::new(),
        }
    }
}

/// A recorded payment towards the cart's net-due (§3.2, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntry {
    pub method_code: String,
    pub amount: f64,
    pub tendered: f64,
    pub change: f64,
    pub timestamp: i64,
}

/// The cart aggregate (§3.2): a mutable aggregate bound to one terminal
/// session, mutated only through the state machine (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub cart_id: String,
    pub terminal_ref: TerminalRef,
    pub state: CartState,
    pub line_items: Vec<LineItem>,
    pub subtotal_discounts: Vec<Discount>,
    pub payments: Vec<PaymentEntry>,
    pub staff_ref: Option<String>,
    /// Copied from the terminal session at creation, fixed thereafter
    pub session: SessionCounters,
    pub receipt_no: Option<i64>,
    pub transaction_no: Option<i64>,
    pub ambient: Ambient,

    // ---- computed by the pricing engine (§4.2), valid after `subtotal` ----
    #[serde(default)]
    pub total_with_tax: f64,
    #[serde(default)]
    pub taxable_total: f64,
    #[serde(default)]
    pub net_due: f64,
}

impl Cart {
    pub fn new(cart_id: String, terminal_ref: TerminalRef, session: SessionCounters, now: i64) -> Self {
        Self {
            cart_id,
            terminal_ref,
            state: CartState::Initial,
            line_items: Vec::new(),
            subtotal_discounts: Vec::new(),
            payments: Vec::new(),
            staff_ref: None,
            session,
            receipt_no: None,
            transaction_no: None,
            ambient: Ambient::new(now, "cart"),
            total_with_tax: 0.0,
            taxable_total: 0.0,
            net_due: 0.0,
        }
    }

    pub fn next_line_no(&self) -> u32 {
        self.line_items.len() as u32 + 1
    }

    pub fn cumulative_tendered(&self) -> f64 {
        self.payments.iter().map(|p| p.amount).sum()
    }
}
