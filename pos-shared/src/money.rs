//! Precise decimal arithmetic for monetary calculations (§4.2, §4.3).
//!
//! All calculations are done using `Decimal` internally; values cross
//! process/wire boundaries as `f64` rounded to 2 decimal places, the same
//! split the teacher's order-money module uses.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

const DECIMAL_PLACES: u32 = 2;

/// Tenant-configured rounding strategy applied at every tax-amount and
/// subtotal-discount-fraction computation (§4.2 rule 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    HalfUp,
    Floor,
    Ceiling,
}

impl Default for RoundingMode {
    fn default() -> Self {
        RoundingMode::HalfUp
    }
}

impl RoundingMode {
    pub fn round(&self, value: Decimal) -> Decimal {
        let strategy = match self {
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::Floor => RoundingStrategy::ToNegativeInfinity,
            RoundingMode::Ceiling => RoundingStrategy::ToPositiveInfinity,
        };
        value.round_dp_with_strategy(DECIMAL_PLACES, strategy)
    }
}

/// Convert an f64 wire value into a Decimal for calculation.
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert a Decimal back to f64 for storage/serialization, rounded half-up
/// to 2 decimal places regardless of the tenant rounding mode (display
/// precision is always 2dp; the rounding mode only affects which *amount*
/// rounds which way during tax/discount computation).
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// Tolerance for monetary equality comparisons (0.01).
pub fn money_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

pub fn approx_eq(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= money_tolerance()
}
