//! The payment engine (C8, §4.3): a closed registry of payment-method
//! strategies resolved by code, built once at startup — the Rust
//! realization of the spec's `{code -> (module, class, ctor args)}`
//! configuration, closed and non-reflective as §9's "Strategy loading"
//! note requires. The teacher's lineage uses `enum_dispatch` for exactly
//! this kind of closed-set polymorphism elsewhere; here the registry is a
//! plain function table since there is only one operation (`apply`) per
//! method, not a trait with several.

use std::collections::HashMap;

use pos_shared::money::{money_tolerance, to_decimal, to_f64};
use pos_shared::payment::PaymentMethodCode;
use pos_shared::{AppError, AppResult, ErrorCode};
use rust_decimal::Decimal;

/// The outcome of applying one payment entry against the remaining due.
pub struct PaymentOutcome {
    pub accepted_amount: Decimal,
    pub change: Decimal,
}

type ApplyFn = fn(tendered: Decimal, remaining_due: Decimal) -> AppResult<PaymentOutcome>;

pub struct PaymentMethodRegistry {
    methods: HashMap<PaymentMethodCode, ApplyFn>,
}

fn apply_cash(tendered: Decimal, remaining_due: Decimal) -> AppResult<PaymentOutcome> {
    if tendered <= Decimal::ZERO {
        return Err(AppError::new(ErrorCode::PaymentAmountInvalid, "payment amount must be positive"));
    }
    let accepted_amount = tendered.min(remaining_due.max(Decimal::ZERO));
    let change = (tendered - accepted_amount).max(Decimal::ZERO);
    Ok(PaymentOutcome { accepted_amount, change })
}

fn apply_non_cash(tendered: Decimal, remaining_due: Decimal) -> AppResult<PaymentOutcome> {
    if tendered <= Decimal::ZERO {
        return Err(AppError::new(ErrorCode::PaymentAmountInvalid, "payment amount must be positive"));
    }
    if tendered - remaining_due > money_tolerance() {
        return Err(AppError::new(
            ErrorCode::PaymentExceedsDue,
            format!("tendered {} exceeds remaining due {remaining_due}", to_f64(tendered)),
        ));
    }
    Ok(PaymentOutcome { accepted_amount: tendered, change: Decimal::ZERO })
}

impl PaymentMethodRegistry {
    /// The three methods configured in §4.3: cash (gives change), cashless
    /// and other (neither gives change, both reject over-tender).
    pub fn configured() -> Self {
        let mut methods: HashMap<PaymentMethodCode, ApplyFn> = HashMap::new();
        methods.insert(PaymentMethodCode::Cash, apply_cash);
        methods.insert(PaymentMethodCode::Cashless, apply_non_cash);
        methods.insert(PaymentMethodCode::Other, apply_non_cash);
        Self { methods }
    }

    pub fn apply(&self, code: PaymentMethodCode, tendered: f64, remaining_due: f64) -> AppResult<PaymentOutcome> {
        let apply_fn = self
            .methods
            .get(&code)
            .ok_or_else(|| AppError::new(ErrorCode::UnknownPaymentMethod, format!("unknown payment method {code:?}")))?;
        apply_fn(to_decimal(tendered), to_decimal(remaining_due))
    }
}

impl Default for PaymentMethodRegistry {
    fn default() -> Self {
        Self::configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_over_tender_gives_change() {
        let registry = PaymentMethodRegistry::configured();
        let outcome = registry.apply(PaymentMethodCode::Cash, 2000.0, 1300.0).unwrap();
        assert_eq!(to_f64(outcome.accepted_amount), 1300.0);
        assert_eq!(to_f64(outcome.change), 700.0);
    }

    #[test]
    fn cashless_over_tender_is_rejected() {
        let registry = PaymentMethodRegistry::configured();
        let err = registry.apply(PaymentMethodCode::Cashless, 2000.0, 1300.0).unwrap_err();
        assert_eq!(err.code, ErrorCode::PaymentExceedsDue);
    }

    #[test]
    fn split_payment_exact_match_gives_no_change() {
        let registry = PaymentMethodRegistry::configured();
        let outcome = registry.apply(PaymentMethodCode::Cashless, 2000.0, 3300.0).unwrap();
        assert_eq!(to_f64(outcome.accepted_amount), 2000.0);
        assert_eq!(to_f64(outcome.change), 0.0);
    }
}
