//! The pricing & tax engine (C7, §4.2).
//!
//! Line discounts resolve first (percent acting on the running remainder,
//! in declared order), then subtotal discounts reduce the sum of
//! post-line-discount amounts the same way. The subtotal-discount
//! reduction is prorated back across lines before tax allocation, so that
//! a line's tax is always computed against the amount the payer actually
//! owes for it rather than its pre-subtotal-discount amount — the
//! resolution for an ambiguity §4.2 leaves implicit, recorded alongside
//! the rest of this crate's design decisions.

use pos_shared::cart::{Cart, CartState, Discount, DiscountKind, LineItem, TaxAllocation, TaxKind};
use pos_shared::money::{money_tolerance, to_decimal, to_f64, RoundingMode};
use pos_shared::{AppError, AppResult};
use rust_decimal::Decimal;

use crate::masterdata::MasterDataCache;

pub struct PricingEngine<'a> {
    masterdata: &'a MasterDataCache,
}

impl<'a> PricingEngine<'a> {
    pub fn new(masterdata: &'a MasterDataCache) -> Self {
        Self { masterdata }
    }

    /// Prices the cart in place: resolves discounts, allocates tax per
    /// line, and sets `totalWithTax`/`taxableTotal`/`netDue` (§4.2).
    /// Returns the computed net-due so the caller (the FSM's `subtotal`
    /// transition, §4.1) can decide whether to move to `paying` or skip
    /// straight to `completed`.
    pub async fn price(&self, tenant_id: &str, cart: &mut Cart, rounding_mode: RoundingMode) -> AppResult<Decimal> {
        let active_indices: Vec<usize> = cart
            .line_items
            .iter()
            .enumerate()
            .filter(|(_, li)| !li.is_cancelled)
            .map(|(i, _)| i)
            .collect();

        let mut post_line_discount = vec![Decimal::ZERO; cart.line_items.len()];
        for &i in &active_indices {
            let raw = to_decimal(cart.line_items[i].unit_price) * Decimal::from(cart.line_items[i].quantity);
            let resolved = apply_discounts_sequentially(raw, &mut cart.line_items[i].line_discounts, rounding_mode);
            post_line_discount[i] = resolved;
        }

        let subtotal_base: Decimal = active_indices.iter().map(|&i| post_line_discount[i]).sum();
        let remaining = apply_discounts_sequentially(subtotal_base, &mut cart.subtotal_discounts, rounding_mode);

        let proration_factor = if subtotal_base.is_zero() {
            Decimal::ONE
        } else {
            remaining / subtotal_base
        };

        let mut prorated = vec![Decimal::ZERO; cart.line_items.len()];
        let mut prorated_sum = Decimal::ZERO;
        for (pos, &i) in active_indices.iter().enumerate() {
            let amount = if pos + 1 == active_indices.len() {
                // Last active line absorbs the rounding remainder so the
                // prorated total matches `remaining` exactly.
                remaining - prorated_sum
            } else {
                rounding_mode.round(post_line_discount[i] * proration_factor)
            };
            prorated[i] = amount;
            prorated_sum += amount;
        }

        let mut total_with_tax = Decimal::ZERO;
        let mut taxable_total = Decimal::ZERO;

        for &i in &active_indices {
            let tax_code = cart.line_items[i].tax_code.clone();
            let meta = self.masterdata.tax_code(tenant_id, &tax_code).await?;
            let amount = prorated[i];

            let allocation = match meta.kind {
                TaxKind::External => {
                    let tax_amount = rounding_mode.round(amount * meta.rate);
                    total_with_tax += amount + tax_amount;
                    taxable_total += amount;
                    TaxAllocation { tax_code, kind: TaxKind::External, target_amount: to_f64(amount), tax_amount: to_f64(tax_amount) }
                }
                TaxKind::Internal => {
                    let taxable_base = rounding_mode.round(amount / (Decimal::ONE + meta.rate));
                    let tax_amount = amount - taxable_base;
                    total_with_tax += amount;
                    taxable_total += taxable_base;
                    TaxAllocation { tax_code, kind: TaxKind::Internal, target_amount: to_f64(taxable_base), tax_amount: to_f64(tax_amount) }
                }
                TaxKind::Exempt => {
                    total_with_tax += amount;
                    TaxAllocation { tax_code, kind: TaxKind::Exempt, target_amount: to_f64(amount), tax_amount: 0.0 }
                }
            };
            cart.line_items[i].tax_allocations = vec![allocation];
        }

        cart.total_with_tax = to_f64(total_with_tax);
        cart.taxable_total = to_f64(taxable_total);
        let net_due = total_with_tax - to_decimal(cart.cumulative_tendered());
        cart.net_due = to_f64(net_due);

        Ok(net_due)
    }

    /// Guard for the `subtotal` operation (§4.1): only callable from
    /// `enteringItem`.
    pub fn check_state(cart: &Cart) -> AppResult<()> {
        if cart.state != CartState::EnteringItem {
            return Err(AppError::new(
                pos_shared::ErrorCode::InvalidCartOperation,
                format!("subtotal not allowed in state {:?}", cart.state),
            ));
        }
        Ok(())
    }
}

/// Apply a sequence of discounts to `base` in declared order, percent
/// discounts acting on the running remainder, writing each discount's
/// `resolvedAmount` as it resolves. Returns the remaining amount after all
/// discounts, floored at zero.
fn apply_discounts_sequentially(base: Decimal, discounts: &mut [Discount], rounding_mode: RoundingMode) -> Decimal {
    let mut remaining = base;
    for discount in discounts.iter_mut() {
        let reduction = match discount.kind {
            DiscountKind::Percent => rounding_mode.round(remaining * to_decimal(discount.value) / Decimal::from(100)),
            DiscountKind::Absolute => to_decimal(discount.value),
        };
        let reduction = reduction.min(remaining).max(Decimal::ZERO);
        discount.resolved_amount = to_f64(reduction);
        remaining -= reduction;
    }
    remaining.max(Decimal::ZERO)
}

/// Debug/property-test helper verifying §4.2's invariant 1 and §8.1
/// invariant 1: `grossSales = netSales + returns + lineDiscounts +
/// subtotalDiscounts + sumOfAllTaxes`. Not called on the hot path —
/// exercised by tests generating random carts.
pub fn check_gross_sales_invariant(
    gross_sales: Decimal,
    net_sales: Decimal,
    returns: Decimal,
    line_discounts: Decimal,
    subtotal_discounts: Decimal,
    sum_of_taxes: Decimal,
) -> bool {
    let lhs = gross_sales;
    let rhs = net_sales + returns + line_discounts + subtotal_discounts + sum_of_taxes;
    (lhs - rhs).abs() <= money_tolerance()
}

pub fn sum_line_discounts(items: &[LineItem]) -> Decimal {
    items
        .iter()
        .flat_map(|item| item.line_discounts.iter())
        .map(|d| to_decimal(d.resolved_amount))
        .sum()
}

pub fn sum_subtotal_discounts(cart: &Cart) -> Decimal {
    cart.subtotal_discounts.iter().map(|d| to_decimal(d.resolved_amount)).sum()
}

pub fn sum_taxes(cart: &Cart) -> Decimal {
    cart.line_items
        .iter()
        .flat_map(|item| item.tax_allocations.iter())
        .map(|t| to_decimal(t.tax_amount))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pos_shared::ids::{SessionCounters, TerminalRef};
    use crate::masterdata::{ItemMeta, MasterDataSource, TerminalMeta};
    use std::sync::Arc;

    struct FixtureSource;

    #[async_trait]
    impl MasterDataSource for FixtureSource {
        async fn load_item(&self, _tenant_id: &str, item_code: &str) -> AppResult<ItemMeta> {
            Ok(ItemMeta { item_code: item_code.to_string(), description: "widget".into(), unit_price: 0.0, tax_code: "EXT10".into() })
        }

        async fn load_tax_code(&self, _tenant_id: &str, tax_code: &str) -> AppResult<crate::masterdata::TaxCodeMeta> {
            let (kind, rate) = match tax_code {
                "EXT10" => (TaxKind::External, Decimal::new(1, 1)),
                "INT10" => (TaxKind::Internal, Decimal::new(1, 1)),
                "EXEMPT" => (TaxKind::Exempt, Decimal::ZERO),
                other => return Err(AppError::validation(format!("unknown tax code {other}"))),
            };
            Ok(crate::masterdata::TaxCodeMeta { tax_code: tax_code.to_string(), kind, rate })
        }

        async fn load_terminal(&self, _tenant_id: &str, _terminal_no: &str) -> AppResult<TerminalMeta> {
            Ok(TerminalMeta { rounding_mode: RoundingMode::HalfUp })
        }
    }

    fn sample_cart() -> Cart {
        let terminal = TerminalRef::new("tenant-a", "store-1", "t1");
        let session = SessionCounters::opening("20260101", 1);
        let mut cart = Cart::new("cart-1".into(), terminal, session, 0);
        cart.state = CartState::EnteringItem;
        cart
    }

    // S1: external tax, discount, no return.
    #[tokio::test]
    async fn s1_external_tax_with_line_discount() {
        let masterdata = MasterDataCache::new(Arc::new(FixtureSource));
        let engine = PricingEngine::new(&masterdata);
        let mut cart = sample_cart();
        let mut line = LineItem::new(1, "sku-1", "widget", 3500.0, 1, "EXT10");
        line.line_discounts.push(Discount::new("D1", DiscountKind::Absolute, 500.0));
        cart.line_items.push(line);

        let net_due = engine.price("tenant-a", &mut cart, RoundingMode::HalfUp).await.unwrap();

        assert_eq!(to_f64(net_due), 3300.0);
        assert_eq!(cart.total_with_tax, 3300.0);
        assert_eq!(cart.line_items[0].tax_allocations[0].tax_amount, 300.0);
    }

    // S2: internal tax, net sales excludes tax.
    #[tokio::test]
    async fn s2_internal_tax_backs_out_base() {
        let masterdata = MasterDataCache::new(Arc::new(FixtureSource));
        let engine = PricingEngine::new(&masterdata);
        let mut cart = sample_cart();
        cart.line_items.push(LineItem::new(1, "sku-2", "widget", 1100.0, 1, "INT10"));

        engine.price("tenant-a", &mut cart, RoundingMode::HalfUp).await.unwrap();

        assert_eq!(cart.total_with_tax, 1100.0);
        assert_eq!(cart.taxable_total, 1000.0);
        assert_eq!(cart.line_items[0].tax_allocations[0].tax_amount, 100.0);
    }

    #[tokio::test]
    async fn subtotal_discount_prorates_across_lines_before_tax() {
        let masterdata = MasterDataCache::new(Arc::new(FixtureSource));
        let engine = PricingEngine::new(&masterdata);
        let mut cart = sample_cart();
        cart.line_items.push(LineItem::new(1, "sku-3", "widget", 1000.0, 1, "EXEMPT"));
        cart.line_items.push(LineItem::new(2, "sku-4", "widget", 1000.0, 1, "EXEMPT"));
        cart.subtotal_discounts.push(Discount::new("S1", DiscountKind::Percent, 10.0));

        engine.price("tenant-a", &mut cart, RoundingMode::HalfUp).await.unwrap();

        assert_eq!(cart.total_with_tax, 1800.0);
    }
}
