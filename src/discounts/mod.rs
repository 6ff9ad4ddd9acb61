//! Discounts
//!
//! Discount value application and the discount records materialized on orders
//! and order lines.

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rusty_money::{Money, MoneyError, iso::Currency};
use smallvec::SmallVec;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    money::{
        Quantize, TaxedMoney, fraction, min_price, money, non_negative, percent, sum_prices,
        unit_price, zero,
    },
    order::OrderLine,
};

pub mod manual;
pub mod vouchers;

/// Errors specific to discount calculations.
#[derive(Debug, Error, PartialEq)]
pub enum DiscountError {
    /// Decimal arithmetic overflowed while applying a discount.
    #[error("discount arithmetic overflowed")]
    Overflow,

    /// Wrapped money arithmetic or currency mismatch error.
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// How a discount value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountValueType {
    /// Subtract a fixed amount (e.g., "$3 off").
    Fixed,

    /// Subtract a percentage, where `10` means 10%.
    Percentage,
}

/// Where a discount record originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscountType {
    /// Catalogue promotion matched against the line's variant.
    Promotion,

    /// Voucher code applied to the order.
    Voucher,

    /// Order promotion, either a subtotal discount or a gift.
    OrderPromotion,

    /// Entered by staff.
    Manual,
}

/// Which order bucket an order-level discount reduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountTarget {
    /// Reduces the subtotal; prorated across lines.
    Subtotal,

    /// Reduces the shipping price only.
    Shipping,

    /// Split across subtotal and shipping (manual order discounts).
    Total,
}

/// A discount attached to a single order line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineDiscount<'a> {
    /// Discount id
    pub id: Uuid,

    /// Discount source
    pub discount_type: DiscountType,

    /// Fixed or percentage
    pub value_type: DiscountValueType,

    /// Discount value, per unit for fixed discounts
    pub value: Decimal,

    /// Realized discount for the line's full quantity
    pub amount: Money<'a, Currency>,

    /// Human readable reason, e.g. `Voucher code: SAVE10`
    pub reason: Option<String>,

    /// Voucher code for voucher discounts
    pub voucher_code: Option<String>,

    /// Promotion rule for promotion discounts
    pub promotion_rule_id: Option<Uuid>,
}

impl<'a> LineDiscount<'a> {
    /// Create a discount with a fresh id.
    pub fn new(
        discount_type: DiscountType,
        value_type: DiscountValueType,
        value: Decimal,
        amount: Money<'a, Currency>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            discount_type,
            value_type,
            value,
            amount,
            reason: None,
            voucher_code: None,
            promotion_rule_id: None,
        }
    }

    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A discount attached to the order as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDiscount<'a> {
    /// Discount id
    pub id: Uuid,

    /// Discount source
    pub discount_type: DiscountType,

    /// Bucket the discount reduces
    pub target: DiscountTarget,

    /// Fixed or percentage
    pub value_type: DiscountValueType,

    /// Discount value
    pub value: Decimal,

    /// Realized discount amount
    pub amount: Money<'a, Currency>,

    /// Display name, e.g. the voucher name
    pub name: Option<String>,

    /// Human readable reason
    pub reason: Option<String>,

    /// Voucher code for voucher discounts
    pub voucher_code: Option<String>,

    /// Promotion rule for order promotion discounts
    pub promotion_rule_id: Option<Uuid>,
}

impl<'a> OrderDiscount<'a> {
    /// Create a discount with a fresh id and a zero amount.
    pub fn new(
        discount_type: DiscountType,
        target: DiscountTarget,
        value_type: DiscountValueType,
        value: Decimal,
        currency: &'a Currency,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            discount_type,
            target,
            value_type,
            value,
            amount: zero(currency),
            name: None,
            reason: None,
            voucher_code: None,
            promotion_rule_id: None,
        }
    }

    /// A staff-entered discount split across subtotal and shipping.
    pub fn manual(value_type: DiscountValueType, value: Decimal, currency: &'a Currency) -> Self {
        Self::new(
            DiscountType::Manual,
            DiscountTarget::Total,
            value_type,
            value,
            currency,
        )
    }

    /// Set the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Application order among order-level discounts: voucher and promotion
    /// discounts reduce the subtotal before manual discounts see it.
    pub(crate) fn precedence(&self) -> u8 {
        match self.target {
            DiscountTarget::Shipping => 0,
            DiscountTarget::Subtotal => 1,
            DiscountTarget::Total => 2,
        }
    }
}

/// Discount ids and order lines touched by a resolver pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscountChanges {
    /// Discounts created during the pass
    pub created: SmallVec<[Uuid; 4]>,

    /// Existing discounts whose values changed
    pub updated: SmallVec<[Uuid; 4]>,

    /// Discounts removed during the pass
    pub deleted: SmallVec<[Uuid; 4]>,

    /// Gift lines added to the order
    pub created_lines: SmallVec<[Uuid; 1]>,

    /// Lines removed from the order
    pub deleted_lines: SmallVec<[Uuid; 1]>,
}

impl DiscountChanges {
    /// Fold another pass's changes into this one.
    pub fn merge(&mut self, other: DiscountChanges) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.deleted.extend(other.deleted);
        self.created_lines.extend(other.created_lines);
        self.deleted_lines.extend(other.deleted_lines);
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.created_lines.is_empty()
            && self.deleted_lines.is_empty()
    }
}

/// A price shape a discount can be applied to.
pub trait Discountable<'a>: Sized {
    /// Subtract a fixed amount. The result may be negative.
    ///
    /// # Errors
    ///
    /// Returns a [`DiscountError`] on currency mismatch.
    fn discount_fixed(self, amount: Money<'a, Currency>) -> Result<Self, DiscountError>;

    /// Multiply by `1 - percentage`, rounding half up.
    ///
    /// # Errors
    ///
    /// Returns [`DiscountError::Overflow`] if the arithmetic overflows.
    fn discount_percentage(self, percentage: Percentage) -> Result<Self, DiscountError>;
}

impl<'a> Discountable<'a> for Money<'a, Currency> {
    fn discount_fixed(self, amount: Money<'a, Currency>) -> Result<Self, DiscountError> {
        Ok(self.sub(amount)?)
    }

    fn discount_percentage(self, percentage: Percentage) -> Result<Self, DiscountError> {
        let factor = Decimal::ONE
            .checked_sub(fraction(percentage))
            .ok_or(DiscountError::Overflow)?;

        let discounted = self
            .amount()
            .checked_mul(factor)
            .ok_or(DiscountError::Overflow)?;

        Ok(money(discounted, self.currency()).quantize())
    }
}

impl<'a> Discountable<'a> for TaxedMoney<'a> {
    fn discount_fixed(self, amount: Money<'a, Currency>) -> Result<Self, DiscountError> {
        Ok(TaxedMoney {
            net: self.net.discount_fixed(amount)?,
            gross: self.gross.discount_fixed(amount)?,
        })
    }

    fn discount_percentage(self, percentage: Percentage) -> Result<Self, DiscountError> {
        Ok(TaxedMoney {
            net: self.net.discount_percentage(percentage)?,
            gross: self.gross.discount_percentage(percentage)?,
        })
    }
}

/// Apply a fixed or percentage discount value to a price.
///
/// Percentage values are in percent points (`10` is 10%). Fixed discounts are
/// not floored at zero; callers clamp.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn apply_discount_to_value<'a, P: Discountable<'a>>(
    value: Decimal,
    value_type: DiscountValueType,
    currency: &'a Currency,
    price: P,
) -> Result<P, DiscountError> {
    match value_type {
        DiscountValueType::Fixed => price.discount_fixed(money(value, currency)),
        DiscountValueType::Percentage => price.discount_percentage(percent(value)),
    }
}

/// The amount a discount value takes off `price`, clamped to `[0, price]`.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn discount_amount<'a>(
    value: Decimal,
    value_type: DiscountValueType,
    price: Money<'a, Currency>,
) -> Result<Money<'a, Currency>, DiscountError> {
    let price = non_negative(price);
    let discounted = non_negative(apply_discount_to_value(
        value,
        value_type,
        price.currency(),
        price,
    )?);

    Ok(non_negative(price.sub(discounted)?))
}

/// Reason recorded for voucher discounts.
pub fn voucher_reason(code: &str) -> String {
    format!("Voucher code: {code}")
}

/// Reason recorded for promotion discounts.
pub fn promotion_reason(promotion_id: Uuid) -> String {
    format!("Promotion: {promotion_id}")
}

/// Recompute the line's denormalized discount summary and its base unit price
/// from the discounts attached to it.
///
/// The base unit price is always re-derived from the undiscounted base price,
/// so repeated calls never stack a discount twice.
///
/// # Errors
///
/// Returns a [`DiscountError`] if a discount uses another currency.
pub fn update_unit_discount_fields(line: &mut OrderLine<'_>) -> Result<(), DiscountError> {
    let undiscounted = line.undiscounted_base_unit_price;
    let currency = undiscounted.currency();

    let total = sum_prices(currency, line.discounts.iter().map(|discount| discount.amount))?;
    let unit = unit_price(total, line.quantity).unwrap_or_else(|| zero(currency));
    let unit = min_price(non_negative(unit), non_negative(undiscounted))?;

    line.unit_discount_amount = unit;
    line.base_unit_price = non_negative(undiscounted.sub(unit)?);

    match line.discounts.as_slice() {
        [] => {
            line.unit_discount_type = None;
            line.unit_discount_value = Decimal::ZERO;
            line.unit_discount_reason = None;
        }
        [single] => {
            line.unit_discount_type = Some(single.value_type);
            line.unit_discount_value = single.value;
            line.unit_discount_reason = single.reason.clone();
        }
        several => {
            let reasons: Vec<&str> = several
                .iter()
                .filter_map(|discount| discount.reason.as_deref())
                .collect();

            line.unit_discount_type = Some(DiscountValueType::Fixed);
            line.unit_discount_value = *unit.amount();
            line.unit_discount_reason = (!reasons.is_empty()).then(|| reasons.join("; "));
        }
    }

    Ok(())
}

/// Remove the line's discounts matching `predicate`, recording their ids.
pub(crate) fn remove_line_discounts(
    line: &mut OrderLine<'_>,
    changes: &mut DiscountChanges,
    predicate: impl Fn(&LineDiscount<'_>) -> bool,
) {
    line.discounts.retain(|discount| {
        if predicate(discount) {
            changes.deleted.push(discount.id);
            false
        } else {
            true
        }
    });
}

/// Remove the order's discounts matching `predicate`, recording their ids.
pub(crate) fn remove_order_discounts(
    discounts: &mut Vec<OrderDiscount<'_>>,
    changes: &mut DiscountChanges,
    predicate: impl Fn(&OrderDiscount<'_>) -> bool,
) {
    discounts.retain(|discount| {
        if predicate(discount) {
            changes.deleted.push(discount.id);
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::{GBP, USD};
    use testresult::TestResult;

    use crate::order::{OrderLine, ProductVariantRef};

    use super::*;

    fn line(price_minor: i64, quantity: u32) -> OrderLine<'static> {
        OrderLine::new(
            ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7()),
            "Shirt",
            quantity,
            Money::from_minor(price_minor, USD),
        )
    }

    #[test]
    fn percentage_discount_rounds_half_up() -> TestResult {
        let price = Money::from_minor(999, GBP);
        let discounted =
            apply_discount_to_value(Decimal::from(15), DiscountValueType::Percentage, GBP, price)?;

        // 9.99 * 0.85 = 8.4915
        assert_eq!(discounted, Money::from_minor(849, GBP));

        Ok(())
    }

    #[test]
    fn fixed_discount_is_not_floored_at_zero() -> TestResult {
        let price = Money::from_minor(200, GBP);
        let discounted =
            apply_discount_to_value(Decimal::from(5), DiscountValueType::Fixed, GBP, price)?;

        assert_eq!(discounted, Money::from_minor(-300, GBP));

        Ok(())
    }

    #[test]
    fn discount_applies_to_both_taxed_parts() -> TestResult {
        let price = TaxedMoney::new(Money::from_minor(1000, GBP), Money::from_minor(1230, GBP))?;
        let discounted =
            apply_discount_to_value(Decimal::from(10), DiscountValueType::Percentage, GBP, price)?;

        assert_eq!(discounted.net, Money::from_minor(900, GBP));
        assert_eq!(discounted.gross, Money::from_minor(1107, GBP));

        Ok(())
    }

    #[test]
    fn discount_amount_is_clamped_to_price() -> TestResult {
        let amount = discount_amount(
            Decimal::from(50),
            DiscountValueType::Fixed,
            Money::from_minor(1000, GBP),
        )?;

        assert_eq!(amount, Money::from_minor(1000, GBP));

        Ok(())
    }

    #[test]
    fn percentage_overflow_returns_error() {
        let price = money(Decimal::MAX, GBP);
        let result = apply_discount_to_value(
            Decimal::from(-1000),
            DiscountValueType::Percentage,
            GBP,
            price,
        );

        assert_eq!(result, Err(DiscountError::Overflow));
    }

    #[test]
    fn unit_discount_fields_for_single_discount() -> TestResult {
        let mut line = line(1000, 2);
        line.discounts.push(
            LineDiscount::new(
                DiscountType::Voucher,
                DiscountValueType::Fixed,
                Decimal::ONE,
                Money::from_minor(200, USD),
            )
            .with_reason("Voucher code: SAVE"),
        );

        update_unit_discount_fields(&mut line)?;

        assert_eq!(line.unit_discount_amount, Money::from_minor(100, USD));
        assert_eq!(line.base_unit_price, Money::from_minor(900, USD));
        assert_eq!(line.unit_discount_type, Some(DiscountValueType::Fixed));
        assert_eq!(line.unit_discount_value, Decimal::ONE);
        assert_eq!(line.unit_discount_reason.as_deref(), Some("Voucher code: SAVE"));

        Ok(())
    }

    #[test]
    fn unit_discount_fields_join_stacked_reasons() -> TestResult {
        let mut line = line(1000, 1);
        line.discounts.push(
            LineDiscount::new(
                DiscountType::Promotion,
                DiscountValueType::Percentage,
                Decimal::from(10),
                Money::from_minor(100, USD),
            )
            .with_reason("Promotion: A"),
        );
        line.discounts.push(
            LineDiscount::new(
                DiscountType::Voucher,
                DiscountValueType::Fixed,
                Decimal::ONE,
                Money::from_minor(100, USD),
            )
            .with_reason("Voucher code: B"),
        );

        update_unit_discount_fields(&mut line)?;

        assert_eq!(line.base_unit_price, Money::from_minor(800, USD));
        assert_eq!(line.unit_discount_type, Some(DiscountValueType::Fixed));
        assert_eq!(line.unit_discount_value, Decimal::new(200, 2));
        assert_eq!(
            line.unit_discount_reason.as_deref(),
            Some("Promotion: A; Voucher code: B")
        );

        Ok(())
    }

    #[test]
    fn unit_discount_fields_are_idempotent() -> TestResult {
        let mut line = line(1000, 1);
        line.discounts.push(LineDiscount::new(
            DiscountType::Manual,
            DiscountValueType::Fixed,
            Decimal::from(3),
            Money::from_minor(300, USD),
        ));

        update_unit_discount_fields(&mut line)?;
        update_unit_discount_fields(&mut line)?;

        assert_eq!(line.base_unit_price, Money::from_minor(700, USD));

        Ok(())
    }

    #[test]
    fn unit_discount_never_exceeds_price() -> TestResult {
        let mut line = line(500, 1);
        line.discounts.push(LineDiscount::new(
            DiscountType::Manual,
            DiscountValueType::Fixed,
            Decimal::from(10),
            Money::from_minor(1000, USD),
        ));

        update_unit_discount_fields(&mut line)?;

        assert_eq!(line.base_unit_price, Money::from_minor(0, USD));
        assert_eq!(line.unit_discount_amount, Money::from_minor(500, USD));

        Ok(())
    }

    #[test]
    fn changes_merge_accumulates() {
        let mut changes = DiscountChanges::default();
        let mut other = DiscountChanges::default();
        other.deleted.push(Uuid::now_v7());

        assert!(changes.is_empty());
        changes.merge(other);
        assert_eq!(changes.deleted.len(), 1);
    }
}
