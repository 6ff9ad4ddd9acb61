//! Base Prices
//!
//! Net prices before tax: line totals, shipping, order-level discounts and
//! their proration onto lines.

use rust_decimal::Decimal;
use rusty_money::{Money, MoneyError, iso::Currency};
use tracing::debug;

use crate::{
    discounts::{
        DiscountChanges, DiscountError, DiscountTarget, OrderDiscount, discount_amount,
        manual::split_manual_discount,
    },
    money::{
        Quantize, TaxedMoney, line_total, min_price, money, non_negative, percent, unit_price,
        zero,
    },
    order::{Order, OrderLine},
};

/// Base totals of a single line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseLineTotal<'a> {
    /// `base_unit_price * quantity`
    pub total: Money<'a, Currency>,

    /// `undiscounted_base_unit_price * quantity`
    pub undiscounted_total: Money<'a, Currency>,
}

/// Order base prices after order-level discounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBasePrices<'a> {
    /// Sum of line base totals before order-level discounts
    pub subtotal_before_discounts: Money<'a, Currency>,

    /// Subtotal after order-level discounts
    pub subtotal: Money<'a, Currency>,

    /// Shipping after every discount
    pub shipping: Money<'a, Currency>,

    /// `subtotal + shipping`
    pub total: Money<'a, Currency>,

    /// Portion of order-level discounts taken from the subtotal
    pub subtotal_discount: Money<'a, Currency>,
}

/// Shipping listing price before discounts, zero without a shipping method.
pub fn base_order_undiscounted_shipping<'a>(order: &Order<'a>) -> Money<'a, Currency> {
    order
        .shipping_method
        .as_ref()
        .map_or_else(|| zero(order.currency), |method| method.price)
}

/// Shipping price after shipping vouchers, zero without a shipping method.
pub fn base_order_shipping<'a>(order: &Order<'a>) -> Money<'a, Currency> {
    if order.shipping_method.is_some() {
        non_negative(order.base_shipping_price)
    } else {
        zero(order.currency)
    }
}

/// Base totals of a line.
///
/// # Errors
///
/// Returns [`MoneyError::Overflow`] if a total overflows.
pub fn base_order_line_total<'a>(line: &OrderLine<'a>) -> Result<BaseLineTotal<'a>, MoneyError> {
    Ok(BaseLineTotal {
        total: line_total(line.base_unit_price, line.quantity)?,
        undiscounted_total: line_total(line.undiscounted_base_unit_price, line.quantity)?,
    })
}

/// Sum of line base totals.
///
/// # Errors
///
/// Returns a [`MoneyError`] if a line uses another currency or a total overflows.
pub fn base_order_subtotal<'a>(
    order: &Order<'a>,
    lines: &[OrderLine<'a>],
) -> Result<Money<'a, Currency>, MoneyError> {
    lines.iter().try_fold(zero(order.currency), |subtotal, line| {
        subtotal.add(base_order_line_total(line)?.total)
    })
}

/// Subtotal plus shipping, before order-level discounts.
///
/// # Errors
///
/// Returns a [`MoneyError`] if a line uses another currency.
pub fn base_order_total_without_order_discount<'a>(
    order: &Order<'a>,
    lines: &[OrderLine<'a>],
) -> Result<Money<'a, Currency>, MoneyError> {
    base_order_subtotal(order, lines)?.add(base_order_shipping(order))
}

/// Order total after every order-level discount, never negative.
///
/// Does not modify the order; discount amounts are recomputed on a copy.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn base_order_total<'a>(
    order: &Order<'a>,
    lines: &[OrderLine<'a>],
) -> Result<Money<'a, Currency>, DiscountError> {
    let mut order = order.clone();
    let prices = apply_order_discounts(&mut order, lines, &mut DiscountChanges::default())?;

    Ok(non_negative(prices.total))
}

/// Apply order-level discounts in precedence order and refresh their amounts.
///
/// Shipping discounts are already reflected in the base shipping price.
/// Subtotal discounts (entire-order vouchers, order promotions) reduce the
/// subtotal next. Manual discounts are split across what remains of the
/// subtotal and shipping.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn apply_order_discounts<'a>(
    order: &mut Order<'a>,
    lines: &[OrderLine<'a>],
    changes: &mut DiscountChanges,
) -> Result<OrderBasePrices<'a>, DiscountError> {
    let subtotal_before_discounts = base_order_subtotal(order, lines)?;
    let mut subtotal = subtotal_before_discounts;
    let mut shipping = base_order_shipping(order);

    order.discounts.sort_by_key(OrderDiscount::precedence);

    for discount in &mut order.discounts {
        let amount = match discount.target {
            DiscountTarget::Shipping => continue,
            DiscountTarget::Subtotal => {
                let amount = discount_amount(discount.value, discount.value_type, subtotal)?;
                subtotal = subtotal.sub(amount)?;
                amount
            }
            DiscountTarget::Total => {
                let (subtotal_portion, shipping_portion) =
                    split_manual_discount(discount, subtotal, shipping)?;
                subtotal = non_negative(subtotal.sub(subtotal_portion)?);
                shipping = non_negative(shipping.sub(shipping_portion)?);
                subtotal_portion.add(shipping_portion)?
            }
        };

        if discount.amount != amount {
            debug!(discount = %discount.id, amount = %amount, "order discount amount changed");
            discount.amount = amount;
            changes.updated.push(discount.id);
        }
    }

    let subtotal = non_negative(subtotal);

    Ok(OrderBasePrices {
        subtotal_before_discounts,
        subtotal,
        shipping,
        total: subtotal.add(shipping)?,
        subtotal_discount: non_negative(subtotal_before_discounts.sub(subtotal)?),
    })
}

/// Prorate `discount` across lines in proportion to their share of `subtotal`.
///
/// Returns the portion for each line, parallel to `lines`. Lines with a zero
/// total get nothing. The last line with a positive total absorbs the rounding
/// remainder; whatever exceeds its total spills back onto earlier lines, so
/// the portions always sum to `discount` (capped at `subtotal`) and no portion
/// exceeds its line's total.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn apply_subtotal_discount_to_order_lines<'a>(
    lines: &[OrderLine<'a>],
    subtotal: Money<'a, Currency>,
    discount: Money<'a, Currency>,
) -> Result<Vec<Money<'a, Currency>>, DiscountError> {
    let currency = subtotal.currency();
    let totals = lines
        .iter()
        .map(|line| Ok(base_order_line_total(line)?.total))
        .collect::<Result<Vec<_>, MoneyError>>()?;

    let mut portions = vec![zero(currency); lines.len()];

    if subtotal.amount().is_zero() || discount.amount().is_zero() {
        return Ok(portions);
    }

    let Some(last) = totals.iter().rposition(is_positive) else {
        return Ok(portions);
    };

    let mut remaining = min_price(non_negative(discount), subtotal)?;

    for (index, (portion, total)) in portions.iter_mut().zip(&totals).enumerate() {
        if !is_positive(total) {
            continue;
        }

        let share = if index == last {
            remaining
        } else {
            let amount = total
                .amount()
                .checked_mul(*discount.amount())
                .and_then(|product| product.checked_div(*subtotal.amount()))
                .ok_or(DiscountError::Overflow)?;

            min_price(money(amount, currency).quantize(), remaining)?
        };

        *portion = min_price(share, *total)?;
        remaining = remaining.sub(*portion)?;

        if index == last {
            break;
        }
    }

    // Rounded-down shares can leave more than the last line holds; hand the
    // excess back to earlier lines that still have room.
    for (portion, total) in portions.iter_mut().zip(&totals).rev() {
        if !is_positive(&remaining) {
            break;
        }

        let capacity = total.sub(*portion)?;
        if !is_positive(&capacity) {
            continue;
        }

        let extra = min_price(remaining, capacity)?;
        *portion = portion.add(extra)?;
        remaining = remaining.sub(extra)?;
    }

    Ok(portions)
}

fn is_positive(price: &Money<'_, Currency>) -> bool {
    price.amount().is_sign_positive() && !price.amount().is_zero()
}

/// Write base prices onto the order and its lines, untaxed.
///
/// `portions` are the prorated subtotal discounts, parallel to `lines`. Line
/// unit prices are back-computed from the discounted totals; a line with a
/// zero quantity keeps its unit price.
///
/// # Errors
///
/// Returns a [`MoneyError`] on currency mismatch.
pub fn assign_order_prices<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    prices: &OrderBasePrices<'a>,
    portions: &[Money<'a, Currency>],
) -> Result<(), MoneyError> {
    for (line, portion) in lines.iter_mut().zip(portions) {
        let base = base_order_line_total(line)?;
        let total = non_negative(base.total.sub(*portion)?);

        line.total_price = TaxedMoney::untaxed(total);
        if let Some(unit) = unit_price(total, line.quantity) {
            line.unit_price = TaxedMoney::untaxed(unit);
        }
        line.undiscounted_unit_price = TaxedMoney::untaxed(line.undiscounted_base_unit_price);
        line.undiscounted_total_price = TaxedMoney::untaxed(base.undiscounted_total);
        line.tax_rate = percent(Decimal::ZERO);
    }

    order.undiscounted_base_shipping_price = base_order_undiscounted_shipping(order);
    order.shipping_price = TaxedMoney::untaxed(prices.shipping);
    order.undiscounted_shipping_price = TaxedMoney::untaxed(order.undiscounted_base_shipping_price);
    order.shipping_tax_rate = percent(Decimal::ZERO);

    assign_order_totals(order, lines)
}

/// Recompute subtotal, total and undiscounted total from the line and
/// shipping prices.
///
/// # Errors
///
/// Returns a [`MoneyError`] on currency mismatch.
pub fn assign_order_totals<'a>(
    order: &mut Order<'a>,
    lines: &[OrderLine<'a>],
) -> Result<(), MoneyError> {
    let zero_taxed = TaxedMoney::zero(order.currency);

    let subtotal = lines
        .iter()
        .try_fold(zero_taxed, |acc, line| acc.add(line.total_price))?;
    let undiscounted_subtotal = lines
        .iter()
        .try_fold(zero_taxed, |acc, line| acc.add(line.undiscounted_total_price))?;

    order.subtotal = subtotal;
    order.total = subtotal.add(order.shipping_price)?;
    order.undiscounted_total = undiscounted_subtotal.add(order.undiscounted_shipping_price)?;

    Ok(())
}

/// Run the base price engine: refresh order discount amounts, prorate the
/// subtotal discount onto lines and write untaxed prices.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn calculate_base_prices<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    changes: &mut DiscountChanges,
) -> Result<OrderBasePrices<'a>, DiscountError> {
    let prices = apply_order_discounts(order, lines, changes)?;
    let portions = apply_subtotal_discount_to_order_lines(
        lines,
        prices.subtotal_before_discounts,
        prices.subtotal_discount,
    )?;

    assign_order_prices(order, lines, &prices, &portions)?;

    Ok(prices)
}
