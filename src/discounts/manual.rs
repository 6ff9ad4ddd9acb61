//! Manual Discounts
//!
//! Staff-entered discounts: order-level discounts split across subtotal and
//! shipping, and line-level discounts that replace automatic ones.

use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use tracing::debug;

use crate::{
    discounts::{
        DiscountChanges, DiscountError, DiscountType, DiscountValueType, OrderDiscount,
        apply_discount_to_value, discount_amount, remove_line_discounts,
        update_unit_discount_fields,
    },
    money::{Quantize, line_total, min_price, money, non_negative, zero},
    order::OrderLine,
};

/// Split a manual order discount into `(subtotal_portion, shipping_portion)`.
///
/// Percentage discounts apply independently to both buckets. Fixed discounts
/// are prorated by each bucket's share of `subtotal + shipping`; the shipping
/// portion takes the remainder so the portions always sum to the (clamped)
/// fixed amount.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn split_manual_discount<'a>(
    discount: &OrderDiscount<'a>,
    subtotal: Money<'a, Currency>,
    shipping: Money<'a, Currency>,
) -> Result<(Money<'a, Currency>, Money<'a, Currency>), DiscountError> {
    let currency = subtotal.currency();

    match discount.value_type {
        DiscountValueType::Percentage => {
            let subtotal_portion =
                bucket_discount(discount.value, discount.value_type, currency, subtotal)?;
            let shipping_portion =
                bucket_discount(discount.value, discount.value_type, currency, shipping)?;

            Ok((subtotal_portion.quantize(), shipping_portion.quantize()))
        }
        DiscountValueType::Fixed => {
            let total = subtotal.add(shipping)?;

            if !total.amount().is_sign_positive() || total.amount().is_zero() {
                return Ok((zero(currency), zero(currency)));
            }

            let requested = money(discount.value, currency).quantize();
            let total_discount = min_price(non_negative(requested), total)?;

            let share = subtotal
                .amount()
                .checked_mul(*total_discount.amount())
                .and_then(|product| product.checked_div(*total.amount()))
                .ok_or(DiscountError::Overflow)?;

            let subtotal_portion = min_price(money(share, currency).quantize(), subtotal)?;
            let shipping_portion = total_discount.sub(subtotal_portion)?;

            Ok((subtotal_portion, shipping_portion.quantize()))
        }
    }
}

fn bucket_discount<'a>(
    value: Decimal,
    value_type: DiscountValueType,
    currency: &'a Currency,
    bucket: Money<'a, Currency>,
) -> Result<Money<'a, Currency>, DiscountError> {
    let discounted = non_negative(apply_discount_to_value(value, value_type, currency, bucket)?);

    Ok(bucket.sub(discounted)?)
}

/// Re-derive amounts of manual line discounts and enforce their exclusivity.
///
/// A line carrying a manual discount keeps only that discount: catalogue and
/// voucher discounts are removed from it. The amount is recomputed from the
/// undiscounted base unit price for the line's full quantity.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
pub fn refresh_manual_line_discounts(
    lines: &mut [OrderLine<'_>],
) -> Result<DiscountChanges, DiscountError> {
    let mut changes = DiscountChanges::default();

    for line in lines.iter_mut().filter(|line| line.has_manual_discount()) {
        remove_line_discounts(line, &mut changes, |discount| {
            discount.discount_type != DiscountType::Manual
        });

        let undiscounted = line.undiscounted_base_unit_price;
        let quantity = line.quantity;

        for discount in &mut line.discounts {
            let unit = discount_amount(discount.value, discount.value_type, undiscounted)?;
            let amount = line_total(unit, quantity)?;

            if discount.amount != amount {
                debug!(line = %line.id, discount = %discount.id, "manual line discount amount changed");
                discount.amount = amount;
                changes.updated.push(discount.id);
            }
        }

        update_unit_discount_fields(line)?;
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::USD;
    use testresult::TestResult;
    use uuid::Uuid;

    use crate::{discounts::LineDiscount, order::ProductVariantRef};

    use super::*;

    #[test]
    fn fixed_manual_discount_is_prorated_by_share() -> TestResult {
        let discount = OrderDiscount::manual(DiscountValueType::Fixed, Decimal::from(8), USD);

        let (subtotal_portion, shipping_portion) = split_manual_discount(
            &discount,
            Money::from_minor(4000, USD),
            Money::from_minor(1000, USD),
        )?;

        assert_eq!(subtotal_portion, Money::from_minor(640, USD));
        assert_eq!(shipping_portion, Money::from_minor(160, USD));

        Ok(())
    }

    #[test]
    fn fixed_manual_discount_portions_sum_exactly() -> TestResult {
        let discount = OrderDiscount::manual(DiscountValueType::Fixed, Decimal::from(10), USD);

        let (subtotal_portion, shipping_portion) = split_manual_discount(
            &discount,
            Money::from_minor(2000, USD),
            Money::from_minor(1000, USD),
        )?;

        // 10 * 20 / 30 = 6.666..
        assert_eq!(subtotal_portion, Money::from_minor(667, USD));
        assert_eq!(subtotal_portion.add(shipping_portion)?, Money::from_minor(1000, USD));

        Ok(())
    }

    #[test]
    fn fixed_manual_discount_on_zero_total_is_zero() -> TestResult {
        let discount = OrderDiscount::manual(DiscountValueType::Fixed, Decimal::from(8), USD);

        let (subtotal_portion, shipping_portion) =
            split_manual_discount(&discount, zero(USD), zero(USD))?;

        assert_eq!(subtotal_portion, zero(USD));
        assert_eq!(shipping_portion, zero(USD));

        Ok(())
    }

    #[test]
    fn fixed_manual_discount_is_clamped_to_total() -> TestResult {
        let discount = OrderDiscount::manual(DiscountValueType::Fixed, Decimal::from(100), USD);

        let (subtotal_portion, shipping_portion) = split_manual_discount(
            &discount,
            Money::from_minor(4000, USD),
            Money::from_minor(1000, USD),
        )?;

        assert_eq!(subtotal_portion, Money::from_minor(4000, USD));
        assert_eq!(shipping_portion, Money::from_minor(1000, USD));

        Ok(())
    }

    #[test]
    fn percentage_manual_discount_applies_to_each_bucket() -> TestResult {
        let discount =
            OrderDiscount::manual(DiscountValueType::Percentage, Decimal::from(10), USD);

        let (subtotal_portion, shipping_portion) = split_manual_discount(
            &discount,
            Money::from_minor(4000, USD),
            Money::from_minor(1050, USD),
        )?;

        assert_eq!(subtotal_portion, Money::from_minor(400, USD));
        assert_eq!(shipping_portion, Money::from_minor(105, USD));

        Ok(())
    }

    #[test]
    fn manual_line_discount_replaces_automatic_discounts() -> TestResult {
        let mut line = OrderLine::new(
            ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7()),
            "Mug",
            2,
            Money::from_minor(1000, USD),
        );
        let voucher = LineDiscount::new(
            DiscountType::Voucher,
            DiscountValueType::Fixed,
            Decimal::ONE,
            Money::from_minor(200, USD),
        );
        let voucher_id = voucher.id;
        line.discounts.push(voucher);
        line.discounts.push(LineDiscount::new(
            DiscountType::Manual,
            DiscountValueType::Percentage,
            Decimal::from(50),
            zero(USD),
        ));

        let mut lines = [line];
        let changes = refresh_manual_line_discounts(&mut lines)?;
        let [line] = lines;

        assert_eq!(changes.deleted.as_slice(), &[voucher_id]);
        assert_eq!(line.discounts.len(), 1);
        assert_eq!(line.base_unit_price, Money::from_minor(500, USD));
        assert!(
            line.discounts
                .iter()
                .all(|discount| discount.amount == Money::from_minor(1000, USD)),
            "manual discount should cover both units"
        );

        Ok(())
    }
}
