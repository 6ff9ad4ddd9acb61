//! Catalogue Promotions

use rusty_money::{Money, iso::Currency};
use tracing::{debug, instrument};

use crate::{
    discounts::{
        DiscountChanges, DiscountError, DiscountType, LineDiscount, discount_amount,
        remove_line_discounts, update_unit_discount_fields,
    },
    money::line_total,
    order::OrderLine,
    promotions::PromotionRule,
};

/// Re-derive the PROMOTION discount of every line from the catalogue rules.
///
/// At most one catalogue reward applies per line: the rule giving the largest
/// unit discount wins, ties going to the lowest rule id. Gift lines and lines
/// with a manual discount carry no catalogue discount.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
#[instrument(skip_all, fields(lines = lines.len(), rules = rules.len()))]
pub fn refresh_order_line_discount_objects_for_catalogue_promotions<'a>(
    lines: &mut [OrderLine<'a>],
    rules: &[PromotionRule],
) -> Result<DiscountChanges, DiscountError> {
    let mut changes = DiscountChanges::default();

    for line in lines.iter_mut() {
        let best = if line.is_gift || line.has_manual_discount() {
            None
        } else {
            best_rule(line, rules)?
        };

        let Some((rule, unit_discount)) = best else {
            remove_line_discounts(line, &mut changes, is_promotion_discount);
            update_unit_discount_fields(line)?;
            continue;
        };

        let amount = line_total(unit_discount, line.quantity)?;

        remove_line_discounts(line, &mut changes, |discount| {
            is_promotion_discount(discount) && discount.promotion_rule_id != Some(rule.id)
        });

        if let Some(existing) = line.discounts.iter_mut().find(|discount| is_promotion_discount(discount)) {
            if existing.amount != amount
                || existing.value != rule.reward_value
                || existing.value_type != rule.reward_value_type
            {
                existing.amount = amount;
                existing.value = rule.reward_value;
                existing.value_type = rule.reward_value_type;
                changes.updated.push(existing.id);
            }
        } else {
            let mut discount = LineDiscount::new(
                DiscountType::Promotion,
                rule.reward_value_type,
                rule.reward_value,
                amount,
            )
            .with_reason(rule.reason());
            discount.promotion_rule_id = Some(rule.id);

            debug!(line = %line.id, rule = %rule.id, "catalogue discount created");
            changes.created.push(discount.id);
            line.discounts.push(discount);
        }

        update_unit_discount_fields(line)?;
    }

    Ok(changes)
}

fn best_rule<'r, 'a>(
    line: &OrderLine<'a>,
    rules: &'r [PromotionRule],
) -> Result<Option<(&'r PromotionRule, Money<'a, Currency>)>, DiscountError> {
    let mut best: Option<(&PromotionRule, Money<'a, Currency>)> = None;

    for rule in rules.iter().filter(|rule| rule.matches_variant(&line.variant)) {
        let unit = discount_amount(
            rule.reward_value,
            rule.reward_value_type,
            line.undiscounted_base_unit_price,
        )?;

        if unit.amount().is_zero() {
            continue;
        }

        let better = best.is_none_or(|(current, current_unit)| {
            unit.amount() > current_unit.amount()
                || (unit.amount() == current_unit.amount() && rule.id < current.id)
        });

        if better {
            best = Some((rule, unit));
        }
    }

    Ok(best)
}

fn is_promotion_discount(discount: &LineDiscount<'_>) -> bool {
    discount.discount_type == DiscountType::Promotion
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rusty_money::iso::USD;
    use testresult::TestResult;
    use uuid::Uuid;

    use crate::{
        discounts::DiscountValueType,
        order::ProductVariantRef,
        promotions::predicate::CataloguePredicate,
    };

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
    fn applies_matching_rule_to_full_quantity() -> TestResult {
        let mut lines = [line(1000, 3)];
        let variant_id = lines.first().map(|line| line.variant.variant_id);
        let rule = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::from(2),
            CataloguePredicate::variants(variant_id),
        );

        let changes =
            refresh_order_line_discount_objects_for_catalogue_promotions(&mut lines, &[rule.clone()])?;
        let [line] = &lines;

        assert_eq!(changes.created.len(), 1);
        assert_eq!(line.base_unit_price, Money::from_minor(800, USD));
        assert_eq!(line.unit_discount_reason, Some(rule.reason()));
        assert_eq!(
            line.discounts.first().map(|discount| discount.amount),
            Some(Money::from_minor(600, USD))
        );

        Ok(())
    }

    #[test]
    fn best_rule_wins() -> TestResult {
        let mut lines = [line(1000, 1)];
        let fixed = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::ONE,
            CataloguePredicate::match_all(),
        );
        let percentage = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Percentage,
            Decimal::from(25),
            CataloguePredicate::match_all(),
        );

        refresh_order_line_discount_objects_for_catalogue_promotions(
            &mut lines,
            &[fixed, percentage.clone()],
        )?;
        let [line] = &lines;

        assert_eq!(line.discounts.len(), 1);
        assert_eq!(
            line.discounts.first().and_then(|discount| discount.promotion_rule_id),
            Some(percentage.id)
        );
        assert_eq!(line.base_unit_price, Money::from_minor(750, USD));

        Ok(())
    }

    #[test]
    fn refresh_is_idempotent_and_removes_stale_rules() -> TestResult {
        let mut lines = [line(1000, 2)];
        let rule = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::ONE,
            CataloguePredicate::match_all(),
        );

        refresh_order_line_discount_objects_for_catalogue_promotions(&mut lines, &[rule.clone()])?;
        let again =
            refresh_order_line_discount_objects_for_catalogue_promotions(&mut lines, &[rule])?;
        assert!(again.is_empty());

        let removed = refresh_order_line_discount_objects_for_catalogue_promotions(&mut lines, &[])?;
        let [line] = &lines;

        assert_eq!(removed.deleted.len(), 1);
        assert!(line.discounts.is_empty());
        assert_eq!(line.base_unit_price, Money::from_minor(1000, USD));

        Ok(())
    }

    #[test]
    fn gift_lines_get_no_catalogue_discount() -> TestResult {
        let mut gift = line(1000, 1);
        gift.is_gift = true;
        let mut lines = [gift];
        let rule = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::ONE,
            CataloguePredicate::match_all(),
        );

        let changes =
            refresh_order_line_discount_objects_for_catalogue_promotions(&mut lines, &[rule])?;

        assert!(changes.created.is_empty());

        Ok(())
    }
}
