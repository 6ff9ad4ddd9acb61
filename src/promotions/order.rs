//! Order Promotions
//!
//! Subtotal discounts and gift lines rewarded for the order as a whole.

use rusty_money::{Money, iso::Currency};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    catalogue::{Catalogue, VariantListing},
    discounts::{
        DiscountChanges, DiscountError, DiscountTarget, DiscountType, DiscountValueType,
        LineDiscount, OrderDiscount, discount_amount, remove_order_discounts,
        update_unit_discount_fields,
    },
    money::{line_total, zero},
    order::{Order, OrderLine},
    promotions::{PromotionRule, RewardType},
};

/// An eligible order reward together with its value to the customer.
#[derive(Debug)]
enum OrderReward<'r, 'a> {
    Subtotal {
        rule: &'r PromotionRule,
        amount: Money<'a, Currency>,
    },
    Gift {
        rule: &'r PromotionRule,
        listing: VariantListing<'a>,
    },
}

impl<'a> OrderReward<'_, 'a> {
    fn rule(&self) -> &PromotionRule {
        match self {
            Self::Subtotal { rule, .. } | Self::Gift { rule, .. } => rule,
        }
    }

    fn value(&self) -> Money<'a, Currency> {
        match self {
            Self::Subtotal { amount, .. } => *amount,
            Self::Gift { listing, .. } => listing.price,
        }
    }
}

/// Apply the best order promotion to the order.
///
/// Rules are evaluated against the base subtotal of the non-gift lines. The
/// eligible rule with the highest value wins, ties going to the lowest rule
/// id. Subtotal rewards become an ORDER_PROMOTION order discount prorated
/// later like an entire-order voucher; gift rewards keep exactly one gift line
/// on the order. An entire-order voucher discount suppresses subtotal rewards.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
#[instrument(skip_all, fields(order = %order.id))]
pub fn handle_order_promotion<'a>(
    order: &mut Order<'a>,
    lines: &mut Vec<OrderLine<'a>>,
    rules: &[PromotionRule],
    catalogue: &dyn Catalogue<'a>,
) -> Result<DiscountChanges, DiscountError> {
    let mut changes = DiscountChanges::default();

    let subtotal = lines
        .iter()
        .filter(|line| !line.is_gift)
        .try_fold(zero(order.currency), |subtotal, line| {
            subtotal.add(line_total(line.base_unit_price, line.quantity)?)
        })?;

    let best = best_reward(order, subtotal, rules, catalogue)?;

    match best {
        None => {
            remove_gift_lines(lines, &mut changes, |_| true);
            remove_order_discounts(&mut order.discounts, &mut changes, is_order_promotion);
        }
        Some(OrderReward::Subtotal { rule, amount }) => {
            remove_gift_lines(lines, &mut changes, |_| true);
            remove_order_discounts(&mut order.discounts, &mut changes, |discount| {
                is_order_promotion(discount) && discount.promotion_rule_id != Some(rule.id)
            });

            upsert_subtotal_discount(order, rule, amount, &mut changes);
        }
        Some(OrderReward::Gift { rule, listing }) => {
            remove_order_discounts(&mut order.discounts, &mut changes, is_order_promotion);
            remove_gift_lines(lines, &mut changes, |line| {
                line.variant.variant_id != listing.variant.variant_id
            });

            upsert_gift_line(lines, rule, listing, &mut changes)?;
        }
    }

    Ok(changes)
}

fn best_reward<'r, 'a>(
    order: &Order<'a>,
    subtotal: Money<'a, Currency>,
    rules: &'r [PromotionRule],
    catalogue: &dyn Catalogue<'a>,
) -> Result<Option<OrderReward<'r, 'a>>, DiscountError> {
    let voucher_applied = order.has_subtotal_voucher_discount();
    let mut best: Option<OrderReward<'r, 'a>> = None;

    for rule in rules {
        if !rule
            .order_predicate()
            .is_some_and(|predicate| predicate.matches(&subtotal))
        {
            continue;
        }

        let reward = match &rule.reward {
            RewardType::SubtotalDiscount { .. } if voucher_applied => {
                debug!(rule = %rule.id, "subtotal promotion suppressed by voucher");
                continue;
            }
            RewardType::SubtotalDiscount { .. } => {
                let amount = discount_amount(rule.reward_value, rule.reward_value_type, subtotal)?;

                if amount.amount().is_zero() {
                    continue;
                }

                OrderReward::Subtotal { rule, amount }
            }
            RewardType::Gift { gifts, .. } => {
                let Some(listing) = best_gift(order, gifts, catalogue) else {
                    debug!(rule = %rule.id, "no gift listed in channel");
                    continue;
                };

                OrderReward::Gift { rule, listing }
            }
            RewardType::CatalogueDiscount { .. } => continue,
        };

        let better = best.as_ref().is_none_or(|current| {
            let (value, current_value) = (reward.value(), current.value());

            value.amount() > current_value.amount()
                || (value.amount() == current_value.amount() && rule.id < current.rule().id)
        });

        if better {
            best = Some(reward);
        }
    }

    Ok(best)
}

/// The most valuable listed gift, ties going to the lowest variant id.
fn best_gift<'a>(
    order: &Order<'a>,
    gifts: &[Uuid],
    catalogue: &dyn Catalogue<'a>,
) -> Option<VariantListing<'a>> {
    gifts
        .iter()
        .filter_map(|variant_id| catalogue.variant_listing(&order.channel.slug, *variant_id))
        .filter(|listing| listing.price.currency() == order.currency)
        .min_by(|a, b| {
            b.price
                .amount()
                .cmp(a.price.amount())
                .then(a.variant.variant_id.cmp(&b.variant.variant_id))
        })
}

fn upsert_subtotal_discount<'a>(
    order: &mut Order<'a>,
    rule: &PromotionRule,
    amount: Money<'a, Currency>,
    changes: &mut DiscountChanges,
) {
    if let Some(existing) = order
        .discounts
        .iter_mut()
        .find(|discount| is_order_promotion(discount))
    {
        if existing.amount != amount || existing.value != rule.reward_value {
            existing.amount = amount;
            existing.value = rule.reward_value;
            existing.value_type = rule.reward_value_type;
            changes.updated.push(existing.id);
        }

        return;
    }

    let mut discount = OrderDiscount::new(
        DiscountType::OrderPromotion,
        DiscountTarget::Subtotal,
        rule.reward_value_type,
        rule.reward_value,
        order.currency,
    )
    .with_reason(rule.reason());
    discount.amount = amount;
    discount.promotion_rule_id = Some(rule.id);

    info!(rule = %rule.id, amount = %amount, "order promotion applied");
    changes.created.push(discount.id);
    order.discounts.push(discount);
}

fn upsert_gift_line<'a>(
    lines: &mut Vec<OrderLine<'a>>,
    rule: &PromotionRule,
    listing: VariantListing<'a>,
    changes: &mut DiscountChanges,
) -> Result<(), DiscountError> {
    let price = listing.price;

    if let Some(line) = lines.iter_mut().find(|line| line.is_gift) {
        line.quantity = 1;
        line.undiscounted_base_unit_price = price;

        line.discounts.retain(|discount| {
            let keep = discount.discount_type == DiscountType::OrderPromotion;
            if !keep {
                changes.deleted.push(discount.id);
            }
            keep
        });

        match line.discounts.first_mut() {
            Some(discount) if discount.amount != price || discount.promotion_rule_id != Some(rule.id) => {
                discount.amount = price;
                discount.value = *price.amount();
                discount.promotion_rule_id = Some(rule.id);
                discount.reason = Some(rule.reason());
                changes.updated.push(discount.id);
            }
            Some(_) => {}
            None => {
                let discount = gift_discount(rule, price);
                changes.created.push(discount.id);
                line.discounts.push(discount);
            }
        }

        return update_unit_discount_fields(line);
    }

    let mut line = OrderLine::new(listing.variant, listing.name, 1, price);
    line.is_gift = true;

    let discount = gift_discount(rule, price);
    changes.created.push(discount.id);
    line.discounts.push(discount);
    update_unit_discount_fields(&mut line)?;

    info!(line = %line.id, rule = %rule.id, "gift line added");
    changes.created_lines.push(line.id);
    lines.push(line);

    Ok(())
}

fn gift_discount<'a>(rule: &PromotionRule, price: Money<'a, Currency>) -> LineDiscount<'a> {
    let mut discount = LineDiscount::new(
        DiscountType::OrderPromotion,
        DiscountValueType::Fixed,
        *price.amount(),
        price,
    )
    .with_reason(rule.reason());
    discount.promotion_rule_id = Some(rule.id);

    discount
}

/// Remove gift lines matching `predicate` together with their discounts.
fn remove_gift_lines(
    lines: &mut Vec<OrderLine<'_>>,
    changes: &mut DiscountChanges,
    predicate: impl Fn(&OrderLine<'_>) -> bool,
) {
    lines.retain(|line| {
        if line.is_gift && predicate(line) {
            info!(line = %line.id, "gift line removed");
            changes
                .deleted
                .extend(line.discounts.iter().map(|discount| discount.id));
            changes.deleted_lines.push(line.id);
            false
        } else {
            true
        }
    });
}

fn is_order_promotion(discount: &OrderDiscount<'_>) -> bool {
    discount.discount_type == DiscountType::OrderPromotion
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rusty_money::iso::USD;
    use testresult::TestResult;

    use crate::{
        catalogue::StaticCatalogue,
        discounts::vouchers::{Voucher, VoucherType},
        order::{Channel, OrderStatus, ProductVariantRef},
        promotions::predicate::OrderPredicate,
        tax::TaxConfiguration,
    };

    use super::*;

    fn order() -> Order<'static> {
        Order::new(
            OrderStatus::Draft,
            Channel::new("default", TaxConfiguration::default()),
            USD,
        )
    }

    fn line(price_minor: i64, quantity: u32) -> OrderLine<'static> {
        OrderLine::new(
            ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7()),
            "Item",
            quantity,
            Money::from_minor(price_minor, USD),
        )
    }

    fn gift_catalogue(price_minor: i64) -> (StaticCatalogue<'static>, Uuid) {
        let variant = ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7());
        let variant_id = variant.variant_id;
        let mut catalogue = StaticCatalogue::new();
        catalogue.insert_listing(
            "default",
            VariantListing {
                variant,
                name: "Tote bag".to_string(),
                price: Money::from_minor(price_minor, USD),
            },
        );

        (catalogue, variant_id)
    }

    #[test]
    fn subtotal_promotion_creates_order_discount() -> TestResult {
        let mut order = order();
        let mut lines = vec![line(1000, 5)];
        let rule = PromotionRule::subtotal(
            Uuid::now_v7(),
            DiscountValueType::Percentage,
            Decimal::TEN,
            OrderPredicate::subtotal_at_least(Decimal::from(40)),
        );

        handle_order_promotion(&mut order, &mut lines, &[rule], &StaticCatalogue::new())?;

        let discount = order.discounts.first().ok_or("missing discount")?;
        assert_eq!(discount.discount_type, DiscountType::OrderPromotion);
        assert_eq!(discount.amount, Money::from_minor(500, USD));

        Ok(())
    }

    #[test]
    fn ineligible_order_has_no_promotion() -> TestResult {
        let mut order = order();
        let mut lines = vec![line(1000, 1)];
        let rule = PromotionRule::subtotal(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::from(5),
            OrderPredicate::subtotal_at_least(Decimal::from(40)),
        );

        handle_order_promotion(&mut order, &mut lines, &[rule], &StaticCatalogue::new())?;

        assert!(order.discounts.is_empty());

        Ok(())
    }

    #[test]
    fn gift_line_is_added_and_removed_with_eligibility() -> TestResult {
        let (catalogue, gift_id) = gift_catalogue(1500);
        let mut order = order();
        let mut lines = vec![line(1000, 5)];
        let rule = PromotionRule::gift(
            Uuid::now_v7(),
            OrderPredicate::subtotal_at_least(Decimal::from(40)),
            [gift_id],
        );

        let added = handle_order_promotion(&mut order, &mut lines, &[rule.clone()], &catalogue)?;
        assert_eq!(added.created_lines.len(), 1);

        let gift = lines.iter().find(|line| line.is_gift).ok_or("missing gift")?;
        assert_eq!(gift.quantity, 1);
        assert_eq!(gift.base_unit_price, Money::from_minor(0, USD));
        assert_eq!(
            gift.discounts.first().map(|discount| discount.amount),
            Some(Money::from_minor(1500, USD))
        );

        let again = handle_order_promotion(&mut order, &mut lines, &[rule.clone()], &catalogue)?;
        assert!(again.is_empty());
        assert_eq!(lines.len(), 2);

        if let Some(line) = lines.first_mut() {
            line.quantity = 1;
            update_unit_discount_fields(line)?;
        }

        let removed = handle_order_promotion(&mut order, &mut lines, &[rule], &catalogue)?;

        assert_eq!(removed.deleted_lines.len(), 1);
        assert_eq!(removed.deleted.len(), 1);
        assert!(lines.iter().all(|line| !line.is_gift));

        Ok(())
    }

    #[test]
    fn most_valuable_reward_wins() -> TestResult {
        let (catalogue, gift_id) = gift_catalogue(1500);
        let mut order = order();
        let mut lines = vec![line(1000, 5)];
        let subtotal = PromotionRule::subtotal(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::from(10),
            OrderPredicate::default(),
        );
        let gift = PromotionRule::gift(Uuid::now_v7(), OrderPredicate::default(), [gift_id]);

        handle_order_promotion(&mut order, &mut lines, &[subtotal, gift], &catalogue)?;

        assert!(order.discounts.is_empty());
        assert!(lines.iter().any(|line| line.is_gift));

        Ok(())
    }

    #[test]
    fn entire_order_voucher_suppresses_subtotal_promotion() -> TestResult {
        let mut order = order();
        order.set_voucher(
            Some(
                Voucher::new(VoucherType::EntireOrder, DiscountValueType::Fixed)
                    .with_listing("default", Decimal::ONE),
            ),
            Some("SAVE1".to_string()),
        );
        let mut voucher_discount = OrderDiscount::new(
            DiscountType::Voucher,
            DiscountTarget::Subtotal,
            DiscountValueType::Fixed,
            Decimal::ONE,
            USD,
        );
        voucher_discount.amount = Money::from_minor(100, USD);
        order.discounts.push(voucher_discount);

        let mut lines = vec![line(1000, 5)];
        let rule = PromotionRule::subtotal(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::from(5),
            OrderPredicate::default(),
        );

        handle_order_promotion(&mut order, &mut lines, &[rule], &StaticCatalogue::new())?;

        assert!(
            order
                .discounts
                .iter()
                .all(|discount| discount.discount_type == DiscountType::Voucher)
        );

        Ok(())
    }
}
