//! Promotions
//!
//! Promotion rules and the resolvers that turn them into catalogue line
//! discounts, order discounts and gift lines.

use rust_decimal::Decimal;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{
    discounts::{DiscountValueType, promotion_reason},
    order::ProductVariantRef,
    promotions::predicate::{CataloguePredicate, OrderPredicate},
};

pub mod catalogue;
pub mod order;
pub mod predicate;

/// What a promotion rule rewards.
#[derive(Debug, Clone, PartialEq)]
pub enum RewardType {
    /// Discount on the unit price of matching variants.
    CatalogueDiscount {
        /// Variants the rule applies to
        predicate: CataloguePredicate,
    },

    /// Discount on the order subtotal.
    SubtotalDiscount {
        /// Order eligibility
        predicate: OrderPredicate,
    },

    /// A free gift line.
    Gift {
        /// Order eligibility
        predicate: OrderPredicate,

        /// Variants the customer may receive
        gifts: SmallVec<[Uuid; 4]>,
    },
}

/// A single rule of a promotion.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionRule {
    /// Rule id
    pub id: Uuid,

    /// Owning promotion, used in discount reasons
    pub promotion_id: Uuid,

    /// Fixed or percentage
    pub reward_value_type: DiscountValueType,

    /// Reward value; unused by gift rules
    pub reward_value: Decimal,

    /// Reward and eligibility
    pub reward: RewardType,
}

impl PromotionRule {
    /// Catalogue rule for the variants matching `predicate`.
    pub fn catalogue(
        promotion_id: Uuid,
        value_type: DiscountValueType,
        value: Decimal,
        predicate: CataloguePredicate,
    ) -> Self {
        Self::new(promotion_id, value_type, value, RewardType::CatalogueDiscount { predicate })
    }

    /// Subtotal rule for orders matching `predicate`.
    pub fn subtotal(
        promotion_id: Uuid,
        value_type: DiscountValueType,
        value: Decimal,
        predicate: OrderPredicate,
    ) -> Self {
        Self::new(promotion_id, value_type, value, RewardType::SubtotalDiscount { predicate })
    }

    /// Gift rule for orders matching `predicate`.
    pub fn gift(
        promotion_id: Uuid,
        predicate: OrderPredicate,
        gifts: impl IntoIterator<Item = Uuid>,
    ) -> Self {
        Self::new(
            promotion_id,
            DiscountValueType::Fixed,
            Decimal::ZERO,
            RewardType::Gift {
                predicate,
                gifts: gifts.into_iter().collect(),
            },
        )
    }

    fn new(
        promotion_id: Uuid,
        reward_value_type: DiscountValueType,
        reward_value: Decimal,
        reward: RewardType,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            promotion_id,
            reward_value_type,
            reward_value,
            reward,
        }
    }

    /// Reason recorded on discounts created from this rule.
    pub fn reason(&self) -> String {
        promotion_reason(self.promotion_id)
    }

    /// Whether this is a catalogue rule matching `variant`.
    pub fn matches_variant(&self, variant: &ProductVariantRef) -> bool {
        match &self.reward {
            RewardType::CatalogueDiscount { predicate } => predicate.matches(variant),
            RewardType::SubtotalDiscount { .. } | RewardType::Gift { .. } => false,
        }
    }

    /// Order predicate of subtotal and gift rules.
    pub fn order_predicate(&self) -> Option<&OrderPredicate> {
        match &self.reward {
            RewardType::CatalogueDiscount { .. } => None,
            RewardType::SubtotalDiscount { predicate } | RewardType::Gift { predicate, .. } => {
                Some(predicate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_rules_match_variants_only() {
        let variant = ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7());
        let catalogue = PromotionRule::catalogue(
            Uuid::now_v7(),
            DiscountValueType::Fixed,
            Decimal::ONE,
            CataloguePredicate::variants([variant.variant_id]),
        );
        let subtotal = PromotionRule::subtotal(
            Uuid::now_v7(),
            DiscountValueType::Percentage,
            Decimal::TEN,
            OrderPredicate::default(),
        );

        assert!(catalogue.matches_variant(&variant));
        assert!(catalogue.order_predicate().is_none());
        assert!(!subtotal.matches_variant(&variant));
        assert!(subtotal.order_predicate().is_some());
    }

    #[test]
    fn reason_names_the_promotion() {
        let promotion_id = Uuid::now_v7();
        let rule = PromotionRule::gift(promotion_id, OrderPredicate::default(), []);

        assert_eq!(rule.reason(), format!("Promotion: {promotion_id}"));
    }
}
