//! Promotion Predicates
//!
//! Nested boolean catalogue predicates matched against order line variants,
//! and subtotal predicates matched against the order.

use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use rusty_money::{Money, iso::Currency};
use smallvec::{SmallVec, smallvec};
use uuid::Uuid;

use crate::order::ProductVariantRef;

/// Catalogue predicate expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CataloguePredicate {
    /// How `rules` are combined.
    pub op: BoolOp,

    /// Child rules. Empty means "match every variant".
    pub rules: SmallVec<[PredicateRule; 2]>,
}

/// Boolean operation used to combine predicate rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoolOp {
    /// All child rules must match.
    #[default]
    And,

    /// At least one child rule must match.
    Or,
}

/// Single catalogue predicate rule.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateRule {
    /// Variant id is one of `ids`.
    Variants {
        /// Variant ids
        ids: FxHashSet<Uuid>,
    },

    /// Product id is one of `ids`.
    Products {
        /// Product ids
        ids: FxHashSet<Uuid>,
    },

    /// Category id is one of `ids`.
    Categories {
        /// Category ids
        ids: FxHashSet<Uuid>,
    },

    /// The product belongs to at least one of the collections in `ids`.
    Collections {
        /// Collection ids
        ids: FxHashSet<Uuid>,
    },

    /// Nested predicate group.
    Group(Box<CataloguePredicate>),
}

impl CataloguePredicate {
    /// Create a predicate from operator and rules.
    #[must_use]
    pub fn new(op: BoolOp, rules: SmallVec<[PredicateRule; 2]>) -> Self {
        Self { op, rules }
    }

    /// Match every variant.
    #[must_use]
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Match the given variants only.
    #[must_use]
    pub fn variants(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            op: BoolOp::And,
            rules: smallvec![PredicateRule::Variants {
                ids: ids.into_iter().collect(),
            }],
        }
    }

    /// Match the given products only.
    #[must_use]
    pub fn products(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            op: BoolOp::And,
            rules: smallvec![PredicateRule::Products {
                ids: ids.into_iter().collect(),
            }],
        }
    }

    /// Whether the predicate has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the predicate against a variant.
    #[must_use]
    pub fn matches(&self, variant: &ProductVariantRef) -> bool {
        if self.rules.is_empty() {
            return true;
        }

        match self.op {
            BoolOp::And => self.rules.iter().all(|rule| rule.matches(variant)),
            BoolOp::Or => self.rules.iter().any(|rule| rule.matches(variant)),
        }
    }
}

impl PredicateRule {
    #[must_use]
    fn matches(&self, variant: &ProductVariantRef) -> bool {
        match self {
            Self::Variants { ids } => ids.contains(&variant.variant_id),
            Self::Products { ids } => ids.contains(&variant.product_id),
            Self::Categories { ids } => variant
                .category_id
                .is_some_and(|category| ids.contains(&category)),
            Self::Collections { ids } => variant
                .collection_ids
                .iter()
                .any(|collection| ids.contains(collection)),
            Self::Group(group) => group.matches(variant),
        }
    }
}

/// Order predicate on the base subtotal of non-gift lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderPredicate {
    /// Subtotal must be at least this amount.
    pub subtotal_gte: Option<Decimal>,

    /// Subtotal must be at most this amount.
    pub subtotal_lte: Option<Decimal>,
}

impl OrderPredicate {
    /// Subtotal at least `amount`.
    #[must_use]
    pub fn subtotal_at_least(amount: Decimal) -> Self {
        Self {
            subtotal_gte: Some(amount),
            subtotal_lte: None,
        }
    }

    /// Evaluate against an order's base subtotal.
    #[must_use]
    pub fn matches(&self, subtotal: &Money<'_, Currency>) -> bool {
        let amount = subtotal.amount();

        self.subtotal_gte.is_none_or(|gte| *amount >= gte)
            && self.subtotal_lte.is_none_or(|lte| *amount <= lte)
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::USD;

    use super::*;

    fn variant() -> ProductVariantRef {
        ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7())
    }

    #[test]
    fn empty_predicate_matches_all() {
        assert!(CataloguePredicate::match_all().matches(&variant()));
    }

    #[test]
    fn variant_predicate_matches_listed_variant_only() {
        let listed = variant();
        let predicate = CataloguePredicate::variants([listed.variant_id]);

        assert!(predicate.matches(&listed));
        assert!(!predicate.matches(&variant()));
    }

    #[test]
    fn supports_nested_boolean_groups() {
        let category = Uuid::now_v7();
        let collection = Uuid::now_v7();

        let mut sale_shirt = variant();
        sale_shirt.category_id = Some(category);
        sale_shirt.collection_ids.push(collection);

        let mut shirt = variant();
        shirt.category_id = Some(category);

        let predicate = CataloguePredicate::new(
            BoolOp::And,
            smallvec![
                PredicateRule::Categories {
                    ids: [category].into_iter().collect()
                },
                PredicateRule::Group(Box::new(CataloguePredicate::new(
                    BoolOp::Or,
                    smallvec![
                        PredicateRule::Collections {
                            ids: [collection].into_iter().collect()
                        },
                        PredicateRule::Products {
                            ids: FxHashSet::default()
                        }
                    ]
                )))
            ],
        );

        assert!(predicate.matches(&sale_shirt));
        assert!(!predicate.matches(&shirt));
        assert!(!predicate.matches(&variant()));
    }

    #[test]
    fn order_predicate_checks_subtotal_bounds() {
        let predicate = OrderPredicate {
            subtotal_gte: Some(Decimal::from(50)),
            subtotal_lte: Some(Decimal::from(100)),
        };

        assert!(predicate.matches(&Money::from_minor(5000, USD)));
        assert!(predicate.matches(&Money::from_minor(10_000, USD)));
        assert!(!predicate.matches(&Money::from_minor(4999, USD)));
        assert!(!predicate.matches(&Money::from_minor(10_001, USD)));
    }
}
