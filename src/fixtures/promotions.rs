//! Promotion Fixtures

use serde::Deserialize;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{
    fixtures::{DiscountFixture, FixtureError, ProductIds, parse_decimal},
    promotions::{
        PromotionRule,
        predicate::{BoolOp, CataloguePredicate, OrderPredicate, PredicateRule},
    },
};

/// Promotion rule fixture from YAML
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromotionFixture {
    /// Catalogue discount on matching products
    Catalogue {
        /// Discount value and type
        #[serde(flatten)]
        discount: DiscountFixture,

        /// Product keys
        #[serde(default)]
        products: Vec<String>,

        /// Category names
        #[serde(default)]
        categories: Vec<String>,

        /// Collection names
        #[serde(default)]
        collections: Vec<String>,
    },

    /// Discount on the order subtotal
    Subtotal {
        /// Discount value and type
        #[serde(flatten)]
        discount: DiscountFixture,

        /// Minimum subtotal amount (e.g., "40")
        #[serde(default)]
        subtotal_gte: Option<String>,
    },

    /// Free gift line
    Gift {
        /// Product keys the customer may receive
        gifts: Vec<String>,

        /// Minimum subtotal amount (e.g., "100")
        #[serde(default)]
        subtotal_gte: Option<String>,
    },
}

impl PromotionFixture {
    /// Convert to a [`PromotionRule`] of a fresh promotion.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is not a decimal or a product key is unknown.
    pub fn try_into_rule(self, ids: &ProductIds) -> Result<PromotionRule, FixtureError> {
        let promotion_id = Uuid::now_v7();

        match self {
            PromotionFixture::Catalogue {
                discount,
                products,
                categories,
                collections,
            } => Ok(PromotionRule::catalogue(
                promotion_id,
                discount.value_type.into(),
                parse_decimal(&discount.value)?,
                catalogue_predicate(ids, &products, &categories, &collections)?,
            )),
            PromotionFixture::Subtotal {
                discount,
                subtotal_gte,
            } => Ok(PromotionRule::subtotal(
                promotion_id,
                discount.value_type.into(),
                parse_decimal(&discount.value)?,
                order_predicate(subtotal_gte.as_deref())?,
            )),
            PromotionFixture::Gift {
                gifts,
                subtotal_gte,
            } => {
                let variants = gifts
                    .iter()
                    .map(|key| ids.variant(key).map(|variant| variant.variant_id))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(PromotionRule::gift(
                    promotion_id,
                    order_predicate(subtotal_gte.as_deref())?,
                    variants,
                ))
            }
        }
    }
}

/// Products, categories and collections are alternatives: a line matching
/// any of them is eligible.
fn catalogue_predicate(
    ids: &ProductIds,
    products: &[String],
    categories: &[String],
    collections: &[String],
) -> Result<CataloguePredicate, FixtureError> {
    let mut rules: SmallVec<[PredicateRule; 2]> = SmallVec::new();

    if !products.is_empty() {
        rules.extend(ids.products_predicate(products)?.rules);
    }

    if !categories.is_empty() {
        rules.push(PredicateRule::Categories {
            ids: categories.iter().filter_map(|name| ids.category(name)).collect(),
        });
    }

    if !collections.is_empty() {
        rules.push(PredicateRule::Collections {
            ids: collections.iter().filter_map(|name| ids.collection(name)).collect(),
        });
    }

    Ok(CataloguePredicate::new(BoolOp::Or, rules))
}

fn order_predicate(subtotal_gte: Option<&str>) -> Result<OrderPredicate, FixtureError> {
    Ok(match subtotal_gte {
        Some(amount) => OrderPredicate::subtotal_at_least(parse_decimal(amount)?),
        None => OrderPredicate::default(),
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use testresult::TestResult;

    use crate::{
        catalogue::Catalogue,
        discounts::DiscountValueType,
        fixtures::OrderFixture,
        promotions::RewardType,
    };

    use super::*;

    #[test]
    fn catalogue_rule_matches_category_or_product() -> TestResult {
        let loaded = OrderFixture::from_yaml_str(
            r#"
currency: USD
products:
  shirt:
    name: Shirt
    price: "10.00 USD"
    category: apparel
  mug:
    name: Mug
    price: "4.00 USD"
  pen:
    name: Pen
    price: "1.00 USD"
lines:
  - product: shirt
    quantity: 1
  - product: mug
    quantity: 1
  - product: pen
    quantity: 1
promotions:
  - type: catalogue
    value_type: percentage
    value: "10"
    products: [mug]
    categories: [apparel]
"#,
        )?
        .build()?;

        let rule = loaded
            .catalogue
            .promotion_rules("default")
            .first()
            .ok_or("missing rule")?
            .clone();

        let [shirt, mug, pen] = loaded.lines.as_slice() else {
            return Err("expected three lines".into());
        };

        assert_eq!(rule.reward_value_type, DiscountValueType::Percentage);
        assert_eq!(rule.reward_value, Decimal::from(10));
        assert!(rule.matches_variant(&shirt.variant));
        assert!(rule.matches_variant(&mug.variant));
        assert!(!rule.matches_variant(&pen.variant));

        Ok(())
    }

    #[test]
    fn gift_rule_resolves_product_keys() -> TestResult {
        let loaded = OrderFixture::from_yaml_str(
            r#"
currency: USD
products:
  tote:
    name: Tote
    price: "5.00 USD"
lines: []
promotions:
  - type: gift
    gifts: [tote]
    subtotal_gte: "100"
"#,
        )?
        .build()?;

        let rule = loaded
            .catalogue
            .promotion_rules("default")
            .first()
            .ok_or("missing rule")?;

        let RewardType::Gift { predicate, gifts } = &rule.reward else {
            return Err("expected a gift rule".into());
        };

        assert_eq!(predicate.subtotal_gte, Some(Decimal::from(100)));
        assert_eq!(gifts.len(), 1);

        Ok(())
    }

    #[test]
    fn unknown_gift_product_is_rejected() -> TestResult {
        let fixture = OrderFixture::from_yaml_str(
            r#"
currency: USD
products: {}
lines: []
promotions:
  - type: gift
    gifts: [ghost]
"#,
        )?;

        assert!(matches!(fixture.build(), Err(FixtureError::ProductNotFound(_))));

        Ok(())
    }
}
