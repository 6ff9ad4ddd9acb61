//! Catalogue
//!
//! Read access to channel listings and promotion rules.

use rustc_hash::FxHashMap;
use rusty_money::{Money, iso::Currency};
use uuid::Uuid;

use crate::{order::ProductVariantRef, promotions::PromotionRule};

/// A variant's price in a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantListing<'a> {
    /// Listed variant
    pub variant: ProductVariantRef,

    /// Product name
    pub name: String,

    /// Current channel price
    pub price: Money<'a, Currency>,
}

/// Channel listings and promotion rules.
pub trait Catalogue<'a> {
    /// Current listing of a variant in a channel.
    fn variant_listing(&self, channel: &str, variant_id: Uuid) -> Option<VariantListing<'a>>;

    /// Promotion rules active in a channel.
    fn promotion_rules(&self, channel: &str) -> &[PromotionRule];
}

/// In-memory catalogue.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalogue<'a> {
    listings: FxHashMap<(String, Uuid), VariantListing<'a>>,
    rules: FxHashMap<String, Vec<PromotionRule>>,
}

impl<'a> StaticCatalogue<'a> {
    /// Empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variant listing.
    pub fn insert_listing(&mut self, channel: impl Into<String>, listing: VariantListing<'a>) {
        self.listings
            .insert((channel.into(), listing.variant.variant_id), listing);
    }

    /// Add a promotion rule.
    pub fn insert_rule(&mut self, channel: impl Into<String>, rule: PromotionRule) {
        self.rules.entry(channel.into()).or_default().push(rule);
    }

    /// Update a listed price, returning `false` if the variant is not listed.
    pub fn set_price(&mut self, channel: &str, variant_id: Uuid, price: Money<'a, Currency>) -> bool {
        match self.listings.get_mut(&(channel.to_string(), variant_id)) {
            Some(listing) => {
                listing.price = price;
                true
            }
            None => false,
        }
    }
}

impl<'a> Catalogue<'a> for StaticCatalogue<'a> {
    fn variant_listing(&self, channel: &str, variant_id: Uuid) -> Option<VariantListing<'a>> {
        self.listings
            .get(&(channel.to_string(), variant_id))
            .cloned()
    }

    fn promotion_rules(&self, channel: &str) -> &[PromotionRule] {
        self.rules.get(channel).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::USD;

    use super::*;

    #[test]
    fn listings_are_scoped_per_channel() {
        let variant = ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7());
        let variant_id = variant.variant_id;
        let mut catalogue = StaticCatalogue::new();
        catalogue.insert_listing(
            "default",
            VariantListing {
                variant,
                name: "Mug".to_string(),
                price: Money::from_minor(1200, USD),
            },
        );

        assert!(catalogue.variant_listing("default", variant_id).is_some());
        assert!(catalogue.variant_listing("other", variant_id).is_none());
        assert!(catalogue.set_price("default", variant_id, Money::from_minor(900, USD)));
        assert_eq!(
            catalogue
                .variant_listing("default", variant_id)
                .map(|listing| listing.price),
            Some(Money::from_minor(900, USD))
        );
        assert!(catalogue.promotion_rules("default").is_empty());
    }
}
