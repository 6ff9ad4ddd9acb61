//! Fixtures
//!
//! YAML order fixtures used by the `reprice` binary and the integration tests.

use std::{fs, path::Path};

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use rusty_money::{Findable, Money, iso::Currency};
use serde::Deserialize;
use smallvec::SmallVec;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    catalogue::{Catalogue, StaticCatalogue, VariantListing},
    discounts::{
        DiscountType, DiscountValueType, LineDiscount, OrderDiscount,
        vouchers::{Voucher, VoucherChannelListing, VoucherType},
    },
    money::{percent, zero},
    order::{Channel, Order, OrderLine, OrderStatus, ProductVariantRef, ShippingMethod},
    promotions::predicate::CataloguePredicate,
    tax::{FlatRates, TaxCalculationStrategy, TaxConfiguration},
};

pub mod promotions;

use promotions::PromotionFixture;

/// Fixture Parsing Errors
#[derive(Debug, Error)]
pub enum FixtureError {
    /// IO error reading fixture files
    #[error("Failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Invalid price format
    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    /// Invalid decimal format
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Unknown currency code
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    /// Currency mismatch between the order and a price
    #[error("Currency mismatch: expected {0}, found {1}")]
    CurrencyMismatch(String, String),

    /// Product not found
    #[error("Product not found: {0}")]
    ProductNotFound(String),
}

/// Order status in fixtures.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFixture {
    /// Draft order
    #[default]
    Draft,

    /// Unconfirmed order
    Unconfirmed,

    /// Unfulfilled order
    Unfulfilled,
}

/// Channel tax settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TaxFixture {
    /// Whether tax is charged
    pub charge_taxes: bool,

    /// Whether prices include tax
    pub prices_entered_with_tax: bool,

    /// Use a tax app with this identifier instead of flat rates
    pub app_id: Option<String>,

    /// Default flat rate in percent (e.g., "23")
    pub default_rate: String,

    /// Shipping flat rate in percent
    pub shipping_rate: Option<String>,

    /// Flat rates per tax class
    pub class_rates: FxHashMap<String, String>,
}

impl Default for TaxFixture {
    fn default() -> Self {
        Self {
            charge_taxes: true,
            prices_entered_with_tax: false,
            app_id: None,
            default_rate: "0".to_string(),
            shipping_rate: None,
            class_rates: FxHashMap::default(),
        }
    }
}

/// Catalogue product
#[derive(Debug, Deserialize)]
pub struct ProductFixture {
    /// Product name
    pub name: String,

    /// Channel price (e.g., "10.00 USD")
    pub price: String,

    /// Category name
    #[serde(default)]
    pub category: Option<String>,

    /// Collection names
    #[serde(default)]
    pub collections: Vec<String>,

    /// Tax class for flat rates
    #[serde(default)]
    pub tax_class: Option<String>,
}

/// Order line
#[derive(Debug, Deserialize)]
pub struct LineFixture {
    /// Product key
    pub product: String,

    /// Quantity
    pub quantity: u32,

    /// Manual line discount
    #[serde(default)]
    pub manual_discount: Option<DiscountFixture>,
}

/// Shipping method
#[derive(Debug, Deserialize)]
pub struct ShippingFixture {
    /// Method name
    pub name: String,

    /// Channel price (e.g., "10.00 USD")
    pub price: String,

    /// Tax class for flat rates
    #[serde(default)]
    pub tax_class: Option<String>,
}

/// Discount value and type
#[derive(Debug, Deserialize)]
pub struct DiscountFixture {
    /// Fixed or percentage
    pub value_type: ValueTypeFixture,

    /// Value (e.g., "8" or "12.5")
    pub value: String,
}

/// Discount value type
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTypeFixture {
    /// Fixed amount
    Fixed,

    /// Percentage
    Percentage,
}

impl From<ValueTypeFixture> for DiscountValueType {
    fn from(value: ValueTypeFixture) -> Self {
        match value {
            ValueTypeFixture::Fixed => DiscountValueType::Fixed,
            ValueTypeFixture::Percentage => DiscountValueType::Percentage,
        }
    }
}

/// Voucher type
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoucherTypeFixture {
    /// Entire order voucher
    EntireOrder,

    /// Specific product voucher
    SpecificProduct,

    /// Shipping voucher
    Shipping,
}

/// Voucher applied to the order
#[derive(Debug, Deserialize)]
pub struct VoucherFixture {
    /// Voucher code
    pub code: String,

    /// Voucher type
    #[serde(rename = "type")]
    pub voucher_type: VoucherTypeFixture,

    /// Discount value and type
    #[serde(flatten)]
    pub discount: DiscountFixture,

    /// Discount one unit of the cheapest line only
    #[serde(default)]
    pub apply_once_per_order: bool,

    /// Minimum subtotal (e.g., "50.00 USD")
    #[serde(default)]
    pub min_spent: Option<String>,

    /// Minimum item quantity
    #[serde(default)]
    pub min_quantity: Option<u32>,

    /// Eligible product keys for specific product vouchers
    #[serde(default)]
    pub products: Vec<String>,
}

/// A complete order scenario
#[derive(Debug, Deserialize)]
pub struct OrderFixture {
    /// Currency code
    pub currency: String,

    /// Channel slug
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Order status
    #[serde(default)]
    pub status: StatusFixture,

    /// Tax settings
    #[serde(default)]
    pub tax: TaxFixture,

    /// Catalogue products by key
    pub products: FxHashMap<String, ProductFixture>,

    /// Order lines
    pub lines: Vec<LineFixture>,

    /// Shipping method
    #[serde(default)]
    pub shipping: Option<ShippingFixture>,

    /// Voucher
    #[serde(default)]
    pub voucher: Option<VoucherFixture>,

    /// Manual order discount
    #[serde(default)]
    pub manual_discount: Option<DiscountFixture>,

    /// Promotion rules active in the channel
    #[serde(default)]
    pub promotions: Vec<PromotionFixture>,
}

fn default_channel() -> String {
    "default".to_string()
}

/// An order scenario built from a fixture.
#[derive(Debug)]
pub struct LoadedOrder {
    /// The order
    pub order: Order<'static>,

    /// Its lines
    pub lines: Vec<OrderLine<'static>>,

    /// Catalogue with product listings and promotion rules
    pub catalogue: StaticCatalogue<'static>,
}

/// Catalogue ids assigned to fixture products.
#[derive(Debug, Default)]
pub struct ProductIds {
    variants: FxHashMap<String, ProductVariantRef>,
    categories: FxHashMap<String, Uuid>,
    collections: FxHashMap<String, Uuid>,
}

impl ProductIds {
    /// Variant reference of a product key.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::ProductNotFound`] for unknown keys.
    pub fn variant(&self, key: &str) -> Result<&ProductVariantRef, FixtureError> {
        self.variants
            .get(key)
            .ok_or_else(|| FixtureError::ProductNotFound(key.to_string()))
    }

    /// Predicate matching the given product keys.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::ProductNotFound`] for unknown keys.
    pub fn products_predicate(&self, keys: &[String]) -> Result<CataloguePredicate, FixtureError> {
        let ids = keys
            .iter()
            .map(|key| self.variant(key).map(|variant| variant.product_id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CataloguePredicate::products(ids))
    }

    /// Category id for a name, if any product uses it.
    pub fn category(&self, name: &str) -> Option<Uuid> {
        self.categories.get(name).copied()
    }

    /// Collection id for a name, if any product uses it.
    pub fn collection(&self, name: &str) -> Option<Uuid> {
        self.collections.get(name).copied()
    }
}

impl OrderFixture {
    /// Parse a fixture from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Yaml`] if the YAML is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, FixtureError> {
        Ok(serde_norway::from_str(yaml)?)
    }

    /// Load a fixture file.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    /// Build the order, its lines and the catalogue.
    ///
    /// # Errors
    ///
    /// Returns a [`FixtureError`] for invalid prices, decimals, currencies or
    /// unknown product keys.
    pub fn build(self) -> Result<LoadedOrder, FixtureError> {
        let currency = find_currency(&self.currency)?;
        let mut ids = ProductIds::default();
        let mut catalogue = StaticCatalogue::new();
        let mut tax_classes = FxHashMap::default();

        let mut keys: Vec<&String> = self.products.keys().collect();
        keys.sort();

        for key in keys {
            let Some(product) = self.products.get(key) else {
                continue;
            };

            let mut variant = ProductVariantRef::new(Uuid::now_v7(), Uuid::now_v7());
            variant.category_id = product
                .category
                .as_ref()
                .map(|name| *ids.categories.entry(name.clone()).or_insert_with(Uuid::now_v7));
            variant.collection_ids = product
                .collections
                .iter()
                .map(|name| *ids.collections.entry(name.clone()).or_insert_with(Uuid::now_v7))
                .collect::<SmallVec<_>>();

            catalogue.insert_listing(
                self.channel.clone(),
                VariantListing {
                    variant: variant.clone(),
                    name: product.name.clone(),
                    price: parse_money(&product.price, currency)?,
                },
            );
            tax_classes.insert(key.clone(), product.tax_class.clone());
            ids.variants.insert(key.clone(), variant);
        }

        let mut order = Order::new(
            self.status.into(),
            Channel::new(self.channel.clone(), self.tax.try_into()?),
            currency,
        );

        if let Some(shipping) = &self.shipping {
            order.set_shipping_method(Some(ShippingMethod {
                id: Uuid::now_v7(),
                name: shipping.name.clone(),
                price: parse_money(&shipping.price, currency)?,
                tax_class: shipping.tax_class.clone(),
            }));
        }

        if let Some(fixture) = &self.voucher {
            let voucher = build_voucher(fixture, &self.channel, currency, &ids)?;
            order.set_voucher(Some(voucher), Some(fixture.code.clone()));
        }

        if let Some(fixture) = &self.manual_discount {
            order.set_manual_discount(Some(OrderDiscount::manual(
                fixture.value_type.into(),
                parse_decimal(&fixture.value)?,
                currency,
            )));
        }

        let mut lines = Vec::with_capacity(self.lines.len());

        for fixture in &self.lines {
            let variant = ids.variant(&fixture.product)?;
            let listing = catalogue
                .variant_listing(&self.channel, variant.variant_id)
                .ok_or_else(|| FixtureError::ProductNotFound(fixture.product.clone()))?;

            let mut line = OrderLine::new(
                variant.clone(),
                listing.name,
                fixture.quantity,
                listing.price,
            );
            line.tax_class = tax_classes.get(&fixture.product).cloned().flatten();

            if let Some(discount) = &fixture.manual_discount {
                line.discounts.push(LineDiscount::new(
                    DiscountType::Manual,
                    discount.value_type.into(),
                    parse_decimal(&discount.value)?,
                    zero(currency),
                ));
            }

            lines.push(line);
        }

        for fixture in self.promotions {
            catalogue.insert_rule(self.channel.clone(), fixture.try_into_rule(&ids)?);
        }

        Ok(LoadedOrder {
            order,
            lines,
            catalogue,
        })
    }
}

impl From<StatusFixture> for OrderStatus {
    fn from(status: StatusFixture) -> Self {
        match status {
            StatusFixture::Draft => OrderStatus::Draft,
            StatusFixture::Unconfirmed => OrderStatus::Unconfirmed,
            StatusFixture::Unfulfilled => OrderStatus::Unfulfilled,
        }
    }
}

impl TryFrom<TaxFixture> for TaxConfiguration {
    type Error = FixtureError;

    fn try_from(fixture: TaxFixture) -> Result<Self, Self::Error> {
        let tax_class_rates = fixture
            .class_rates
            .iter()
            .map(|(class, rate)| Ok((class.clone(), parse_rate(rate)?)))
            .collect::<Result<FxHashMap<_, _>, FixtureError>>()?;

        Ok(TaxConfiguration {
            charge_taxes: fixture.charge_taxes,
            prices_entered_with_tax: fixture.prices_entered_with_tax,
            strategy: if fixture.app_id.is_some() {
                TaxCalculationStrategy::TaxApp
            } else {
                TaxCalculationStrategy::FlatRates
            },
            tax_app_id: fixture.app_id,
            flat_rates: FlatRates {
                default_rate: parse_rate(&fixture.default_rate)?,
                shipping_rate: fixture.shipping_rate.as_deref().map(parse_rate).transpose()?,
                tax_class_rates,
            },
        })
    }
}

fn build_voucher(
    fixture: &VoucherFixture,
    channel: &str,
    currency: &'static Currency,
    ids: &ProductIds,
) -> Result<Voucher<'static>, FixtureError> {
    let voucher_type = match fixture.voucher_type {
        VoucherTypeFixture::EntireOrder => VoucherType::EntireOrder,
        VoucherTypeFixture::SpecificProduct => VoucherType::SpecificProduct,
        VoucherTypeFixture::Shipping => VoucherType::Shipping,
    };

    let mut voucher = Voucher::new(voucher_type, fixture.discount.value_type.into());
    voucher.name = Some(fixture.code.clone());
    voucher.apply_once_per_order = fixture.apply_once_per_order;
    voucher.min_checkout_items_quantity = fixture.min_quantity;
    if !fixture.products.is_empty() {
        voucher.catalogue = ids.products_predicate(&fixture.products)?;
    }
    voucher.channel_listings.insert(
        channel.to_string(),
        VoucherChannelListing {
            discount_value: parse_decimal(&fixture.discount.value)?,
            min_spent: fixture
                .min_spent
                .as_deref()
                .map(|price| parse_money(price, currency))
                .transpose()?,
        },
    );

    Ok(voucher)
}

/// Resolve an ISO currency code.
///
/// # Errors
///
/// Returns [`FixtureError::UnknownCurrency`] if the code is not an ISO currency.
pub fn find_currency(code: &str) -> Result<&'static Currency, FixtureError> {
    Currency::find(code).ok_or_else(|| FixtureError::UnknownCurrency(code.to_string()))
}

/// Parse a decimal string (e.g., "12.5").
///
/// # Errors
///
/// Returns [`FixtureError::InvalidDecimal`] if the string is not a decimal.
pub fn parse_decimal(s: &str) -> Result<Decimal, FixtureError> {
    s.trim()
        .parse::<Decimal>()
        .map_err(|_err| FixtureError::InvalidDecimal(s.to_string()))
}

/// Parse a rate in percent points (e.g., "23") into a [`Percentage`]
///
/// # Errors
///
/// Returns an error if the string is not a decimal.
pub fn parse_rate(s: &str) -> Result<Percentage, FixtureError> {
    parse_decimal(s).map(percent)
}

/// Parse price string (e.g., "2.99 GBP") into an amount and currency
///
/// # Errors
///
/// Returns an error if the string is not in the format "AMOUNT CURRENCY",
/// if the amount is not a decimal, or if the currency code is not recognized.
pub fn parse_price(s: &str) -> Result<(Decimal, &'static Currency), FixtureError> {
    let mut parts = s.split_whitespace();

    let (Some(amount), Some(code), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(FixtureError::InvalidPrice(format!(
            "Expected format 'AMOUNT CURRENCY', got: {s}"
        )));
    };

    let amount = amount
        .parse::<Decimal>()
        .map_err(|_err| FixtureError::InvalidPrice(s.to_string()))?;

    Ok((amount, find_currency(code)?))
}

fn parse_money(s: &str, currency: &'static Currency) -> Result<Money<'static, Currency>, FixtureError> {
    let (amount, parsed) = parse_price(s)?;

    if parsed != currency {
        return Err(FixtureError::CurrencyMismatch(
            currency.iso_alpha_code.to_string(),
            parsed.iso_alpha_code.to_string(),
        ));
    }

    Ok(Money::from_decimal(amount, currency))
}
