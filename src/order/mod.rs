//! Orders
//!
//! The order aggregate, its lines and the recalculation engine operating on
//! them.

use decimal_percentage::Percentage;
use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{
    discounts::{
        DiscountTarget, DiscountType, DiscountValueType, LineDiscount, OrderDiscount,
        vouchers::Voucher,
    },
    money::{TaxedMoney, line_total, percent, zero},
    tax::TaxConfiguration,
};

pub mod base_calculations;
pub mod calculations;
pub mod changes;
pub mod errors;
pub mod taxes;

pub use calculations::{FetchOptions, OrderCalculator};
pub use changes::OrderChanges;
pub use errors::PricingError;

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Being prepared by staff.
    Draft,

    /// Placed but awaiting confirmation.
    Unconfirmed,

    /// Confirmed, nothing fulfilled yet.
    Unfulfilled,

    /// Some lines fulfilled.
    PartiallyFulfilled,

    /// Every line fulfilled.
    Fulfilled,

    /// Cancelled.
    Canceled,

    /// Expired before payment.
    Expired,
}

impl OrderStatus {
    /// Only draft and unconfirmed orders have their prices recalculated.
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::Unconfirmed)
    }
}

/// Sales channel the order was placed in.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Channel slug, used to resolve voucher and variant listings.
    pub slug: String,

    /// Tax settings of the channel.
    pub tax_configuration: TaxConfiguration,
}

impl Channel {
    /// Create a channel.
    pub fn new(slug: impl Into<String>, tax_configuration: TaxConfiguration) -> Self {
        Self {
            slug: slug.into(),
            tax_configuration,
        }
    }
}

/// Shipping method chosen for the order, with its channel listing price.
#[derive(Debug, Clone, PartialEq)]
pub struct ShippingMethod<'a> {
    /// Shipping method id
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Channel listing price
    pub price: Money<'a, Currency>,

    /// Tax class used by flat rates
    pub tax_class: Option<String>,
}

/// Catalogue identity of a line's variant, used by promotion and voucher
/// predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductVariantRef {
    /// Variant id
    pub variant_id: Uuid,

    /// Product id
    pub product_id: Uuid,

    /// Product category
    pub category_id: Option<Uuid>,

    /// Collections containing the product
    pub collection_ids: SmallVec<[Uuid; 2]>,
}

impl ProductVariantRef {
    /// Create a reference with no category or collections.
    pub fn new(variant_id: Uuid, product_id: Uuid) -> Self {
        Self {
            variant_id,
            product_id,
            category_id: None,
            collection_ids: SmallVec::new(),
        }
    }
}

/// A purchased line item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine<'a> {
    /// Line id
    pub id: Uuid,

    /// Purchased variant
    pub variant: ProductVariantRef,

    /// Product name at the time of purchase
    pub product_name: String,

    /// Quantity ordered
    pub quantity: u32,

    /// Tax class used by flat rates
    pub tax_class: Option<String>,

    /// Catalogue price before any discount
    pub undiscounted_base_unit_price: Money<'a, Currency>,

    /// Unit price after line-level discounts, never negative
    pub base_unit_price: Money<'a, Currency>,

    /// Unit price before discounts, after tax
    pub undiscounted_unit_price: TaxedMoney<'a>,

    /// Line total before discounts, after tax
    pub undiscounted_total_price: TaxedMoney<'a>,

    /// Unit price after every discount and tax
    pub unit_price: TaxedMoney<'a>,

    /// Line total after every discount and tax
    pub total_price: TaxedMoney<'a>,

    /// Tax rate of the line
    pub tax_rate: Percentage,

    /// Per-unit sum of line discounts
    pub unit_discount_amount: Money<'a, Currency>,

    /// Value of the line discount, or the unit amount when several stack
    pub unit_discount_value: Decimal,

    /// Value type of the line discount
    pub unit_discount_type: Option<DiscountValueType>,

    /// Reasons of the line discounts
    pub unit_discount_reason: Option<String>,

    /// Synthetic line added by a gift promotion
    pub is_gift: bool,

    /// When the draft line's base price must be refreshed from the catalogue
    pub draft_base_price_expire_at: Option<Timestamp>,

    /// Discounts attached to this line
    pub discounts: Vec<LineDiscount<'a>>,
}

impl<'a> OrderLine<'a> {
    /// Create an undiscounted, untaxed line.
    pub fn new(
        variant: ProductVariantRef,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money<'a, Currency>,
    ) -> Self {
        let currency = unit_price.currency();
        let unit = TaxedMoney::untaxed(unit_price);
        // An overflowing total is reported by the first recalculation.
        let total = TaxedMoney::untaxed(
            line_total(unit_price, quantity).unwrap_or_else(|_| zero(currency)),
        );

        Self {
            id: Uuid::now_v7(),
            variant,
            product_name: product_name.into(),
            quantity,
            tax_class: None,
            undiscounted_base_unit_price: unit_price,
            base_unit_price: unit_price,
            undiscounted_unit_price: unit,
            undiscounted_total_price: total,
            unit_price: unit,
            total_price: total,
            tax_rate: percent(Decimal::ZERO),
            unit_discount_amount: zero(currency),
            unit_discount_value: Decimal::ZERO,
            unit_discount_type: None,
            unit_discount_reason: None,
            is_gift: false,
            draft_base_price_expire_at: None,
            discounts: Vec::new(),
        }
    }

    /// Currency of the line's prices.
    pub fn currency(&self) -> &'a Currency {
        self.undiscounted_base_unit_price.currency()
    }

    /// Whether staff entered a discount for this line.
    pub fn has_manual_discount(&self) -> bool {
        self.discounts
            .iter()
            .any(|discount| discount.discount_type == DiscountType::Manual)
    }

    /// Discounts of the given type.
    pub fn discounts_of(
        &self,
        discount_type: DiscountType,
    ) -> impl Iterator<Item = &LineDiscount<'a>> {
        self.discounts
            .iter()
            .filter(move |discount| discount.discount_type == discount_type)
    }
}

/// The order aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct Order<'a> {
    /// Order id
    pub id: Uuid,

    /// Lifecycle status
    pub status: OrderStatus,

    /// Currency of every price on the order
    pub currency: &'a Currency,

    /// Channel and its tax configuration
    pub channel: Channel,

    /// Customer is exempt from tax
    pub tax_exemption: bool,

    /// Applied voucher
    pub voucher: Option<Voucher<'a>>,

    /// Code used to apply the voucher
    pub voucher_code: Option<String>,

    /// Chosen shipping method
    pub shipping_method: Option<ShippingMethod<'a>>,

    /// Shipping listing price before discounts
    pub undiscounted_base_shipping_price: Money<'a, Currency>,

    /// Shipping price after shipping vouchers, before tax
    pub base_shipping_price: Money<'a, Currency>,

    /// Shipping price after every discount and tax
    pub shipping_price: TaxedMoney<'a>,

    /// Shipping price before discounts, after tax
    pub undiscounted_shipping_price: TaxedMoney<'a>,

    /// Shipping tax rate
    pub shipping_tax_rate: Percentage,

    /// Sum of line totals
    pub subtotal: TaxedMoney<'a>,

    /// Subtotal plus shipping
    pub total: TaxedMoney<'a>,

    /// Total before any discount
    pub undiscounted_total: TaxedMoney<'a>,

    /// Order-level discounts
    pub discounts: Vec<OrderDiscount<'a>>,

    /// Set when an input affecting prices changed; cleared by a successful
    /// recalculation.
    pub should_refresh_prices: bool,

    /// Last tax calculation failure, kept until a clean tax pass
    pub tax_error: Option<String>,
}

impl<'a> Order<'a> {
    /// Create an empty order with zero prices that needs a price refresh.
    pub fn new(status: OrderStatus, channel: Channel, currency: &'a Currency) -> Self {
        let zero_money = zero(currency);
        let zero_taxed = TaxedMoney::zero(currency);

        Self {
            id: Uuid::now_v7(),
            status,
            currency,
            channel,
            tax_exemption: false,
            voucher: None,
            voucher_code: None,
            shipping_method: None,
            undiscounted_base_shipping_price: zero_money,
            base_shipping_price: zero_money,
            shipping_price: zero_taxed,
            undiscounted_shipping_price: zero_taxed,
            shipping_tax_rate: percent(Decimal::ZERO),
            subtotal: zero_taxed,
            total: zero_taxed,
            undiscounted_total: zero_taxed,
            discounts: Vec::new(),
            should_refresh_prices: true,
            tax_error: None,
        }
    }

    /// Apply a voucher by code.
    pub fn set_voucher(&mut self, voucher: Option<Voucher<'a>>, code: Option<String>) {
        self.voucher = voucher;
        self.voucher_code = code;
        self.should_refresh_prices = true;
    }

    /// Choose a shipping method.
    pub fn set_shipping_method(&mut self, method: Option<ShippingMethod<'a>>) {
        self.shipping_method = method;
        self.should_refresh_prices = true;
    }

    /// Replace the staff-entered order discount.
    pub fn set_manual_discount(&mut self, discount: Option<OrderDiscount<'a>>) {
        self.discounts
            .retain(|existing| existing.discount_type != DiscountType::Manual);
        self.discounts.extend(discount);
        self.should_refresh_prices = true;
    }

    /// The staff-entered order discount, if any.
    pub fn manual_discount(&self) -> Option<&OrderDiscount<'a>> {
        self.discounts
            .iter()
            .find(|discount| discount.discount_type == DiscountType::Manual)
    }

    /// Whether an entire-order voucher discount reduces the subtotal.
    pub fn has_subtotal_voucher_discount(&self) -> bool {
        self.discounts.iter().any(|discount| {
            discount.discount_type == DiscountType::Voucher
                && discount.target == DiscountTarget::Subtotal
        })
    }
}
