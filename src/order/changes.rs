//! Order Changes
//!
//! The unit of work a recalculation pass hands to the store.

use uuid::Uuid;

use crate::{
    discounts::DiscountChanges,
    order::{Order, OrderLine},
};

/// Order column written by a recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    /// `undiscounted_base_shipping_price`
    UndiscountedBaseShippingPrice,

    /// `base_shipping_price`
    BaseShippingPrice,

    /// `shipping_price`
    ShippingPrice,

    /// `undiscounted_shipping_price`
    UndiscountedShippingPrice,

    /// `shipping_tax_rate`
    ShippingTaxRate,

    /// `subtotal`
    Subtotal,

    /// `total`
    Total,

    /// `undiscounted_total`
    UndiscountedTotal,

    /// `should_refresh_prices`
    ShouldRefreshPrices,

    /// `tax_error`
    TaxError,
}

impl OrderField {
    /// Every order field a recalculation writes.
    pub const PRICES: &'static [OrderField] = &[
        OrderField::UndiscountedBaseShippingPrice,
        OrderField::BaseShippingPrice,
        OrderField::ShippingPrice,
        OrderField::UndiscountedShippingPrice,
        OrderField::ShippingTaxRate,
        OrderField::Subtotal,
        OrderField::Total,
        OrderField::UndiscountedTotal,
        OrderField::ShouldRefreshPrices,
        OrderField::TaxError,
    ];

    /// Copy this field from `from` onto `to`.
    pub fn copy<'a>(self, from: &Order<'a>, to: &mut Order<'a>) {
        match self {
            OrderField::UndiscountedBaseShippingPrice => {
                to.undiscounted_base_shipping_price = from.undiscounted_base_shipping_price;
            }
            OrderField::BaseShippingPrice => to.base_shipping_price = from.base_shipping_price,
            OrderField::ShippingPrice => to.shipping_price = from.shipping_price,
            OrderField::UndiscountedShippingPrice => {
                to.undiscounted_shipping_price = from.undiscounted_shipping_price;
            }
            OrderField::ShippingTaxRate => to.shipping_tax_rate = from.shipping_tax_rate,
            OrderField::Subtotal => to.subtotal = from.subtotal,
            OrderField::Total => to.total = from.total,
            OrderField::UndiscountedTotal => to.undiscounted_total = from.undiscounted_total,
            OrderField::ShouldRefreshPrices => to.should_refresh_prices = from.should_refresh_prices,
            OrderField::TaxError => to.tax_error.clone_from(&from.tax_error),
        }
    }
}

/// Line column written by a recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineField {
    /// `undiscounted_base_unit_price`
    UndiscountedBaseUnitPrice,

    /// `base_unit_price`
    BaseUnitPrice,

    /// `unit_price`
    UnitPrice,

    /// `total_price`
    TotalPrice,

    /// `undiscounted_unit_price`
    UndiscountedUnitPrice,

    /// `undiscounted_total_price`
    UndiscountedTotalPrice,

    /// `tax_rate`
    TaxRate,

    /// `unit_discount_amount`
    UnitDiscountAmount,

    /// `unit_discount_value`
    UnitDiscountValue,

    /// `unit_discount_type`
    UnitDiscountType,

    /// `unit_discount_reason`
    UnitDiscountReason,

    /// `draft_base_price_expire_at`
    DraftBasePriceExpireAt,
}

impl LineField {
    /// Every line field a recalculation writes.
    pub const PRICES: &'static [LineField] = &[
        LineField::UndiscountedBaseUnitPrice,
        LineField::BaseUnitPrice,
        LineField::UnitPrice,
        LineField::TotalPrice,
        LineField::UndiscountedUnitPrice,
        LineField::UndiscountedTotalPrice,
        LineField::TaxRate,
        LineField::UnitDiscountAmount,
        LineField::UnitDiscountValue,
        LineField::UnitDiscountType,
        LineField::UnitDiscountReason,
        LineField::DraftBasePriceExpireAt,
    ];

    /// Copy this field from `from` onto `to`.
    pub fn copy<'a>(self, from: &OrderLine<'a>, to: &mut OrderLine<'a>) {
        match self {
            LineField::UndiscountedBaseUnitPrice => {
                to.undiscounted_base_unit_price = from.undiscounted_base_unit_price;
            }
            LineField::BaseUnitPrice => to.base_unit_price = from.base_unit_price,
            LineField::UnitPrice => to.unit_price = from.unit_price,
            LineField::TotalPrice => to.total_price = from.total_price,
            LineField::UndiscountedUnitPrice => to.undiscounted_unit_price = from.undiscounted_unit_price,
            LineField::UndiscountedTotalPrice => {
                to.undiscounted_total_price = from.undiscounted_total_price;
            }
            LineField::TaxRate => to.tax_rate = from.tax_rate,
            LineField::UnitDiscountAmount => to.unit_discount_amount = from.unit_discount_amount,
            LineField::UnitDiscountValue => to.unit_discount_value = from.unit_discount_value,
            LineField::UnitDiscountType => to.unit_discount_type = from.unit_discount_type,
            LineField::UnitDiscountReason => to.unit_discount_reason.clone_from(&from.unit_discount_reason),
            LineField::DraftBasePriceExpireAt => {
                to.draft_base_price_expire_at = from.draft_base_price_expire_at;
            }
        }
    }
}

/// Mutations collected during a recalculation pass, applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderChanges {
    /// Discount rows and gift lines created, updated or deleted
    pub discounts: DiscountChanges,

    /// Lines whose base price was refreshed from the catalogue
    pub refreshed_lines: Vec<Uuid>,
}

impl OrderChanges {
    /// Fold a resolver pass into the unit of work.
    pub fn record(&mut self, changes: DiscountChanges) {
        self.discounts.merge(changes);
    }

    /// Order fields to persist.
    pub fn order_fields(&self) -> &'static [OrderField] {
        OrderField::PRICES
    }

    /// Line fields to persist.
    pub fn line_fields(&self) -> &'static [LineField] {
        LineField::PRICES
    }

    /// Whether the discount row was created or updated in this pass.
    pub fn writes_discount(&self, id: Uuid) -> bool {
        self.discounts.created.contains(&id) || self.discounts.updated.contains(&id)
    }

    /// Whether the discount row was deleted in this pass.
    pub fn deletes_discount(&self, id: Uuid) -> bool {
        self.discounts.deleted.contains(&id)
    }

    /// Whether the line was deleted in this pass.
    pub fn deletes_line(&self, id: Uuid) -> bool {
        self.discounts.deleted_lines.contains(&id)
    }

    /// Whether the line was created in this pass.
    pub fn creates_line(&self, id: Uuid) -> bool {
        self.discounts.created_lines.contains(&id)
    }
}
