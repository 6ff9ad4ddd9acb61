//! Vouchers
//!
//! Voucher definitions and the resolver that materializes voucher discounts
//! on an order and its lines.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use rusty_money::{Money, iso::Currency};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    discounts::{
        DiscountChanges, DiscountError, DiscountTarget, DiscountType, DiscountValueType,
        LineDiscount, OrderDiscount, discount_amount, remove_line_discounts,
        remove_order_discounts, update_unit_discount_fields, voucher_reason,
    },
    money::{line_total, non_negative, sum_prices, unit_price, zero},
    order::{Order, OrderLine, base_calculations::base_order_undiscounted_shipping},
    promotions::predicate::CataloguePredicate,
};

/// What a voucher discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherType {
    /// The order subtotal.
    EntireOrder,

    /// Eligible products only.
    SpecificProduct,

    /// The shipping price.
    Shipping,
}

/// Channel-scoped voucher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VoucherChannelListing<'a> {
    /// Discount value in this channel
    pub discount_value: Decimal,

    /// Minimum subtotal required to use the voucher
    pub min_spent: Option<Money<'a, Currency>>,
}

/// A voucher.
#[derive(Debug, Clone, PartialEq)]
pub struct Voucher<'a> {
    /// Voucher id
    pub id: Uuid,

    /// Display name
    pub name: Option<String>,

    /// What the voucher discounts
    pub voucher_type: VoucherType,

    /// Fixed or percentage
    pub discount_value_type: DiscountValueType,

    /// Discount only one unit of the cheapest eligible line
    pub apply_once_per_order: bool,

    /// Minimum number of items in the order
    pub min_checkout_items_quantity: Option<u32>,

    /// Eligible catalogue for specific-product vouchers
    pub catalogue: CataloguePredicate,

    /// Settings per channel slug
    pub channel_listings: FxHashMap<String, VoucherChannelListing<'a>>,
}

impl<'a> Voucher<'a> {
    /// Create a voucher with no channel listings.
    pub fn new(voucher_type: VoucherType, discount_value_type: DiscountValueType) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: None,
            voucher_type,
            discount_value_type,
            apply_once_per_order: false,
            min_checkout_items_quantity: None,
            catalogue: CataloguePredicate::default(),
            channel_listings: FxHashMap::default(),
        }
    }

    /// Add a channel listing.
    #[must_use]
    pub fn with_listing(mut self, channel: impl Into<String>, value: Decimal) -> Self {
        self.channel_listings.insert(
            channel.into(),
            VoucherChannelListing {
                discount_value: value,
                min_spent: None,
            },
        );
        self
    }

    /// Listing for the given channel.
    pub fn channel_listing(&self, channel: &str) -> Option<&VoucherChannelListing<'a>> {
        self.channel_listings.get(channel)
    }

    /// Whether a line is eligible for this voucher.
    pub fn applies_to_line(&self, line: &OrderLine<'_>) -> bool {
        if line.is_gift || line.has_manual_discount() {
            return false;
        }

        match self.voucher_type {
            VoucherType::SpecificProduct => {
                !self.catalogue.is_empty() && self.catalogue.matches(&line.variant)
            }
            VoucherType::EntireOrder => true,
            VoucherType::Shipping => false,
        }
    }
}

/// The voucher values resolved for the order's channel.
#[derive(Debug)]
struct VoucherApplication<'v, 'a> {
    voucher: &'v Voucher<'a>,
    code: String,
    value: Decimal,
}

/// Create, update or delete voucher discount objects so they reflect the
/// order's current voucher.
///
/// Safe to call repeatedly: discounts from a previous voucher or voucher type
/// are removed before the current ones are upserted.
///
/// # Errors
///
/// Returns a [`DiscountError`] on currency mismatch or arithmetic overflow.
#[instrument(skip_all, fields(order = %order.id))]
pub fn create_or_update_voucher_discount_objects_for_order<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
) -> Result<DiscountChanges, DiscountError> {
    let mut changes = DiscountChanges::default();
    let listing_shipping = base_order_undiscounted_shipping(order);
    order.undiscounted_base_shipping_price = listing_shipping;

    let voucher = order.voucher.clone();
    let application = match &voucher {
        Some(voucher) => resolve_application(order, lines, voucher)?,
        None => None,
    };

    let Some(application) = application else {
        remove_order_discounts(&mut order.discounts, &mut changes, |discount| {
            discount.discount_type == DiscountType::Voucher
        });
        for line in lines.iter_mut() {
            remove_line_discounts(line, &mut changes, is_voucher_discount);
        }
        order.base_shipping_price = listing_shipping;
        refresh_lines(lines)?;

        return Ok(changes);
    };

    let code = application.code.clone();

    match (application.voucher.voucher_type, application.voucher.apply_once_per_order) {
        (VoucherType::Shipping, _) => {
            for line in lines.iter_mut() {
                remove_line_discounts(line, &mut changes, is_voucher_discount);
            }
            remove_order_discounts(&mut order.discounts, &mut changes, |discount| {
                discount.discount_type == DiscountType::Voucher
                    && (discount.target != DiscountTarget::Shipping
                        || discount.voucher_code.as_deref() != Some(code.as_str()))
            });
            refresh_lines(lines)?;

            let amount = if order.shipping_method.is_some() {
                discount_amount(
                    application.value,
                    application.voucher.discount_value_type,
                    listing_shipping,
                )?
            } else {
                zero(order.currency)
            };

            upsert_order_voucher_discount(
                order,
                &application,
                DiscountTarget::Shipping,
                amount,
                &mut changes,
            );
            order.base_shipping_price = non_negative(listing_shipping.sub(amount)?);
        }
        (VoucherType::EntireOrder, false) => {
            for line in lines.iter_mut() {
                remove_line_discounts(line, &mut changes, is_voucher_discount);
            }
            remove_order_discounts(&mut order.discounts, &mut changes, |discount| {
                discount.discount_type == DiscountType::Voucher
                    && (discount.target != DiscountTarget::Subtotal
                        || discount.voucher_code.as_deref() != Some(code.as_str()))
            });
            refresh_lines(lines)?;
            order.base_shipping_price = listing_shipping;

            let subtotal = lines
                .iter()
                .filter(|line| !line.is_gift)
                .try_fold(zero(order.currency), |subtotal, line| {
                    subtotal.add(line_total(line.base_unit_price, line.quantity)?)
                })?;
            let amount = discount_amount(
                application.value,
                application.voucher.discount_value_type,
                subtotal,
            )?;

            upsert_order_voucher_discount(
                order,
                &application,
                DiscountTarget::Subtotal,
                amount,
                &mut changes,
            );
        }
        (VoucherType::EntireOrder | VoucherType::SpecificProduct, apply_once) => {
            remove_order_discounts(&mut order.discounts, &mut changes, |discount| {
                discount.discount_type == DiscountType::Voucher
            });
            order.base_shipping_price = listing_shipping;

            apply_line_voucher(lines, &application, apply_once, &mut changes)?;
        }
    }

    Ok(changes)
}

fn resolve_application<'v, 'a>(
    order: &Order<'a>,
    lines: &[OrderLine<'a>],
    voucher: &'v Voucher<'a>,
) -> Result<Option<VoucherApplication<'v, 'a>>, DiscountError> {
    let Some(code) = order.voucher_code.clone() else {
        debug!("voucher without a code, skipping");
        return Ok(None);
    };

    let Some(listing) = voucher.channel_listing(&order.channel.slug) else {
        debug!(channel = %order.channel.slug, "voucher not listed in channel");
        return Ok(None);
    };

    if let Some(min_quantity) = voucher.min_checkout_items_quantity {
        let quantity: u32 = lines
            .iter()
            .filter(|line| !line.is_gift)
            .map(|line| line.quantity)
            .sum();

        if quantity < min_quantity {
            debug!(quantity, min_quantity, "voucher minimum quantity not met");
            return Ok(None);
        }
    }

    if let Some(min_spent) = listing.min_spent {
        let subtotal = subtotal_before_voucher(order.currency, lines)?;

        if subtotal.amount() < min_spent.amount() {
            debug!(%code, "voucher minimum spent not met");
            return Ok(None);
        }
    }

    Ok(Some(VoucherApplication {
        voucher,
        code,
        value: listing.discount_value,
    }))
}

fn subtotal_before_voucher<'a>(
    currency: &'a Currency,
    lines: &[OrderLine<'a>],
) -> Result<Money<'a, Currency>, DiscountError> {
    let mut subtotal = zero(currency);

    for line in lines.iter().filter(|line| !line.is_gift) {
        let undiscounted = line_total(line.undiscounted_base_unit_price, line.quantity)?;
        let discounts = sum_prices(
            currency,
            line.discounts
                .iter()
                .filter(|discount| !is_voucher_discount(discount))
                .map(|discount| discount.amount),
        )?;

        subtotal = subtotal.add(non_negative(undiscounted.sub(discounts)?))?;
    }

    Ok(subtotal)
}

/// Unit price after catalogue promotions, the base a product voucher applies to.
fn unit_price_before_voucher<'a>(
    line: &OrderLine<'a>,
) -> Result<Money<'a, Currency>, DiscountError> {
    let currency = line.currency();
    let catalogue = sum_prices(
        currency,
        line.discounts
            .iter()
            .filter(|discount| discount.discount_type == DiscountType::Promotion)
            .map(|discount| discount.amount),
    )?;
    let unit = unit_price(catalogue, line.quantity).unwrap_or_else(|| zero(currency));

    Ok(non_negative(line.undiscounted_base_unit_price.sub(unit)?))
}

fn apply_line_voucher<'a>(
    lines: &mut [OrderLine<'a>],
    application: &VoucherApplication<'_, 'a>,
    apply_once: bool,
    changes: &mut DiscountChanges,
) -> Result<(), DiscountError> {
    let voucher = application.voucher;
    let mut candidates = Vec::new();

    for line in lines.iter() {
        if voucher.applies_to_line(line) && line.quantity > 0 {
            candidates.push((line.id, unit_price_before_voucher(line)?));
        }
    }

    if apply_once {
        let cheapest = candidates
            .into_iter()
            .min_by(|(a_id, a_price), (b_id, b_price)| {
                a_price.amount().cmp(b_price.amount()).then(a_id.cmp(b_id))
            });
        candidates = cheapest.into_iter().collect();
    }

    for line in lines.iter_mut() {
        let selected = candidates
            .iter()
            .find(|(id, _)| *id == line.id)
            .map(|(_, price)| *price);

        remove_line_discounts(line, changes, |discount| {
            is_voucher_discount(discount)
                && (selected.is_none()
                    || discount.voucher_code.as_deref() != Some(application.code.as_str()))
        });

        if let Some(unit_base) = selected {
            let unit_discount = discount_amount(application.value, voucher.discount_value_type, unit_base)?;
            let amount = if apply_once {
                unit_discount
            } else {
                line_total(unit_discount, line.quantity)?
            };

            upsert_line_voucher_discount(line, application, amount, changes);
        }

        update_unit_discount_fields(line)?;
    }

    Ok(())
}

fn upsert_line_voucher_discount<'a>(
    line: &mut OrderLine<'a>,
    application: &VoucherApplication<'_, 'a>,
    amount: Money<'a, Currency>,
    changes: &mut DiscountChanges,
) {
    let value_type = application.voucher.discount_value_type;

    if let Some(existing) = line
        .discounts
        .iter_mut()
        .find(|discount| is_voucher_discount(discount))
    {
        if existing.amount != amount
            || existing.value != application.value
            || existing.value_type != value_type
        {
            existing.amount = amount;
            existing.value = application.value;
            existing.value_type = value_type;
            changes.updated.push(existing.id);
        }

        return;
    }

    let mut discount = LineDiscount::new(DiscountType::Voucher, value_type, application.value, amount)
        .with_reason(voucher_reason(&application.code));
    discount.voucher_code = Some(application.code.clone());

    debug!(line = %line.id, discount = %discount.id, "voucher line discount created");
    changes.created.push(discount.id);
    line.discounts.push(discount);
}

fn upsert_order_voucher_discount<'a>(
    order: &mut Order<'a>,
    application: &VoucherApplication<'_, 'a>,
    target: DiscountTarget,
    amount: Money<'a, Currency>,
    changes: &mut DiscountChanges,
) {
    let value_type = application.voucher.discount_value_type;

    if let Some(existing) = order.discounts.iter_mut().find(|discount| {
        discount.discount_type == DiscountType::Voucher && discount.target == target
    }) {
        if existing.amount != amount
            || existing.value != application.value
            || existing.value_type != value_type
        {
            existing.amount = amount;
            existing.value = application.value;
            existing.value_type = value_type;
            changes.updated.push(existing.id);
        }

        return;
    }

    let mut discount = OrderDiscount::new(
        DiscountType::Voucher,
        target,
        value_type,
        application.value,
        order.currency,
    )
    .with_reason(voucher_reason(&application.code));
    discount.amount = amount;
    // TODO: use the translated voucher name once voucher translations are loaded.
    discount.name.clone_from(&application.voucher.name);
    discount.voucher_code = Some(application.code.clone());

    debug!(discount = %discount.id, ?target, "voucher order discount created");
    changes.created.push(discount.id);
    order.discounts.push(discount);
}

fn is_voucher_discount(discount: &LineDiscount<'_>) -> bool {
    discount.discount_type == DiscountType::Voucher
}

fn refresh_lines(lines: &mut [OrderLine<'_>]) -> Result<(), DiscountError> {
    lines.iter_mut().try_for_each(update_unit_discount_fields)
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::USD;
    use testresult::TestResult;

    use crate::{
        order::{Channel, OrderStatus, ProductVariantRef, ShippingMethod},
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

    fn entire_order_voucher(value: i64) -> Voucher<'static> {
        Voucher::new(VoucherType::EntireOrder, DiscountValueType::Fixed)
            .with_listing("default", Decimal::from(value))
    }

    #[test]
    fn entire_order_voucher_creates_single_order_discount() -> TestResult {
        let mut order = order();
        order.set_voucher(Some(entire_order_voucher(3)), Some("SAVE3".to_string()));
        let mut lines = [line(1000, 3), line(1000, 2)];

        let changes = create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        assert_eq!(changes.created.len(), 1);
        assert_eq!(order.discounts.len(), 1);

        let discount = order.discounts.first().ok_or("missing discount")?;
        assert_eq!(discount.target, DiscountTarget::Subtotal);
        assert_eq!(discount.amount, Money::from_minor(300, USD));
        assert_eq!(discount.reason.as_deref(), Some("Voucher code: SAVE3"));

        // Line prices are untouched; proration happens in the base engine.
        assert!(
            lines
                .iter()
                .all(|line| line.base_unit_price == Money::from_minor(1000, USD))
        );

        Ok(())
    }

    #[test]
    fn entire_order_voucher_is_clamped_to_subtotal() -> TestResult {
        let mut order = order();
        order.set_voucher(Some(entire_order_voucher(500)), Some("BIG".to_string()));
        let mut lines = [line(1000, 1)];

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        let discount = order.discounts.first().ok_or("missing discount")?;
        assert_eq!(discount.amount, Money::from_minor(1000, USD));

        Ok(())
    }

    #[test]
    fn repeated_resolution_is_idempotent() -> TestResult {
        let mut order = order();
        order.set_voucher(Some(entire_order_voucher(3)), Some("SAVE3".to_string()));
        let mut lines = [line(1000, 3)];

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;
        let snapshot = order.discounts.clone();
        let changes = create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        assert!(changes.is_empty());
        assert_eq!(order.discounts, snapshot);

        Ok(())
    }

    #[test]
    fn shipping_voucher_discounts_base_shipping() -> TestResult {
        let mut order = order();
        order.set_shipping_method(Some(ShippingMethod {
            id: Uuid::now_v7(),
            name: "Courier".to_string(),
            price: Money::from_minor(1000, USD),
            tax_class: None,
        }));
        let voucher = Voucher::new(VoucherType::Shipping, DiscountValueType::Percentage)
            .with_listing("default", Decimal::from(50));
        order.set_voucher(Some(voucher), Some("HALFSHIP".to_string()));
        let mut lines = [line(1000, 1)];

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        let discount = order.discounts.first().ok_or("missing discount")?;
        assert_eq!(discount.target, DiscountTarget::Shipping);
        assert_eq!(discount.amount, Money::from_minor(500, USD));
        assert_eq!(order.base_shipping_price, Money::from_minor(500, USD));
        assert_eq!(order.undiscounted_base_shipping_price, Money::from_minor(1000, USD));

        Ok(())
    }

    #[test]
    fn specific_product_voucher_discounts_eligible_lines_only() -> TestResult {
        let mut order = order();
        let mut lines = [line(1000, 2), line(500, 1)];
        let eligible = lines.first().map(|line| line.variant.product_id);

        let mut voucher = Voucher::new(VoucherType::SpecificProduct, DiscountValueType::Fixed)
            .with_listing("default", Decimal::ONE);
        voucher.catalogue = CataloguePredicate::products(eligible);
        order.set_voucher(Some(voucher), Some("ONEOFF".to_string()));

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        let [first, second] = &lines;
        assert_eq!(first.base_unit_price, Money::from_minor(900, USD));
        assert_eq!(
            first.discounts_of(DiscountType::Voucher).map(|d| d.amount).next(),
            Some(Money::from_minor(200, USD))
        );
        assert!(second.discounts.is_empty());
        assert!(order.discounts.is_empty());

        Ok(())
    }

    #[test]
    fn apply_once_voucher_discounts_one_unit_of_cheapest_line() -> TestResult {
        let mut order = order();
        let mut lines = [line(1000, 2), line(400, 3)];

        let mut voucher = Voucher::new(VoucherType::EntireOrder, DiscountValueType::Percentage)
            .with_listing("default", Decimal::from(50));
        voucher.apply_once_per_order = true;
        order.set_voucher(Some(voucher), Some("CHEAP".to_string()));

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        let [expensive, cheap] = &lines;
        assert!(expensive.discounts.is_empty());
        assert_eq!(
            cheap.discounts_of(DiscountType::Voucher).map(|d| d.amount).next(),
            Some(Money::from_minor(200, USD))
        );
        assert!(order.discounts.is_empty());

        Ok(())
    }

    #[test]
    fn switching_voucher_removes_previous_discounts() -> TestResult {
        let mut order = order();
        let mut lines = [line(1000, 2)];
        let product = lines.first().map(|line| line.variant.product_id);

        let mut product_voucher =
            Voucher::new(VoucherType::SpecificProduct, DiscountValueType::Fixed)
                .with_listing("default", Decimal::ONE);
        product_voucher.catalogue = CataloguePredicate::products(product);
        order.set_voucher(Some(product_voucher), Some("A".to_string()));
        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        order.set_voucher(Some(entire_order_voucher(2)), Some("B".to_string()));
        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        let line_codes: Vec<_> = lines
            .iter()
            .flat_map(|line| line.discounts.iter())
            .filter_map(|discount| discount.voucher_code.clone())
            .collect();
        let order_codes: Vec<_> = order
            .discounts
            .iter()
            .filter_map(|discount| discount.voucher_code.clone())
            .collect();

        assert!(line_codes.is_empty());
        assert_eq!(order_codes, vec!["B".to_string()]);
        assert!(
            lines
                .iter()
                .all(|line| line.base_unit_price == Money::from_minor(1000, USD))
        );

        Ok(())
    }

    #[test]
    fn voucher_below_min_spent_is_removed() -> TestResult {
        let mut order = order();
        let mut voucher = entire_order_voucher(3);
        if let Some(listing) = voucher.channel_listings.get_mut("default") {
            listing.min_spent = Some(Money::from_minor(10_000, USD));
        }
        order.set_voucher(Some(voucher), Some("SAVE3".to_string()));
        let mut lines = [line(1000, 3)];

        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        assert!(order.discounts.is_empty());

        Ok(())
    }

    #[test]
    fn removing_voucher_cleans_up() -> TestResult {
        let mut order = order();
        order.set_voucher(Some(entire_order_voucher(3)), Some("SAVE3".to_string()));
        let mut lines = [line(1000, 3)];
        create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        order.set_voucher(None, None);
        let changes = create_or_update_voucher_discount_objects_for_order(&mut order, &mut lines)?;

        assert_eq!(changes.deleted.len(), 1);
        assert!(order.discounts.is_empty());

        Ok(())
    }
}
