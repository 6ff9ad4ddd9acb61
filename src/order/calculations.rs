//! Order Calculations
//!
//! The recalculation entry point: decides whether an order's prices are
//! stale, re-derives every discount, runs the base price and tax engines and
//! persists the result.

use std::{fmt, slice};

use jiff::{Span, Timestamp};
use rustc_hash::FxHashSet;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    catalogue::Catalogue,
    discounts::{
        DiscountChanges, manual::refresh_manual_line_discounts, update_unit_discount_fields,
        vouchers::create_or_update_voucher_discount_objects_for_order,
    },
    order::{
        Order, OrderChanges, OrderLine, OrderStatus, PricingError,
        base_calculations::calculate_base_prices, taxes::calculate_taxes,
    },
    promotions::{
        catalogue::refresh_order_line_discount_objects_for_catalogue_promotions,
        order::handle_order_promotion,
    },
    settings::Settings,
    store::OrderStore,
    tax::TaxProvider,
};

/// Per-call switches for [`OrderCalculator::fetch_order_prices_if_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Recalculate even when prices are fresh.
    pub force_update: bool,

    /// Allow synchronous calls to an external tax app.
    pub allow_sync_webhooks: bool,

    /// Treat a tax app returning no data as zero tax instead of an error.
    pub allow_empty_tax_data: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            force_update: false,
            allow_sync_webhooks: true,
            allow_empty_tax_data: false,
        }
    }
}

impl FetchOptions {
    /// Options forcing a recalculation.
    pub fn forced() -> Self {
        Self {
            force_update: true,
            ..Self::default()
        }
    }
}

/// Recalculates order prices against a catalogue and a tax provider.
pub struct OrderCalculator<'c, 'a> {
    catalogue: &'c dyn Catalogue<'a>,
    tax_provider: &'c dyn TaxProvider,
    settings: &'c Settings,
}

impl fmt::Debug for OrderCalculator<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderCalculator")
            .field("settings", self.settings)
            .finish_non_exhaustive()
    }
}

impl<'c, 'a> OrderCalculator<'c, 'a> {
    /// Create a calculator.
    pub fn new(
        catalogue: &'c dyn Catalogue<'a>,
        tax_provider: &'c dyn TaxProvider,
        settings: &'c Settings,
    ) -> Self {
        Self {
            catalogue,
            tax_provider,
            settings,
        }
    }

    /// Recalculate the order's prices if they are stale and persist them.
    ///
    /// Returns the order and lines unchanged when the order is not editable,
    /// when prices are fresh and no draft line price expired, or when the tax
    /// app would be called while synchronous calls are not allowed.
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if a calculation fails on a fatal path or
    /// the store rejects the commit. Nothing is persisted then.
    #[instrument(skip_all, fields(order = %order.id, force = options.force_update))]
    pub fn fetch_order_prices_if_expired(
        &self,
        mut order: Order<'a>,
        mut lines: Vec<OrderLine<'a>>,
        store: &mut dyn OrderStore<'a>,
        options: FetchOptions,
        now: Timestamp,
    ) -> Result<(Order<'a>, Vec<OrderLine<'a>>), PricingError> {
        if !order.status.is_editable() {
            debug!(status = ?order.status, "order not editable");
            return Ok((order, lines));
        }

        let expired = expired_line_ids(&order, &lines, now);

        if !options.force_update && !order.should_refresh_prices && expired.is_empty() {
            debug!("prices up to date");
            return Ok((order, lines));
        }

        if order.channel.tax_configuration.uses_tax_app() && !options.allow_sync_webhooks {
            debug!("tax app calls not allowed, deferring recalculation");
            return Ok((order, lines));
        }

        let mut changes = OrderChanges::default();

        if !expired.is_empty() {
            changes.refreshed_lines = self.refresh_line_prices(&order, &mut lines, &expired, now)?;
        }

        changes.record(self.refresh_line_discounts(&mut order, &mut lines, &expired)?);

        let rules = self.catalogue.promotion_rules(&order.channel.slug);
        changes.record(handle_order_promotion(&mut order, &mut lines, rules, self.catalogue)?);

        let mut order_discounts = DiscountChanges::default();
        calculate_base_prices(&mut order, &mut lines, &mut order_discounts)?;
        changes.record(order_discounts);

        calculate_taxes(&mut order, &mut lines, self.tax_provider, options)?;

        order.should_refresh_prices = false;

        store.commit(&order, &lines, &changes)?;

        info!(
            total = %order.total.gross,
            tax_error = order.tax_error.as_deref(),
            "order prices recalculated"
        );

        Ok((order, lines))
    }

    /// Load an order from the store and run
    /// [`fetch_order_prices_if_expired`](Self::fetch_order_prices_if_expired).
    ///
    /// # Errors
    ///
    /// Returns a [`PricingError`] if loading, calculating or committing fails.
    pub fn recalculate_order(
        &self,
        store: &mut dyn OrderStore<'a>,
        id: Uuid,
        options: FetchOptions,
        now: Timestamp,
    ) -> Result<(Order<'a>, Vec<OrderLine<'a>>), PricingError> {
        let (order, lines) = store.load_order(id)?;

        self.fetch_order_prices_if_expired(order, lines, store, options, now)
    }

    /// Re-fetch channel prices of expired draft lines and extend their expiry.
    fn refresh_line_prices(
        &self,
        order: &Order<'a>,
        lines: &mut [OrderLine<'a>],
        expired: &FxHashSet<Uuid>,
        now: Timestamp,
    ) -> Result<Vec<Uuid>, PricingError> {
        let freshness = Span::new().try_hours(self.settings.draft_line_price_freshness_hours)?;
        let expire_at = now.checked_add(freshness)?;
        let mut refreshed = Vec::new();

        for line in lines.iter_mut().filter(|line| expired.contains(&line.id)) {
            let listing = self
                .catalogue
                .variant_listing(&order.channel.slug, line.variant.variant_id)
                .filter(|listing| listing.price.currency() == order.currency);

            match listing {
                Some(listing) => {
                    if line.undiscounted_base_unit_price != listing.price {
                        debug!(line = %line.id, price = %listing.price, "line base price refreshed");
                    }

                    line.undiscounted_base_unit_price = listing.price;
                    update_unit_discount_fields(line)?;
                    refreshed.push(line.id);
                }
                None => debug!(line = %line.id, "variant no longer listed, keeping price"),
            }

            line.draft_base_price_expire_at = Some(expire_at);
        }

        Ok(refreshed)
    }

    /// Re-derive manual and catalogue discounts of expired lines, then the
    /// voucher discounts of the whole order.
    ///
    /// Lines whose price did not expire keep the discounts they were priced
    /// with, even if the promotion has since ended.
    fn refresh_line_discounts(
        &self,
        order: &mut Order<'a>,
        lines: &mut [OrderLine<'a>],
        expired: &FxHashSet<Uuid>,
    ) -> Result<DiscountChanges, PricingError> {
        let mut changes = DiscountChanges::default();
        let rules = self.catalogue.promotion_rules(&order.channel.slug);

        for line in lines.iter_mut().filter(|line| expired.contains(&line.id)) {
            let line = slice::from_mut(line);

            changes.merge(refresh_manual_line_discounts(line)?);
            changes.merge(refresh_order_line_discount_objects_for_catalogue_promotions(line, rules)?);
        }

        changes.merge(create_or_update_voucher_discount_objects_for_order(order, lines)?);

        Ok(changes)
    }
}

/// Draft lines whose base price expired. Lines that never had an expiry are
/// expired.
fn expired_line_ids(order: &Order<'_>, lines: &[OrderLine<'_>], now: Timestamp) -> FxHashSet<Uuid> {
    if order.status != OrderStatus::Draft {
        return FxHashSet::default();
    }

    lines
        .iter()
        .filter(|line| !line.is_gift)
        .filter(|line| line.draft_base_price_expire_at.is_none_or(|expire_at| expire_at <= now))
        .map(|line| line.id)
        .collect()
}
