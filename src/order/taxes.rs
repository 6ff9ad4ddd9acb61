//! Order Taxes
//!
//! Turns the untaxed base prices written by the base price engine into
//! net/gross pairs using the channel's tax strategy.

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::{
    money::{TaxedMoney, line_total, money, percent, quantize_price},
    order::{FetchOptions, Order, OrderLine, base_calculations::assign_order_totals},
    tax::{
        TaxData, TaxError, TaxLineData, TaxProvider,
        calculations::{calculate_flat_rate_tax, tax_rate_of},
    },
};

/// Recorded when a provider returns no data and empty data is not allowed.
pub const EMPTY_TAX_DATA_MESSAGE: &str = "Empty tax data.";

/// Apply taxes to the base prices of the order and its lines.
///
/// Must run after the base price engine: every line and shipping price is
/// expected to be untaxed. Clears `order.tax_error`, which is set again if a
/// soft tax failure is caught during this pass.
///
/// # Errors
///
/// Returns a [`TaxError`] when bulk tax data is invalid on the plugin path or
/// when arithmetic overflows.
#[instrument(skip_all, fields(order = %order.id))]
pub fn calculate_taxes<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    provider: &dyn TaxProvider,
    options: FetchOptions,
) -> Result<(), TaxError> {
    order.tax_error = None;

    let config = order.channel.tax_configuration.clone();
    let should_charge = config.charge_taxes && !order.tax_exemption;

    if !config.prices_entered_with_tax && !should_charge {
        debug!("taxes not charged");
        return strip_taxes(order, lines);
    }

    if config.uses_tax_app() {
        let app_id = config.tax_app_id.as_deref().unwrap_or_default();

        if config.uses_plugins() {
            calculate_with_plugins(order, lines, provider, app_id)?;
        } else {
            calculate_with_tax_app(order, lines, provider, app_id, options)?;
        }
    } else {
        let data = flat_rate_tax_data(order, lines)?;
        apply_tax_data(order, lines, &data)?;
    }

    if should_charge {
        Ok(())
    } else {
        strip_taxes(order, lines)
    }
}

fn calculate_with_tax_app<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    provider: &dyn TaxProvider,
    app_id: &str,
    options: FetchOptions,
) -> Result<(), TaxError> {
    let applied = match provider.get_taxes_for_order(order, lines, app_id) {
        Ok(Some(data)) => apply_tax_data(order, lines, &data),
        Ok(None) if options.allow_empty_tax_data => {
            debug!(app_id, "empty tax data, using zero tax");
            return strip_taxes(order, lines);
        }
        Ok(None) => {
            warn!(app_id, "tax app returned no data");
            order.tax_error = Some(EMPTY_TAX_DATA_MESSAGE.to_string());
            return Ok(());
        }
        Err(error) => Err(TaxError::Data(error)),
    };

    match applied {
        Err(TaxError::Data(error)) => {
            warn!(app_id, %error, errors = ?error.errors, "tax app data rejected");
            if !error.message.is_empty() {
                order.tax_error = Some(error.message);
            }
            Ok(())
        }
        other => other,
    }
}

fn calculate_with_plugins<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    provider: &dyn TaxProvider,
    app_id: &str,
) -> Result<(), TaxError> {
    if let Some(data) = provider.get_taxes_for_order(order, lines, app_id)? {
        apply_tax_data(order, lines, &data)?;
        return Ok(());
    }

    let prices_entered_with_tax = order.channel.tax_configuration.prices_entered_with_tax;

    for line in lines.iter_mut() {
        match provider.calculate_order_line_total(order, line, app_id) {
            Ok(total) => {
                let rate = tax_rate_of(&total)?;
                apply_line_taxes(line, total, rate, prices_entered_with_tax)?;
            }
            Err(error) => warn!(line = %line.id, %error, "line tax calculation failed"),
        }
    }

    match provider.calculate_order_shipping(order, app_id) {
        Ok(shipping) => {
            let rate = tax_rate_of(&shipping)?;
            apply_shipping_taxes(order, shipping, rate, prices_entered_with_tax)?;
        }
        Err(error) => warn!(%error, "shipping tax calculation failed"),
    }

    assign_order_totals(order, lines)?;

    Ok(())
}

/// Tax data computed from the channel's flat rates.
///
/// # Errors
///
/// Returns [`TaxError::Overflow`] if the arithmetic overflows.
pub fn flat_rate_tax_data(order: &Order<'_>, lines: &[OrderLine<'_>]) -> Result<TaxData, TaxError> {
    let config = &order.channel.tax_configuration;
    let entered_with_tax = config.prices_entered_with_tax;

    let lines = lines
        .iter()
        .map(|line| {
            let rate = config.flat_rates.rate_for(line.tax_class.as_deref());
            let taxed = calculate_flat_rate_tax(line.total_price.gross, rate, entered_with_tax)?;

            Ok(TaxLineData {
                total_net_amount: *taxed.net.amount(),
                total_gross_amount: *taxed.gross.amount(),
                tax_rate: rate,
            })
        })
        .collect::<Result<Vec<_>, TaxError>>()?;

    let shipping_class = order
        .shipping_method
        .as_ref()
        .and_then(|method| method.tax_class.as_deref());
    let shipping_rate = config.flat_rates.shipping_rate_for(shipping_class);
    let shipping = calculate_flat_rate_tax(order.shipping_price.gross, shipping_rate, entered_with_tax)?;

    Ok(TaxData {
        shipping_price_net_amount: *shipping.net.amount(),
        shipping_price_gross_amount: *shipping.gross.amount(),
        shipping_tax_rate: shipping_rate,
        lines,
    })
}

/// Write provider or flat-rate tax data onto the order and its lines.
///
/// Unit prices are back-computed from the line totals. Undiscounted prices
/// are taxed with the same rate as the discounted ones.
///
/// # Errors
///
/// Returns [`TaxError::Data`] if the data does not match the lines.
pub fn apply_tax_data<'a>(
    order: &mut Order<'a>,
    lines: &mut [OrderLine<'a>],
    data: &TaxData,
) -> Result<(), TaxError> {
    data.validate(lines.len())?;

    let currency = order.currency;
    let prices_entered_with_tax = order.channel.tax_configuration.prices_entered_with_tax;

    for (line, line_data) in lines.iter_mut().zip(&data.lines) {
        let total = TaxedMoney {
            net: money(line_data.total_net_amount, currency),
            gross: money(line_data.total_gross_amount, currency),
        };

        apply_line_taxes(line, total, line_data.tax_rate, prices_entered_with_tax)?;
    }

    let shipping = TaxedMoney {
        net: money(data.shipping_price_net_amount, currency),
        gross: money(data.shipping_price_gross_amount, currency),
    };

    apply_shipping_taxes(order, shipping, data.shipping_tax_rate, prices_entered_with_tax)?;
    assign_order_totals(order, lines)?;

    Ok(())
}

fn apply_line_taxes<'a>(
    line: &mut OrderLine<'a>,
    total: TaxedMoney<'a>,
    rate: Percentage,
    prices_entered_with_tax: bool,
) -> Result<(), TaxError> {
    let total = quantize_price(&total);

    line.total_price = total;
    if let Some(unit) = total.unit_price(line.quantity) {
        line.unit_price = unit;
    }
    line.tax_rate = rate;

    let undiscounted_total = line_total(line.undiscounted_base_unit_price, line.quantity)?;
    let undiscounted_total = calculate_flat_rate_tax(undiscounted_total, rate, prices_entered_with_tax)?;

    line.undiscounted_total_price = undiscounted_total;
    if let Some(unit) = undiscounted_total.unit_price(line.quantity) {
        line.undiscounted_unit_price = unit;
    }

    Ok(())
}

fn apply_shipping_taxes<'a>(
    order: &mut Order<'a>,
    shipping: TaxedMoney<'a>,
    rate: Percentage,
    prices_entered_with_tax: bool,
) -> Result<(), TaxError> {
    order.shipping_price = quantize_price(&shipping);
    order.shipping_tax_rate = rate;
    order.undiscounted_shipping_price = calculate_flat_rate_tax(
        order.undiscounted_base_shipping_price,
        rate,
        prices_entered_with_tax,
    )?;

    Ok(())
}

/// Drop tax from every price: gross becomes net and rates become zero.
fn strip_taxes<'a>(order: &mut Order<'a>, lines: &mut [OrderLine<'a>]) -> Result<(), TaxError> {
    for line in lines.iter_mut() {
        line.total_price = line.total_price.without_tax();
        line.unit_price = line.unit_price.without_tax();
        line.undiscounted_total_price = line.undiscounted_total_price.without_tax();
        line.undiscounted_unit_price = line.undiscounted_unit_price.without_tax();
        line.tax_rate = percent(Decimal::ZERO);
    }

    order.shipping_price = order.shipping_price.without_tax();
    order.undiscounted_shipping_price = order.undiscounted_shipping_price.without_tax();
    order.shipping_tax_rate = percent(Decimal::ZERO);

    assign_order_totals(order, lines)?;

    Ok(())
}
