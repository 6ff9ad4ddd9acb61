//! Tax Provider
//!
//! Port to external tax apps and plugins.

use decimal_percentage::Percentage;
use rust_decimal::Decimal;

use crate::{
    money::TaxedMoney,
    order::{Order, OrderLine},
    tax::{TaxDataError, TaxError},
};

/// Taxes for one line's total.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxLineData {
    /// Line total before tax
    pub total_net_amount: Decimal,

    /// Line total after tax
    pub total_gross_amount: Decimal,

    /// Line tax rate
    pub tax_rate: Percentage,
}

/// Taxes for a whole order. `lines` is parallel to the order's lines.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxData {
    /// Shipping price before tax
    pub shipping_price_net_amount: Decimal,

    /// Shipping price after tax
    pub shipping_price_gross_amount: Decimal,

    /// Shipping tax rate
    pub shipping_tax_rate: Percentage,

    /// Per-line taxes
    pub lines: Vec<TaxLineData>,
}

impl TaxData {
    /// Check the data matches the order's lines.
    ///
    /// # Errors
    ///
    /// Returns a [`TaxDataError`] if the line count differs or an amount is negative.
    pub fn validate(&self, line_count: usize) -> Result<(), TaxDataError> {
        let mut errors = Vec::new();

        if self.lines.len() != line_count {
            errors.push(format!(
                "expected {line_count} lines, got {}",
                self.lines.len()
            ));
        }

        let negative = self.lines.iter().any(|line| {
            line.total_net_amount.is_sign_negative() || line.total_gross_amount.is_sign_negative()
        }) || self.shipping_price_net_amount.is_sign_negative()
            || self.shipping_price_gross_amount.is_sign_negative();

        if negative {
            errors.push("negative amounts".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TaxDataError {
                message: "Invalid tax data.".to_string(),
                errors,
            })
        }
    }
}

/// External tax calculation.
///
/// Calls are synchronous and may block.
pub trait TaxProvider {
    /// Taxes for the whole order, or `None` if the provider has no data.
    ///
    /// # Errors
    ///
    /// Returns a [`TaxDataError`] if the provider responded with unusable data.
    fn get_taxes_for_order<'a>(
        &self,
        order: &Order<'a>,
        lines: &[OrderLine<'a>],
        app_identifier: &str,
    ) -> Result<Option<TaxData>, TaxDataError>;

    /// Taxed total of a single line, used by plugins without bulk data.
    ///
    /// # Errors
    ///
    /// Returns a [`TaxError`] if the plugin fails.
    fn calculate_order_line_total<'a>(
        &self,
        _order: &Order<'a>,
        _line: &OrderLine<'a>,
        _app_identifier: &str,
    ) -> Result<TaxedMoney<'a>, TaxError> {
        Err(TaxError::Unsupported)
    }

    /// Taxed shipping price, used by plugins without bulk data.
    ///
    /// # Errors
    ///
    /// Returns a [`TaxError`] if the plugin fails.
    fn calculate_order_shipping<'a>(
        &self,
        _order: &Order<'a>,
        _app_identifier: &str,
    ) -> Result<TaxedMoney<'a>, TaxError> {
        Err(TaxError::Unsupported)
    }
}

/// Provider that never has tax data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTaxProvider;

impl TaxProvider for NoTaxProvider {
    fn get_taxes_for_order<'a>(
        &self,
        _order: &Order<'a>,
        _lines: &[OrderLine<'a>],
        _app_identifier: &str,
    ) -> Result<Option<TaxData>, TaxDataError> {
        Ok(None)
    }
}
