//! Pricing Errors

use rusty_money::MoneyError;
use thiserror::Error;

use crate::{discounts::DiscountError, store::StoreError, tax::TaxError};

/// Errors that abort a recalculation pass. Nothing is persisted when one is
/// returned.
#[derive(Debug, Error)]
pub enum PricingError {
    /// Currency mismatch between prices.
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// Discount calculation failed.
    #[error(transparent)]
    Discount(#[from] DiscountError),

    /// Tax calculation failed on a fatal path.
    #[error(transparent)]
    Tax(#[from] TaxError),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Price expiry timestamp out of range.
    #[error("failed to compute price expiry: {0}")]
    Time(#[from] jiff::Error),
}
