//! Taxes
//!
//! Channel tax configuration, flat-rate tax math and the tax provider port.

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use rusty_money::MoneyError;
use thiserror::Error;

use crate::money::percent;

pub mod calculations;
pub mod provider;

pub use provider::{NoTaxProvider, TaxData, TaxLineData, TaxProvider};

/// Prefix of app identifiers served by the legacy plugin path.
pub const PLUGIN_IDENTIFIER_PREFIX: &str = "plugin:";

/// How taxes are calculated for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaxCalculationStrategy {
    /// Static percentages per tax class.
    #[default]
    FlatRates,

    /// An external tax app or plugin.
    TaxApp,
}

/// Flat tax rates.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRates {
    /// Rate used when a tax class has no explicit rate
    pub default_rate: Percentage,

    /// Rate for shipping; falls back to the shipping method's tax class, then the default
    pub shipping_rate: Option<Percentage>,

    /// Rates per tax class name
    pub tax_class_rates: FxHashMap<String, Percentage>,
}

impl Default for FlatRates {
    fn default() -> Self {
        Self::uniform(percent(Decimal::ZERO))
    }
}

impl FlatRates {
    /// A single rate for everything.
    pub fn uniform(rate: Percentage) -> Self {
        Self {
            default_rate: rate,
            shipping_rate: None,
            tax_class_rates: FxHashMap::default(),
        }
    }

    /// Rate for a line's tax class.
    pub fn rate_for(&self, tax_class: Option<&str>) -> Percentage {
        tax_class
            .and_then(|class| self.tax_class_rates.get(class))
            .copied()
            .unwrap_or(self.default_rate)
    }

    /// Rate for shipping with the given tax class.
    pub fn shipping_rate_for(&self, tax_class: Option<&str>) -> Percentage {
        self.shipping_rate
            .unwrap_or_else(|| self.rate_for(tax_class))
    }
}

/// Tax settings of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxConfiguration {
    /// Whether tax is charged at all
    pub charge_taxes: bool,

    /// Whether listed prices already include tax
    pub prices_entered_with_tax: bool,

    /// Flat rates or tax app
    pub strategy: TaxCalculationStrategy,

    /// App identifier for the tax app strategy; `plugin:` prefixed ids use plugins
    pub tax_app_id: Option<String>,

    /// Rates used by the flat rates strategy
    pub flat_rates: FlatRates,
}

impl Default for TaxConfiguration {
    fn default() -> Self {
        Self {
            charge_taxes: true,
            prices_entered_with_tax: false,
            strategy: TaxCalculationStrategy::FlatRates,
            tax_app_id: None,
            flat_rates: FlatRates::default(),
        }
    }
}

impl TaxConfiguration {
    /// Flat rates with a single rate.
    pub fn flat(rate: Percentage, prices_entered_with_tax: bool) -> Self {
        Self {
            prices_entered_with_tax,
            flat_rates: FlatRates::uniform(rate),
            ..Self::default()
        }
    }

    /// Tax app strategy with the given app identifier.
    pub fn tax_app(app_id: impl Into<String>, prices_entered_with_tax: bool) -> Self {
        Self {
            prices_entered_with_tax,
            strategy: TaxCalculationStrategy::TaxApp,
            tax_app_id: Some(app_id.into()),
            ..Self::default()
        }
    }

    /// Whether calculation goes through an external provider.
    pub fn uses_tax_app(&self) -> bool {
        self.strategy == TaxCalculationStrategy::TaxApp
    }

    /// Whether the tax app identifier selects the plugin path.
    pub fn uses_plugins(&self) -> bool {
        self.tax_app_id
            .as_deref()
            .is_none_or(|id| id.starts_with(PLUGIN_IDENTIFIER_PREFIX))
    }
}

/// Tax data returned by a provider could not be used.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TaxDataError {
    /// Summary message, recorded on the order
    pub message: String,

    /// Detailed validation errors
    pub errors: Vec<String>,
}

impl TaxDataError {
    /// Error with a message and no details.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

/// Tax calculation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaxError {
    /// A tax plugin failed.
    #[error("tax plugin failed: {0}")]
    Plugin(String),

    /// The provider does not support this calculation.
    #[error("tax calculation not supported by provider")]
    Unsupported,

    /// Decimal arithmetic overflowed.
    #[error("tax arithmetic overflowed")]
    Overflow,

    /// Tax data was invalid on a path where that is fatal.
    #[error(transparent)]
    Data(#[from] TaxDataError),

    /// Wrapped money arithmetic or currency mismatch error.
    #[error(transparent)]
    Money(#[from] MoneyError),
}
