//! Money
//!
//! Currency-aware amounts, taxed price pairs, percentages and quantization to
//! a currency's minor unit.

use decimal_percentage::Percentage;
use rust_decimal::{Decimal, RoundingStrategy};
use rusty_money::{Findable, Money, MoneyError, iso::Currency};

/// A price before and after tax.
///
/// When tax is not charged `net == gross`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxedMoney<'a> {
    /// Price before tax.
    pub net: Money<'a, Currency>,

    /// Price after tax.
    pub gross: Money<'a, Currency>,
}

/// A range of taxed prices, e.g. the cheapest and most expensive variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaxedMoneyRange<'a> {
    /// Lower bound of the range.
    pub start: TaxedMoney<'a>,

    /// Upper bound of the range.
    pub stop: TaxedMoney<'a>,
}

impl<'a> TaxedMoney<'a> {
    /// Create a taxed price from its net and gross parts.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] if the parts use different currencies.
    pub fn new(net: Money<'a, Currency>, gross: Money<'a, Currency>) -> Result<Self, MoneyError> {
        ensure_same_currency(&net, &gross)?;

        Ok(Self { net, gross })
    }

    /// A price with no tax applied, `net == gross`.
    pub fn untaxed(price: Money<'a, Currency>) -> Self {
        Self {
            net: price,
            gross: price,
        }
    }

    /// Zero in the given currency.
    pub fn zero(currency: &'a Currency) -> Self {
        Self::untaxed(zero(currency))
    }

    /// Currency of both parts.
    pub fn currency(&self) -> &'a Currency {
        self.net.currency()
    }

    /// Tax amount, `gross - net`.
    ///
    /// # Errors
    ///
    /// Returns a [`MoneyError`] on currency mismatch.
    pub fn tax(&self) -> Result<Money<'a, Currency>, MoneyError> {
        self.gross.sub(self.net)
    }

    /// Add two taxed prices part by part.
    ///
    /// # Errors
    ///
    /// Returns a [`MoneyError`] on currency mismatch.
    pub fn add(self, other: TaxedMoney<'a>) -> Result<Self, MoneyError> {
        Ok(Self {
            net: self.net.add(other.net)?,
            gross: self.gross.add(other.gross)?,
        })
    }

    /// Subtract part by part.
    ///
    /// # Errors
    ///
    /// Returns a [`MoneyError`] on currency mismatch.
    pub fn sub(self, other: TaxedMoney<'a>) -> Result<Self, MoneyError> {
        Ok(Self {
            net: self.net.sub(other.net)?,
            gross: self.gross.sub(other.gross)?,
        })
    }

    /// Divide both parts by `quantity` and quantize, yielding a unit price.
    ///
    /// Returns `None` when `quantity` is zero.
    pub fn unit_price(&self, quantity: u32) -> Option<Self> {
        Some(Self {
            net: unit_price(self.net, quantity)?,
            gross: unit_price(self.gross, quantity)?,
        })
    }

    /// Replace the gross part with the net part.
    pub fn without_tax(self) -> Self {
        Self::untaxed(self.net)
    }
}

/// Rounding to the minor unit of a currency.
pub trait Quantize {
    /// Round to the currency's minor-unit precision.
    #[must_use]
    fn quantize(&self) -> Self;
}

impl Quantize for Money<'_, Currency> {
    fn quantize(&self) -> Self {
        Money::from_decimal(quantize_to(*self.amount(), self.currency()), self.currency())
    }
}

impl Quantize for TaxedMoney<'_> {
    fn quantize(&self) -> Self {
        Self {
            net: self.net.quantize(),
            gross: self.gross.quantize(),
        }
    }
}

impl Quantize for TaxedMoneyRange<'_> {
    fn quantize(&self) -> Self {
        Self {
            start: self.start.quantize(),
            stop: self.stop.quantize(),
        }
    }
}

/// Round a price to its currency's minor-unit precision.
pub fn quantize_price<T: Quantize>(price: &T) -> T {
    price.quantize()
}

/// Round a raw decimal to the minor-unit precision of the currency `code`.
///
/// # Errors
///
/// Returns [`MoneyError::InvalidCurrency`] if `code` is not an ISO currency.
pub fn quantize_amount(amount: Decimal, code: &str) -> Result<Decimal, MoneyError> {
    let currency = Currency::find(code).ok_or(MoneyError::InvalidCurrency)?;

    Ok(quantize_to(amount, currency))
}

/// Round half away from zero to the currency exponent, padding the scale so
/// `5` becomes `5.00` for two-decimal currencies.
pub(crate) fn quantize_to(amount: Decimal, currency: &Currency) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(currency.exponent, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(currency.exponent);

    rounded
}

/// Zero in the given currency.
pub fn zero(currency: &Currency) -> Money<'_, Currency> {
    Money::from_minor(0, currency)
}

/// Build money from a decimal amount.
pub fn money(amount: Decimal, currency: &Currency) -> Money<'_, Currency> {
    Money::from_decimal(amount, currency)
}

/// `price * quantity`, quantized.
///
/// # Errors
///
/// Returns [`MoneyError::Overflow`] if the multiplication overflows.
pub fn line_total(price: Money<'_, Currency>, quantity: u32) -> Result<Money<'_, Currency>, MoneyError> {
    Ok(price.mul(quantity)?.quantize())
}

/// The percentage for `points` percent, e.g. `23` for 23%.
pub fn percent(points: Decimal) -> Percentage {
    // Dividing by a non-zero constant cannot overflow.
    Percentage::from(points / Decimal::ONE_HUNDRED)
}

/// The fraction a percentage stands for, e.g. `0.23` for 23%.
pub fn fraction(percentage: Percentage) -> Decimal {
    // decimal_percentage doesn't expose the underlying Decimal
    percentage * Decimal::ONE
}

/// Percent points of a percentage, e.g. `23` for 23%. `None` on overflow.
pub fn percent_points(percentage: Percentage) -> Option<Decimal> {
    fraction(percentage).checked_mul(Decimal::ONE_HUNDRED)
}

/// `total / quantity`, quantized. `None` when `quantity` is zero.
pub fn unit_price(total: Money<'_, Currency>, quantity: u32) -> Option<Money<'_, Currency>> {
    let amount = total.amount().checked_div(Decimal::from(quantity))?;

    Some(money(amount, total.currency()).quantize())
}

/// Clamp negative amounts to zero.
pub fn non_negative(price: Money<'_, Currency>) -> Money<'_, Currency> {
    if price.amount().is_sign_negative() {
        zero(price.currency())
    } else {
        price
    }
}

/// The smaller of two amounts.
///
/// # Errors
///
/// Returns [`MoneyError::CurrencyMismatch`] if the currencies differ.
pub fn min_price<'a>(
    a: Money<'a, Currency>,
    b: Money<'a, Currency>,
) -> Result<Money<'a, Currency>, MoneyError> {
    ensure_same_currency(&a, &b)?;

    Ok(if a.amount() <= b.amount() { a } else { b })
}

/// Sum a sequence of prices, starting from zero in `currency`.
///
/// # Errors
///
/// Returns [`MoneyError::CurrencyMismatch`] if any price uses another currency.
pub fn sum_prices<'a>(
    currency: &'a Currency,
    prices: impl IntoIterator<Item = Money<'a, Currency>>,
) -> Result<Money<'a, Currency>, MoneyError> {
    prices
        .into_iter()
        .try_fold(zero(currency), |acc, price| acc.add(price))
}

/// Fail with [`MoneyError::CurrencyMismatch`] unless both prices share a currency.
///
/// # Errors
///
/// Returns [`MoneyError::CurrencyMismatch`] if the currencies differ.
pub fn ensure_same_currency(
    expected: &Money<'_, Currency>,
    actual: &Money<'_, Currency>,
) -> Result<(), MoneyError> {
    if expected.currency() == actual.currency() {
        Ok(())
    } else {
        Err(MoneyError::CurrencyMismatch {
            expected: expected.currency().iso_alpha_code,
            actual: actual.currency().iso_alpha_code,
        })
    }
}
