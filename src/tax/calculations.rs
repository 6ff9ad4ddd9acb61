//! Flat Rate Tax

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};

use crate::{
    money::{Quantize, TaxedMoney, fraction, money, percent},
    tax::TaxError,
};

/// Apply a flat tax `rate` to `price`.
///
/// When prices are entered with tax `price` is the gross amount and the net
/// amount is `price / (1 + rate)`; otherwise `price` is net and the gross
/// amount is `price * (1 + rate)`. Both parts are quantized.
///
/// # Errors
///
/// Returns [`TaxError::Overflow`] if the arithmetic overflows.
pub fn calculate_flat_rate_tax<'a>(
    price: Money<'a, Currency>,
    rate: Percentage,
    prices_entered_with_tax: bool,
) -> Result<TaxedMoney<'a>, TaxError> {
    let currency = price.currency();
    let factor = Decimal::ONE
        .checked_add(fraction(rate))
        .ok_or(TaxError::Overflow)?;

    let taxed = if prices_entered_with_tax {
        let net = price.amount().checked_div(factor).ok_or(TaxError::Overflow)?;

        TaxedMoney {
            net: money(net, currency),
            gross: price,
        }
    } else {
        let gross = price.amount().checked_mul(factor).ok_or(TaxError::Overflow)?;

        TaxedMoney {
            net: price,
            gross: money(gross, currency),
        }
    };

    Ok(taxed.quantize())
}

/// Tax rate of a taxed price, `tax / net`, rounded to 4 places.
///
/// # Errors
///
/// Returns [`TaxError::Overflow`] if `gross - net` overflows.
pub fn tax_rate_of(price: &TaxedMoney<'_>) -> Result<Percentage, TaxError> {
    let net = *price.net.amount();
    let gross = *price.gross.amount();

    if net.is_zero() {
        return Ok(percent(Decimal::ZERO));
    }

    let tax = gross.checked_sub(net).ok_or(TaxError::Overflow)?;
    let rate = tax.checked_div(net).ok_or(TaxError::Overflow)?;

    Ok(Percentage::from(rate.round_dp(4)))
}

#[cfg(test)]
mod tests {
    use rusty_money::iso::{JPY, USD};
    use testresult::TestResult;

    use super::*;

    #[test]
    fn adds_tax_to_net_prices() -> TestResult {
        let taxed = calculate_flat_rate_tax(Money::from_minor(1000, USD), percent(Decimal::from(23)), false)?;

        assert_eq!(taxed.net, Money::from_minor(1000, USD));
        assert_eq!(taxed.gross, Money::from_minor(1230, USD));

        Ok(())
    }

    #[test]
    fn extracts_tax_from_gross_prices() -> TestResult {
        let taxed = calculate_flat_rate_tax(Money::from_minor(1230, USD), percent(Decimal::from(23)), true)?;

        assert_eq!(taxed.net, Money::from_minor(1000, USD));
        assert_eq!(taxed.gross, Money::from_minor(1230, USD));

        Ok(())
    }

    #[test]
    fn rounds_to_currency_precision() -> TestResult {
        let taxed = calculate_flat_rate_tax(Money::from_minor(999, JPY), percent(Decimal::from(8)), false)?;

        // 999 * 1.08 = 1078.92
        assert_eq!(taxed.gross, Money::from_minor(1079, JPY));

        Ok(())
    }

    #[test]
    fn derives_rate_from_taxed_price() -> TestResult {
        let price = TaxedMoney::new(Money::from_minor(1000, USD), Money::from_minor(1230, USD))?;

        assert_eq!(fraction(tax_rate_of(&price)?), Decimal::new(23, 2));
        assert_eq!(fraction(tax_rate_of(&TaxedMoney::zero(USD))?), Decimal::ZERO);

        Ok(())
    }

    #[test]
    fn tax_rate_of_overflowing_prices_is_an_error() -> TestResult {
        let price = TaxedMoney::new(
            Money::from_decimal(Decimal::MIN, USD),
            Money::from_decimal(Decimal::MAX, USD),
        )?;

        assert!(matches!(tax_rate_of(&price), Err(TaxError::Overflow)));

        Ok(())
    }
}
