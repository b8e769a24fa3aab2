//! Type-safe price representation using decimal arithmetic.
//!
//! Adam Store sells in a single currency (Vietnamese dong), so a price is a
//! plain decimal amount. Arithmetic never goes through floating point and
//! saturates at the decimal bounds instead of panicking.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error parsing a price from text.
#[derive(Debug, Error)]
#[error("invalid price: {0}")]
pub struct PriceParseError(#[from] rust_decimal::Error);

/// A monetary amount in VND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero dong.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create a price from a whole number of dong.
    #[must_use]
    pub fn from_dong(amount: i64) -> Self {
        Self(Decimal::from(amount))
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Unit price multiplied by a quantity.
    #[must_use]
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(Decimal::from(quantity)))
    }

    /// The given percentage of this amount.
    ///
    /// The percentage is clamped to `0..=100`.
    #[must_use]
    pub fn percent(self, percent: Decimal) -> Self {
        let percent = percent.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
        Self(self.0.saturating_mul(percent) / Decimal::ONE_HUNDRED)
    }

    /// Format for display, e.g. `1.250.000 ₫`.
    #[must_use]
    pub fn display(&self) -> String {
        let rounded = self
            .0
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let digits = rounded.abs().trunc().to_string();

        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }

        if rounded.is_sign_negative() && !rounded.is_zero() {
            format!("-{grouped} ₫")
        } else {
            format!("{grouped} ₫")
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl FromStr for Price {
    type Err = PriceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Decimal::from_str(s.trim())?))
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Price {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_quantity() {
        assert_eq!(Price::from_dong(250_000).times(3), Price::from_dong(750_000));
        assert_eq!(Price::from_dong(250_000).times(0), Price::ZERO);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let max = Price::new(Decimal::MAX);
        assert_eq!(max.times(2), max);
        assert_eq!(max + Price::from_dong(1), max);
        assert_eq!(Price::new(Decimal::MIN) - Price::from_dong(1), Price::new(Decimal::MIN));

        let mut total = max;
        total += max;
        assert_eq!(total, max);
        assert_eq!([max, max].into_iter().sum::<Price>(), max);
    }

    #[test]
    fn test_percent() {
        let subtotal = Price::from_dong(1_000_000);
        assert_eq!(subtotal.percent(Decimal::from(10)), Price::from_dong(100_000));
        assert_eq!(subtotal.percent(Decimal::new(125, 1)), Price::from_dong(125_000));
    }

    #[test]
    fn test_percent_is_clamped() {
        let subtotal = Price::from_dong(500_000);
        assert_eq!(subtotal.percent(Decimal::from(150)), subtotal);
        assert_eq!(subtotal.percent(Decimal::from(-5)), Price::ZERO);
    }

    #[test]
    fn test_sum() {
        let total: Price = [100, 200, 300].into_iter().map(Price::from_dong).sum();
        assert_eq!(total, Price::from_dong(600));
    }

    #[test]
    fn test_display_groups_thousands() {
        assert_eq!(Price::from_dong(1_250_000).display(), "1.250.000 ₫");
        assert_eq!(Price::from_dong(999).display(), "999 ₫");
        assert_eq!(Price::ZERO.display(), "0 ₫");
        assert_eq!(Price::from_dong(-30_000).display(), "-30.000 ₫");
        assert_eq!(Price::new(Decimal::new(15_005, 1)).display(), "1.501 ₫");
    }

    #[test]
    fn test_parse() {
        let price: Result<Price, _> = "199000.50".parse();
        assert_eq!(price.ok(), Some(Price::new(Decimal::new(19_900_050, 2))));
        assert!("not a price".parse::<Price>().is_err());
    }

    #[test]
    fn test_deserializes_from_number_or_string() {
        let from_number: Result<Price, _> = serde_json::from_str("250000");
        let from_string: Result<Price, _> = serde_json::from_str("\"250000\"");
        assert_eq!(from_number.ok(), Some(Price::from_dong(250_000)));
        assert_eq!(from_string.ok(), Some(Price::from_dong(250_000)));
    }
}
