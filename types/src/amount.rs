use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Cents per whole unit of the simulated currency.
pub const CENTS_PER_UNIT: u64 = 100;

/// Tolerance applied before flooring a scaled amount, so that products such as
/// `10.00 × 2.01` are not truncated to `20.09` by binary rounding.
const SCALE_EPSILON: f64 = 1e-6;

/// Non-negative currency amount with two-decimal precision, stored in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    /// Whole units, e.g. `Amount::units(20)` is `20.00`.
    pub const fn units(units: u64) -> Self {
        Self(units * CENTS_PER_UNIT)
    }

    /// Parse a decimal value, rounding to the nearest cent.
    ///
    /// Returns `None` for non-finite or negative input, or values that do not fit.
    pub fn from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let cents = (value * CENTS_PER_UNIT as f64).round();
        if cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    pub fn to_decimal(self) -> f64 {
        self.0 as f64 / CENTS_PER_UNIT as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Multiply by a non-negative factor, flooring to the cent.
    pub fn scale(self, factor: f64) -> Option<Amount> {
        if !factor.is_finite() || factor < 0.0 {
            return None;
        }
        let scaled = (self.0 as f64 * factor + SCALE_EPSILON).floor();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(Amount(scaled as u64))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / CENTS_PER_UNIT,
            self.0 % CENTS_PER_UNIT
        )
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Amount::from_decimal(value)
            .ok_or_else(|| de::Error::custom("expected a non-negative decimal amount"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_to_nearest_cent() {
        assert_eq!(Amount::from_decimal(20.0), Some(Amount::from_cents(2_000)));
        assert_eq!(Amount::from_decimal(0.1), Some(Amount::from_cents(10)));
        assert_eq!(Amount::from_decimal(12.345), Some(Amount::from_cents(1_235)));
        assert_eq!(Amount::from_decimal(-1.0), None);
        assert_eq!(Amount::from_decimal(f64::NAN), None);
        assert_eq!(Amount::from_decimal(f64::INFINITY), None);
    }

    #[test]
    fn scale_floors_without_binary_drift() {
        let stake = Amount::units(10);
        assert_eq!(stake.scale(2.5), Some(Amount::units(25)));
        assert_eq!(stake.scale(2.01), Some(Amount::from_cents(2_010)));
        assert_eq!(Amount::from_cents(333).scale(1.5), Some(Amount::from_cents(499)));
        assert_eq!(stake.scale(-1.0), None);
        assert_eq!(stake.scale(f64::NAN), None);
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Amount::from_cents(4_005).to_string(), "40.05");
        assert_eq!(Amount::ZERO.to_string(), "0.00");
    }

    #[test]
    fn json_uses_decimal_numbers() {
        let json = serde_json::to_string(&Amount::from_cents(1_250)).unwrap();
        assert_eq!(json, "12.5");
        let parsed: Amount = serde_json::from_str("80.25").unwrap();
        assert_eq!(parsed, Amount::from_cents(8_025));
        assert!(serde_json::from_str::<Amount>("-3").is_err());
    }
}
