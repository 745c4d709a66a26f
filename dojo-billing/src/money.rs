//! Currency-safe monetary values.
//!
//! All amounts are integer minor units (cents). Percentage math goes through
//! `rust_decimal` and is rounded half away from zero at each call site, so
//! rounding always happens at the line level and fractional cents never
//! accumulate across an invoice.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cad,
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Cad => "CAD",
            Currency::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CAD" => Ok(Currency::Cad),
            "USD" => Ok(Currency::Usd),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from monetary arithmetic.
///
/// `CurrencyMismatch` is a programmer error: business code never catches it,
/// it propagates straight up as an internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("monetary amount overflow")]
    Overflow,

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),
}

/// An exact monetary amount in integer minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    #[serde(rename = "amount")]
    minor: i64,
    currency: Currency,
}

impl Money {
    pub const fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    pub const fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Build from a major-unit decimal (e.g. `120.00`), exact to the cent.
    pub fn from_major(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        let minor = (amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(MoneyError::Overflow)?;
        Ok(Self { minor, currency })
    }

    pub const fn minor_units(&self) -> i64 {
        self.minor
    }

    pub const fn currency(&self) -> Currency {
        self.currency
    }

    pub const fn is_zero(&self) -> bool {
        self.minor == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.minor > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.minor < 0
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn try_add(&self, other: Money) -> Result<Money, MoneyError> {
        self.require_same_currency(&other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    pub fn try_sub(&self, other: Money) -> Result<Money, MoneyError> {
        self.require_same_currency(&other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Exact scaling by an integer quantity.
    pub fn times(&self, quantity: i64) -> Result<Money, MoneyError> {
        let minor = self
            .minor
            .checked_mul(quantity)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Multiply by a fractional rate (e.g. `0.13` for 13% tax), rounding the
    /// result half away from zero to the nearest minor unit.
    pub fn apply_rate(&self, rate: Decimal) -> Result<Money, MoneyError> {
        let scaled = Decimal::from(self.minor) * rate;
        let minor = scaled
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Multiply by a percentage (e.g. `10` for 10%), rounding as `apply_rate`.
    pub fn apply_percent(&self, percent: Decimal) -> Result<Money, MoneyError> {
        self.apply_rate(percent / Decimal::ONE_HUNDRED)
    }

    /// Divide by a positive integer, rounding half away from zero.
    ///
    /// The result carries rounding loss; use [`Money::split_even`] when the
    /// parts must sum back to the original exactly.
    pub fn divide(&self, divisor: i64) -> Result<Money, MoneyError> {
        if divisor <= 0 {
            return Err(MoneyError::Overflow);
        }
        let quotient = Decimal::from(self.minor) / Decimal::from(divisor);
        let minor = quotient
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Split into `parts` amounts that sum back to the original exactly.
    ///
    /// Remainder minor units are distributed one each to the leading parts
    /// (largest-remainder allocation).
    pub fn split_even(&self, parts: usize) -> Result<Vec<Money>, MoneyError> {
        if parts == 0 {
            return Err(MoneyError::Overflow);
        }
        let parts_i = parts as i64;
        let base = self.minor.div_euclid(parts_i);
        let remainder = self.minor.rem_euclid(parts_i);
        let mut out = Vec::with_capacity(parts);
        for idx in 0..parts_i {
            let extra = if idx < remainder { 1 } else { 0 };
            out.push(Money::new(base + extra, self.currency));
        }
        Ok(out)
    }

    /// Same-currency comparison.
    pub fn cmp_value(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.require_same_currency(other)?;
        Ok(self.minor.cmp(&other.minor))
    }

    /// The smaller of two same-currency amounts.
    pub fn min_value(&self, other: Money) -> Result<Money, MoneyError> {
        Ok(match self.cmp_value(&other)? {
            Ordering::Greater => other,
            _ => *self,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.abs();
        write!(f, "{}${}.{:02} {}", sign, abs / 100, abs % 100, self.currency)
    }
}
