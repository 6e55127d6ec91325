//! Fixed-point decimal types for prices, quantities and balances
//!
//! Uses rust_decimal for deterministic base-10 arithmetic (no floating-point
//! errors). `Price` and `Quantity` carry at most [`SCALE`] fractional digits
//! and every value is bounded by [`MAX_VALUE`]. At [`AMOUNT_SCALE`] digits a
//! 96-bit mantissa holds values up to about 7.9e12, so a notional within
//! the bound and the sum of two bounded amounts are always exact. Products
//! and sums that would leave the bound are refused instead of rounded. The
//! only rounding site is division, which rounds half-even.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Maximum fractional digits of a price or quantity.
pub const SCALE: u32 = 8;

/// Maximum fractional digits of an amount (price × quantity).
pub const AMOUNT_SCALE: u32 = SCALE * 2;

/// Largest price, quantity, amount or per-asset supply (10^12).
pub const MAX_VALUE: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Rejection reasons for values arriving at the boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("not a decimal number: {0}")]
    Parse(String),

    #[error("value must not be negative: {0}")]
    Negative(String),

    #[error("too many fractional digits in {value} (max {max})")]
    TooPrecise { value: String, max: u32 },

    #[error("value {0} exceeds the maximum of 10^12")]
    TooLarge(String),
}

fn check(value: Decimal, max_scale: u32) -> Result<Decimal, NumericError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(NumericError::Negative(value.to_string()));
    }
    if value > MAX_VALUE {
        return Err(NumericError::TooLarge(value.to_string()));
    }
    let normalized = value.normalize();
    if normalized.scale() > max_scale {
        return Err(NumericError::TooPrecise {
            value: value.to_string(),
            max: max_scale,
        });
    }
    Ok(normalized)
}

macro_rules! fixed_point {
    ($name:ident, $max_scale:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "Decimal", into = "Decimal")]
        pub struct $name(Decimal);

        impl TryFrom<Decimal> for $name {
            type Error = NumericError;

            fn try_from(value: Decimal) -> Result<Self, Self::Error> {
                Self::try_new(value)
            }
        }

        /// Serialized form is always normalized so equal values hash equally.
        impl From<$name> for Decimal {
            fn from(value: $name) -> Decimal {
                value.0.normalize()
            }
        }

        impl $name {
            /// Validate and wrap a raw decimal.
            pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
                check(value, $max_scale).map(Self)
            }

            pub fn zero() -> Self {
                Self(Decimal::ZERO)
            }

            /// # Panics
            /// Panics if `value` exceeds [`MAX_VALUE`]
            pub fn from_u64(value: u64) -> Self {
                let value = Decimal::from(value);
                assert!(value <= MAX_VALUE, "{} exceeds the maximum value", value);
                Self(value)
            }

            pub fn as_decimal(&self) -> Decimal {
                self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            pub fn is_positive(&self) -> bool {
                self.0 > Decimal::ZERO
            }

            /// Addition that refuses to leave [`MAX_VALUE`]; exact whenever it
            /// succeeds.
            pub fn checked_add(self, other: Self) -> Option<Self> {
                let sum = self.0.checked_add(other.0)?;
                (sum <= MAX_VALUE).then_some(Self(sum))
            }

            /// Subtraction that refuses to go below zero.
            pub fn checked_sub(self, other: Self) -> Option<Self> {
                if other.0 > self.0 {
                    None
                } else {
                    Some(Self(self.0 - other.0))
                }
            }

            /// Subtraction clamped at zero.
            pub fn saturating_sub(self, other: Self) -> Self {
                self.checked_sub(other).unwrap_or_else(Self::zero)
            }
        }

        impl FromStr for $name {
            type Err = NumericError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value =
                    Decimal::from_str(s.trim()).map_err(|_| NumericError::Parse(s.to_string()))?;
                Self::try_new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.normalize())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::zero()
            }
        }

        /// Unchecked; for aggregates such as level totals. Balances go
        /// through `checked_add`.
        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        /// Callers compare first; use `checked_sub` where the order is unknown.
        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }
    };
}

fixed_point!(Price, SCALE);
fixed_point!(Quantity, SCALE);
fixed_point!(Amount, AMOUNT_SCALE);

impl Price {
    /// Exact notional value of `quantity` at this price
    ///
    /// `None` when the product exceeds [`MAX_VALUE`]. Below the bound the
    /// product keeps all [`AMOUNT_SCALE`] digits, so it is never rounded.
    pub fn notional(&self, quantity: Quantity) -> Option<Amount> {
        let product = self.0.checked_mul(quantity.0)?;
        (product <= MAX_VALUE).then_some(Amount(product))
    }

    /// Volume-weighted average price, rounded half-even to [`SCALE`].
    ///
    /// Returns `None` for a zero quantity.
    pub fn average(total: Amount, quantity: Quantity) -> Option<Price> {
        if quantity.is_zero() {
            return None;
        }
        let raw = total.0 / quantity.0;
        Some(Price(
            raw.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven)
                .normalize(),
        ))
    }
}

impl From<Quantity> for Amount {
    /// Base-asset quantities are reserved and settled as amounts.
    fn from(quantity: Quantity) -> Self {
        Amount(quantity.0)
    }
}
