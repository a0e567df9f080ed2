use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, iter::Sum, str::FromStr};
use thiserror::Error;

/// Decimal places written to worksheets. The broker reports cash to 4 places.
pub(crate) const FIAT_DIGITS: u32 = 4;

/// Since we can't ensure that all arithmetic has infinite precision, we need an epsilon for
/// comparisons. This seems like a good enough number that is smaller than any cash precision used.
const FIAT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 7);

#[derive(Debug, Error)]
pub enum ConvertAmountError {
    /// Unable to parse decimal string.
    #[error("Unable to parse decimal string `{0}`")]
    Decimal(String, #[source] rust_decimal::Error),
}

/// Cash amounts in US Dollars, the account currency.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct UsdAmount(Decimal);

/// Cash amounts in Euros, the reporting currency.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct EurAmount(Decimal);

macro_rules! impl_math_ops {
    ($name:ident) => {
        impl ::std::ops::Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl ::std::ops::AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl ::std::ops::Neg for $name {
            type Output = Self;

            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl ::std::ops::Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl ::std::ops::SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|amount| amount.0).sum())
            }
        }

        impl From<Decimal> for $name {
            fn from(value: Decimal) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = ConvertAmountError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Thousands separators appear in some exports.
                let cleaned = s.trim().replace(',', "");

                Decimal::from_str(&cleaned)
                    .map(Self)
                    .map_err(|err| ConvertAmountError::Decimal(s.to_string(), err))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // We use "banker's rounding" when writing the CSV. The `Decimal` type supports
                // alternative rounding strategies, if we want to change it.
                //
                // SEE: https://docs.rs/rust_decimal/latest/rust_decimal/prelude/enum.RoundingStrategy.html
                let amount = self.0.round_dp(FIAT_DIGITS);

                write!(f, "{amount:.precision$}", precision = FIAT_DIGITS as usize)
            }
        }

        impl $name {
            pub const ZERO: Self = Self(Decimal::ZERO);

            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            pub fn to_decimal(self) -> Decimal {
                self.0
            }

            /// Get the absolute value.
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            pub fn is_zero(self) -> bool {
                self.0.is_zero()
            }

            pub fn is_positive(self) -> bool {
                self.0 > Decimal::ZERO
            }

            pub fn is_negative(self) -> bool {
                self.0 < Decimal::ZERO
            }

            /// Multiply by a unitless factor, e.g. a quantity or a proportion.
            pub fn scale(self, factor: Decimal) -> Self {
                Self(self.0 * factor)
            }

            /// Divide by a unitless factor. Division by zero yields zero.
            pub fn per(self, divisor: Decimal) -> Self {
                if divisor.is_zero() {
                    Self::ZERO
                } else {
                    Self(self.0 / divisor)
                }
            }

            /// Round to the worksheet precision.
            pub fn round(self) -> Self {
                Self(self.0.round_dp(FIAT_DIGITS))
            }

            pub fn is_fuzzy_eq(self, other: Self) -> bool {
                (self.0 - other.0).abs() < FIAT_EPSILON
            }

            /// Compare with a caller-provided tolerance.
            pub fn is_within(self, other: Self, tolerance: Decimal) -> bool {
                (self.0 - other.0).abs() <= tolerance
            }
        }
    };
}

impl_math_ops!(UsdAmount);
impl_math_ops!(EurAmount);
