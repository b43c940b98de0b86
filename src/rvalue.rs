//! # Rational values
//!
//! `RValue` is the exchange format between the outside world and the
//! engines: an arbitrary-precision integer scaled by a power of two.
//!
//! ```text
//! value = mantissa × 2^exponent
//! ```
//!
//! The `precision` field records how many significant bits the producer
//! cares about. It is carried along but never used to round.

use std::cmp::Ordering;
use std::ops::Neg;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RValue {
    pub value: BigInt,
    pub exponent: i32,
    pub precision: u32,
}

/// A point of the complex plane, real part in `x`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RPoint {
    pub x: RValue,
    pub y: RValue,
}

impl RValue {
    pub fn new(value: impl Into<BigInt>, exponent: i32, precision: u32) -> Self {
        Self {
            value: value.into(),
            exponent,
            precision,
        }
    }

    pub fn zero(precision: u32) -> Self {
        Self::new(0, 0, precision)
    }

    /// Creates an exact `RValue` from an IEEE 754 double.
    ///
    /// # Arguments
    ///
    /// * `value` - The f64 to convert, must be finite
    /// * `precision` - Precision recorded on the result
    ///
    /// # Returns
    ///
    /// `None` for NaN and infinities, otherwise the exact value reduced so the
    /// mantissa is odd (or zero).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mset_apfixed::RValue;
    ///
    /// let r = RValue::from_f64(-0.75, 64).unwrap();
    /// assert_eq!(r.value, (-3).into());
    /// assert_eq!(r.exponent, -2);
    /// ```
    pub fn from_f64(value: f64, precision: u32) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }

        let bits = value.to_bits();
        let negative = bits >> 63 == 1;
        let biased_exponent = ((bits >> 52) & 0x7ff) as i32;
        let fraction = bits & ((1 << 52) - 1);

        let (mantissa, exponent) = if biased_exponent == 0 {
            (fraction, -1074)
        } else {
            (fraction | (1 << 52), biased_exponent - 1075)
        };

        let sign = if negative { Sign::Minus } else { Sign::Plus };
        let value = BigInt::from_biguint(sign, mantissa.into());
        Some(Self::new(value, exponent, precision).reduce())
    }

    /// Nearest f64, losing precision beyond 53 significant bits.
    pub fn to_f64(&self) -> f64 {
        let bits = self.value.bits();
        let (mantissa, exponent) = if bits > 64 {
            let shift = bits - 64;
            (&self.value >> shift, self.exponent + shift as i32)
        } else {
            (self.value.clone(), self.exponent)
        };

        let mut result = mantissa.to_f64().unwrap_or(f64::NAN);
        let mut exponent = exponent;
        // Scale in steps so intermediate powers of two stay finite and normal.
        while exponent > 1000 {
            result *= 2f64.powi(1000);
            exponent -= 1000;
        }
        while exponent < -1000 {
            result *= 2f64.powi(-1000);
            exponent += 1000;
        }
        result * 2f64.powi(exponent)
    }

    /// Strips trailing zero bits from the mantissa, raising the exponent.
    pub fn reduce(self) -> Self {
        match self.value.trailing_zeros() {
            Some(zeros) if zeros > 0 => Self {
                value: self.value >> zeros,
                exponent: self.exponent + zeros as i32,
                precision: self.precision,
            },
            Some(_) => self,
            None => Self::new(0, 0, self.precision),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_negative()
    }

    pub fn abs(&self) -> Self {
        Self {
            value: self.value.abs(),
            exponent: self.exponent,
            precision: self.precision,
        }
    }

    /// Both mantissas rescaled to the smaller of the two exponents.
    fn aligned(&self, other: &Self) -> (BigInt, BigInt) {
        match self.exponent.cmp(&other.exponent) {
            Ordering::Equal => (self.value.clone(), other.value.clone()),
            Ordering::Greater => {
                let shift = (self.exponent - other.exponent) as u32;
                (&self.value << shift, other.value.clone())
            }
            Ordering::Less => {
                let shift = (other.exponent - self.exponent) as u32;
                (self.value.clone(), &other.value << shift)
            }
        }
    }
}

impl Neg for RValue {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self {
            value: -self.value,
            exponent: self.exponent,
            precision: self.precision,
        }
    }
}

/// Equality by value: `3 × 2^-1 == 6 × 2^-2`. Precision is ignored.
impl PartialEq for RValue {
    fn eq(&self, other: &Self) -> bool {
        let (left, right) = self.aligned(other);
        left == right
    }
}

impl PartialOrd for RValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (left, right) = self.aligned(other);
        Some(left.cmp(&right))
    }
}

impl RPoint {
    pub fn new(x: RValue, y: RValue) -> Self {
        Self { x, y }
    }
}
