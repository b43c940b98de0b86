//! # Scalar engines
//!
//! One number at a time. Two representations share the contract below:
//!
//! - [`ScalarMath`] keeps a sign flag next to the magnitude.
//! - [`ScalarMath2C`] keeps the mantissa in two's complement so additions are
//!   native.
//!
//! Both truncate products toward zero and saturate additions, so for the same
//! logical inputs they produce the same values.
//!
//! ## Quick Start
//!
//! ```rust
//! use mset_apfixed::prelude::*;
//!
//! let format = FixedPointFormat::new(8, 56).unwrap();
//! let mut math = ScalarMath::new(format, 4).unwrap();
//!
//! let a = math.create_number(&RValue::from_f64(1.5, 64).unwrap()).unwrap();
//! let b = math.create_number(&RValue::from_f64(-2.0, 64).unwrap()).unwrap();
//! let product = math.multiply(&a, &b).unwrap();
//! assert_eq!(math.get_rvalue(&product).to_f64(), -3.0);
//! ```

use tracing::debug;

use crate::error::{FixedPointError, Result};
use crate::format::{BITS_PER_LIMB, FixedPointFormat, LOW_MASK, SIGN_BIT_32};
use crate::limbs;
use crate::number::Smx;
use crate::rvalue::RValue;
use crate::stats::ArithStats;

pub mod sign_magnitude;
pub mod twos_complement;

pub use sign_magnitude::ScalarMath;
pub use twos_complement::ScalarMath2C;

/// Arithmetic over scalar fixed-point numbers of one format.
pub trait ScalarEngine {
    type Number: Clone + std::fmt::Debug + PartialEq;

    fn format(&self) -> &FixedPointFormat;
    fn threshold(&self) -> u32;
    fn stats(&self) -> ArithStats;
    fn reset_stats(&mut self);

    fn zero(&self) -> Self::Number;
    fn max_integer_value(&self) -> Self::Number;
    fn create_number(&self, value: &RValue) -> Result<Self::Number>;
    fn get_rvalue(&self, value: &Self::Number) -> RValue;
    /// Re-encodes a sign-magnitude number of the same format.
    fn from_smx(&self, value: &Smx) -> Result<Self::Number>;

    fn multiply(&mut self, a: &Self::Number, b: &Self::Number) -> Result<Self::Number>;
    fn multiply_by_int(&mut self, a: &Self::Number, b: i64) -> Result<Self::Number>;
    fn square(&mut self, a: &Self::Number) -> Result<Self::Number>;
    fn add(&mut self, a: &Self::Number, b: &Self::Number) -> Result<Self::Number>;
    fn sub(&mut self, a: &Self::Number, b: &Self::Number) -> Result<Self::Number>;
    fn is_greater_or_eq_than_threshold(&mut self, a: &Self::Number) -> bool;

    fn is_zero(&self, a: &Self::Number) -> bool;
}

/// Most significant limb of `threshold` in the given format.
pub(crate) fn threshold_msl(format: &FixedPointFormat, threshold: u32) -> u64 {
    limbs::integer_limbs(u64::from(threshold), 1, format.bits_before_bp())[0]
}

pub(crate) fn check_threshold(threshold: u32, max_integer: u64) -> Result<()> {
    if u64::from(threshold) > max_integer {
        return Err(FixedPointError::ThresholdTooLarge {
            threshold,
            max_integer,
        });
    }
    Ok(())
}

/// Escape test on a non-negative value, looking only at its top limb.
pub(crate) fn msl_reaches_threshold(mantissa: &[u64], threshold_msl: u64) -> bool {
    mantissa.last().is_some_and(|msl| msl & LOW_MASK >= threshold_msl)
}

/// Aligns a rational value to the format and splits its magnitude into limbs.
///
/// Bits below the format's resolution are truncated.
pub(crate) fn create_magnitude(format: &FixedPointFormat, value: &RValue) -> Result<(Vec<u64>, bool)> {
    let shift = i64::from(value.exponent) - i64::from(format.target_exponent());
    let magnitude = value.value.magnitude();
    let aligned = if shift >= 0 {
        magnitude << shift as u64
    } else {
        magnitude >> shift.unsigned_abs()
    };

    let mantissa = limbs::to_limbs_padded(&aligned, format.limb_count(), BITS_PER_LIMB).ok_or(
        FixedPointError::ValueTooLarge {
            bits_before_bp: format.bits_before_bp(),
        },
    )?;
    Ok((mantissa, !value.is_negative()))
}

/// Full product of two magnitudes, normalized to the format.
pub(crate) fn multiply_magnitudes(
    stats: &mut ArithStats,
    format: &FixedPointFormat,
    a: &[u64],
    b: &[u64],
) -> Result<Vec<u64>> {
    let mut bins = limbs::multiply_partials(a, b)?;
    stats.splits += (a.len() * b.len()) as u64;
    normalize_product(stats, format, &mut bins)
}

/// Square of a magnitude, normalized to the format.
pub(crate) fn square_magnitude(
    stats: &mut ArithStats,
    format: &FixedPointFormat,
    a: &[u64],
) -> Result<Vec<u64>> {
    let mut bins = limbs::square_partials(a);
    stats.splits += (a.len() * (a.len() + 1) / 2) as u64;
    normalize_product(stats, format, &mut bins)
}

fn normalize_product(
    stats: &mut ArithStats,
    format: &FixedPointFormat,
    bins: &mut [u64],
) -> Result<Vec<u64>> {
    stats.carry_passes += 1;
    if limbs::sum_the_partials(bins) != 0 {
        stats.multiply_carries += 1;
        return Err(FixedPointError::MultiplyOverflow);
    }
    limbs::shift_and_trim(bins, format.bits_before_bp()).inspect_err(|_| {
        stats.multiply_carries += 1;
    })
}

/// In the signed format a product magnitude must leave the sign bit clear.
pub(crate) fn check_signed_magnitude(stats: &mut ArithStats, magnitude: Vec<u64>) -> Result<Vec<u64>> {
    if magnitude.last().is_some_and(|msl| msl & SIGN_BIT_32 != 0) {
        stats.multiply_carries += 1;
        return Err(FixedPointError::MultiplyOverflow);
    }
    Ok(magnitude)
}

/// Magnitude of `a × b` for a small integer `b`.
pub(crate) fn multiply_magnitude_by_int(
    stats: &mut ArithStats,
    format: &FixedPointFormat,
    a: &[u64],
    b: i64,
) -> Result<Vec<u64>> {
    let factor = b.unsigned_abs();
    let bits = u64::BITS - factor.leading_zeros();
    if bits > u32::from(format.bits_before_bp()) {
        return Err(FixedPointError::MultiplierTooLarge {
            multiplier: b,
            bits_before_bp: format.bits_before_bp(),
        });
    }

    let (product, carry) = limbs::multiply_by_small(a, factor);
    stats.splits += a.len() as u64;
    if carry != 0 {
        stats.multiply_carries += 1;
        return Err(FixedPointError::MultiplyOverflow);
    }
    Ok(product)
}

pub(crate) fn log_saturation(stats: &ArithStats) {
    debug!(add_carries = stats.add_carries, "addition saturated to max integer");
}
