//! # Limb codec
//!
//! Stateless conversions and kernels over partial-word limb arrays.
//!
//! A limb array is a `[u64]`, least significant limb first, where every cell
//! carries `bits_per_limb` bits of payload (31 or 32) and leaves the upper
//! half free for carries. The engines in [`crate::scalar`] and
//! [`crate::vector`] never twiddle bits themselves, they call into here.
//!
//! ## Multiplication pipeline
//!
//! ```text
//! a, b (n limbs) --partials--> 2n bins --sum_the_partials--> 2n limbs
//!               --shift_and_trim--> n limbs
//! ```
//!
//! Every 64-bit partial product is split into its low and high 32 bits
//! before it is accumulated, so a bin never holds more than
//! `2n × 2^33` and cannot wrap.

use std::cmp::Ordering;

use num_bigint::BigUint;
use num_traits::Zero;

use crate::error::{FixedPointError, Result};
use crate::format::{BITS_PER_LIMB, LOW_MASK, TEST_BIT_32};

pub mod twos_complement;

pub use twos_complement::{
    add_twos_complement, convert_from_twos_complement, convert_to_twos_complement,
    is_most_negative, is_negative_twos_complement, negate_twos_complement,
    validate_twos_complement,
};

/// Splits a 64-bit product into `(hi, lo)` 32-bit halves.
#[inline]
pub fn split(value: u64) -> (u64, u64) {
    (value >> BITS_PER_LIMB, value & LOW_MASK)
}

fn limb_mask(bits_per_limb: u32) -> u64 {
    (1u64 << bits_per_limb) - 1
}

/// Splits `value` into `bits_per_limb`-bit limbs, least significant first.
///
/// Zero produces an empty array; use [`to_limbs_padded`] for a fixed width.
///
/// # Examples
///
/// ```rust
/// use num_bigint::BigUint;
/// use mset_apfixed::limbs::{from_limbs, to_limbs};
///
/// let value = BigUint::from(0x1_0000_0002u64);
/// assert_eq!(to_limbs(&value, 32), vec![2, 1]);
/// assert_eq!(from_limbs(&[2, 1], 32), value);
/// ```
pub fn to_limbs(value: &BigUint, bits_per_limb: u32) -> Vec<u64> {
    let mask = BigUint::from(limb_mask(bits_per_limb));
    let mut remaining = value.clone();
    let mut limbs = Vec::new();

    while !remaining.is_zero() {
        let limb = (&remaining & &mask).iter_u64_digits().next().unwrap_or(0);
        limbs.push(limb);
        remaining >>= bits_per_limb;
    }

    limbs
}

/// Like [`to_limbs`] but zero-extended to exactly `limb_count` limbs.
///
/// Returns `None` when the value needs more limbs than that.
pub fn to_limbs_padded(value: &BigUint, limb_count: usize, bits_per_limb: u32) -> Option<Vec<u64>> {
    let mut limbs = to_limbs(value, bits_per_limb);
    if limbs.len() > limb_count {
        return None;
    }
    limbs.resize(limb_count, 0);
    Some(limbs)
}

/// Packs limbs back into an integer, most significant limb first.
///
/// Only the payload bits of each cell are used.
pub fn from_limbs(limbs: &[u64], bits_per_limb: u32) -> BigUint {
    let mask = limb_mask(bits_per_limb);
    limbs.iter().rev().fold(BigUint::zero(), |acc, &limb| {
        (acc << bits_per_limb) + (limb & mask)
    })
}

pub fn is_zero(limbs: &[u64]) -> bool {
    limbs.iter().all(|&limb| limb == 0)
}

/// The array without its zero most significant limbs.
pub fn trim_leading_zeros(limbs: &[u64]) -> &[u64] {
    let used = limbs.iter().rposition(|&limb| limb != 0).map_or(0, |i| i + 1);
    &limbs[..used]
}

/// Number of zero limbs at the least significant end.
pub fn count_trailing_zero_limbs(limbs: &[u64]) -> usize {
    limbs.iter().take_while(|&&limb| limb == 0).count()
}

pub fn check_limb_count(limbs: &[u64], expected: usize) -> Result<()> {
    if limbs.len() != expected {
        return Err(FixedPointError::LengthMismatch {
            left: limbs.len(),
            right: expected,
        });
    }
    Ok(())
}

fn check_same_length(left: &[u64], right: &[u64]) -> Result<()> {
    check_limb_count(right, left.len()).map_err(|_| FixedPointError::LengthMismatch {
        left: left.len(),
        right: right.len(),
    })
}

/// Fails if any cell carries bits above the payload.
pub fn validate_partial_words(limbs: &[u64], bits_per_limb: u32) -> Result<()> {
    let mask = limb_mask(bits_per_limb);
    match limbs.iter().position(|&limb| limb & !mask != 0) {
        Some(index) => Err(FixedPointError::InvalidLimb {
            index,
            value: limbs[index],
            bits_per_limb,
        }),
        None => Ok(()),
    }
}

/// Compares two magnitudes, most significant limb first.
pub fn compare_magnitudes(left: &[u64], right: &[u64]) -> Result<Ordering> {
    check_same_length(left, right)?;
    let ordering = left
        .iter()
        .rev()
        .zip(right.iter().rev())
        .map(|(l, r)| l.cmp(r))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal);
    Ok(ordering)
}

/// Adds two magnitudes limb by limb.
///
/// # Returns
///
/// The sum and the carry out of the most significant limb. The carry is not
/// folded into a new limb, the caller decides how to treat it.
pub fn add_magnitudes(left: &[u64], right: &[u64]) -> Result<(Vec<u64>, u64)> {
    check_same_length(left, right)?;

    let mut carry = 0;
    let sum = left
        .iter()
        .zip(right)
        .map(|(l, r)| {
            let (hi, lo) = split(l + r + carry);
            carry = hi;
            lo
        })
        .collect();

    Ok((sum, carry))
}

/// Subtracts `right` from `left`, which must be the larger magnitude.
///
/// Borrows are detected by setting a test bit above the payload before
/// subtracting: the test bit survives exactly when no borrow was needed.
pub fn sub_magnitudes(left: &[u64], right: &[u64]) -> Result<Vec<u64>> {
    check_same_length(left, right)?;
    debug_assert!(
        compare_magnitudes(left, right).is_ok_and(Ordering::is_ge),
        "sub_magnitudes requires left >= right"
    );

    let mut borrow = 0;
    let difference = left
        .iter()
        .zip(right)
        .map(|(l, r)| {
            let diff = (l | TEST_BIT_32) - r - borrow;
            borrow = u64::from(diff & TEST_BIT_32 == 0);
            diff & LOW_MASK
        })
        .collect();

    debug_assert_eq!(borrow, 0, "borrow out of the most significant limb");
    Ok(difference)
}

/// Schoolbook multiplication into `2n` unnormalized bins.
pub fn multiply_partials(left: &[u64], right: &[u64]) -> Result<Vec<u64>> {
    check_same_length(left, right)?;

    let mut bins = vec![0; left.len() * 2];
    for (j, &a) in left.iter().enumerate() {
        for (i, &b) in right.iter().enumerate() {
            let (hi, lo) = split(a * b);
            bins[j + i] += lo;
            bins[j + i + 1] += hi;
        }
    }

    Ok(bins)
}

/// Squares using the upper triangle of the partial-product matrix only.
///
/// Off-diagonal products appear twice in the full matrix, so their halves are
/// doubled after the split.
pub fn square_partials(limbs: &[u64]) -> Vec<u64> {
    let mut bins = vec![0; limbs.len() * 2];
    for (j, &a) in limbs.iter().enumerate() {
        for (i, &b) in limbs.iter().enumerate().skip(j) {
            let (mut hi, mut lo) = split(a * b);
            if i > j {
                hi <<= 1;
                lo <<= 1;
            }
            bins[j + i] += lo;
            bins[j + i + 1] += hi;
        }
    }
    bins
}

/// Propagates carries through the bins in place.
///
/// # Returns
///
/// The carry out of the most significant bin, non-zero only when the bins
/// held more than `2n` limbs' worth of value.
pub fn sum_the_partials(bins: &mut [u64]) -> u64 {
    let mut carry = 0;
    for bin in bins.iter_mut() {
        let (hi, lo) = split(*bin + carry);
        *bin = lo;
        carry = hi;
    }
    carry
}

/// Normalizes a double-width product back to the format.
///
/// Result limb `i` is the 32-bit window starting `bits_before_bp` bits below
/// limb `n + i` of the product. Bits above the top window belong to an
/// integer part the format cannot hold.
pub fn shift_and_trim(summed: &[u64], bits_before_bp: u8) -> Result<Vec<u64>> {
    debug_assert!(summed.len() % 2 == 0 && !summed.is_empty());
    let limb_count = summed.len() / 2;
    let shift = BITS_PER_LIMB - u32::from(bits_before_bp);

    if summed[summed.len() - 1] >> shift != 0 {
        return Err(FixedPointError::MultiplyOverflow);
    }

    let result = (0..limb_count)
        .map(|i| {
            let window = (summed[limb_count + i] << BITS_PER_LIMB) | summed[limb_count + i - 1];
            (window >> shift) & LOW_MASK
        })
        .collect();

    Ok(result)
}

/// Multiplies a magnitude by a single-limb factor.
///
/// # Returns
///
/// The product and the carry out of the most significant limb.
pub fn multiply_by_small(limbs: &[u64], factor: u64) -> (Vec<u64>, u64) {
    debug_assert!(factor <= LOW_MASK);
    let mut carry = 0;
    let product = limbs
        .iter()
        .map(|&limb| {
            let (hi, lo) = split(limb * factor + carry);
            carry = hi;
            lo
        })
        .collect();
    (product, carry)
}

/// Limbs whose integer part is `integer` and whose fraction is zero.
pub fn integer_limbs(integer: u64, limb_count: usize, bits_before_bp: u8) -> Vec<u64> {
    let mut limbs = vec![0; limb_count];
    if let Some(msl) = limbs.last_mut() {
        *msl = (integer << (BITS_PER_LIMB - u32::from(bits_before_bp))) & LOW_MASK;
    }
    limbs
}
