//! Two's complement limb arrays.
//!
//! Lower limbs hold 32 payload bits with a zero upper half. The most
//! significant limb holds the top 32 bits of the number sign-extended to 64,
//! so it can be read as an `i64` in the range of an `i32`.

use crate::error::{FixedPointError, Result};
use crate::format::{HIGH_MASK, LOW_MASK, SIGN_BIT_32};
use crate::limbs::split;

/// Sign-extends the low 32 bits of a most significant limb.
#[inline]
pub fn sign_extend(msl: u64) -> u64 {
    if msl & SIGN_BIT_32 != 0 {
        msl | HIGH_MASK
    } else {
        msl & LOW_MASK
    }
}

pub fn is_negative_twos_complement(limbs: &[u64]) -> bool {
    limbs.last().is_some_and(|msl| msl & SIGN_BIT_32 != 0)
}

/// The one negative value whose magnitude does not fit: sign bit alone.
pub fn is_most_negative(limbs: &[u64]) -> bool {
    match limbs.split_last() {
        Some((&msl, rest)) => msl & LOW_MASK == SIGN_BIT_32 && rest.iter().all(|&limb| limb == 0),
        None => false,
    }
}

/// Converts a magnitude and sign into two's complement form.
///
/// The bits up to and including the lowest set bit are kept, every bit above
/// it is flipped and the result is sign-extended.
///
/// # Errors
///
/// [`FixedPointError::TwosComplementOverflow`] when the magnitude already
/// uses the sign bit, or when the converted value does not come out negative.
pub fn convert_to_twos_complement(limbs: &[u64], sign: bool) -> Result<Vec<u64>> {
    if is_negative_twos_complement(limbs) {
        return Err(FixedPointError::TwosComplementOverflow);
    }
    if sign {
        return Ok(limbs.to_vec());
    }

    let mut found_lowest = false;
    let mut result: Vec<u64> = limbs
        .iter()
        .map(|&limb| {
            if found_lowest {
                !limb & LOW_MASK
            } else if limb == 0 {
                0
            } else {
                found_lowest = true;
                let lowest = limb & limb.wrapping_neg();
                let kept = lowest | (lowest - 1);
                (limb ^ !kept) & LOW_MASK
            }
        })
        .collect();

    if !found_lowest {
        return Ok(result);
    }

    if let Some(msl) = result.last_mut() {
        if *msl & SIGN_BIT_32 == 0 {
            return Err(FixedPointError::TwosComplementOverflow);
        }
        *msl = sign_extend(*msl);
    }
    Ok(result)
}

/// Recovers `(magnitude, sign)` from two's complement form.
///
/// `sign` is `true` for non-negative values.
pub fn convert_from_twos_complement(limbs: &[u64]) -> (Vec<u64>, bool) {
    if !is_negative_twos_complement(limbs) {
        let mut magnitude = limbs.to_vec();
        if let Some(msl) = magnitude.last_mut() {
            *msl &= LOW_MASK;
        }
        return (magnitude, true);
    }

    let mut magnitude = negate_twos_complement(limbs);
    if let Some(msl) = magnitude.last_mut() {
        *msl &= LOW_MASK;
    }
    (magnitude, false)
}

/// Flips every bit and adds one, keeping the most significant limb
/// sign-extended.
///
/// Negating the most negative value is not representable; callers keep it
/// out of their values.
pub fn negate_twos_complement(limbs: &[u64]) -> Vec<u64> {
    let Some((&msl, rest)) = limbs.split_last() else {
        return Vec::new();
    };

    let mut carry = 1;
    let mut result: Vec<u64> = rest
        .iter()
        .map(|&limb| {
            let (hi, lo) = split((!limb & LOW_MASK) + carry);
            carry = hi;
            lo
        })
        .collect();
    result.push((!sign_extend(msl)).wrapping_add(carry));
    result
}

/// Adds two values natively in two's complement.
///
/// # Returns
///
/// The sum and whether it overflowed the format, which includes landing on
/// the most negative value.
pub fn add_twos_complement(left: &[u64], right: &[u64]) -> Result<(Vec<u64>, bool)> {
    if left.len() != right.len() {
        return Err(FixedPointError::LengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    let (Some((&left_msl, left_rest)), Some((&right_msl, right_rest))) =
        (left.split_last(), right.split_last())
    else {
        return Ok((Vec::new(), false));
    };

    let mut carry = 0;
    let mut sum: Vec<u64> = left_rest
        .iter()
        .zip(right_rest)
        .map(|(l, r)| {
            let (hi, lo) = split(l + r + carry);
            carry = hi;
            lo
        })
        .collect();

    let msl = sign_extend(left_msl) as i64 + sign_extend(right_msl) as i64 + carry as i64;
    let out_of_range = msl > i64::from(i32::MAX) || msl < i64::from(i32::MIN);
    sum.push(msl as u64);

    let overflow = out_of_range || is_most_negative(&sum);
    Ok((sum, overflow))
}

/// Checks that lower limbs have zero upper halves and the most significant
/// limb is properly sign-extended.
pub fn validate_twos_complement(limbs: &[u64]) -> Result<()> {
    let Some((&msl, rest)) = limbs.split_last() else {
        return Ok(());
    };

    if let Some(index) = rest.iter().position(|&limb| limb & HIGH_MASK != 0) {
        return Err(FixedPointError::InvalidTwosComplement {
            index,
            value: rest[index],
        });
    }
    if sign_extend(msl) != msl {
        return Err(FixedPointError::InvalidTwosComplement {
            index: rest.len(),
            value: msl,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use num_bigint::{BigInt, Sign};
    use rand::Rng;
    use rstest::rstest;

    use super::*;
    use crate::limbs::from_limbs;
    use crate::tests::*;

    fn twos_complement_value(limbs: &[u64]) -> BigInt {
        let (magnitude, sign) = convert_from_twos_complement(limbs);
        let sign = if sign { Sign::Plus } else { Sign::Minus };
        BigInt::from_biguint(sign, from_limbs(&magnitude, 32))
    }

    #[rstest]
    #[case(vec![1], vec![u64::MAX])]
    #[case(vec![0, 1], vec![0, u64::MAX])]
    #[case(vec![1, 0], vec![LOW_MASK, u64::MAX])]
    #[case(vec![4, 0x1234], vec![0xFFFF_FFFC, !0x1234])]
    fn test_to_twos_complement(#[case] magnitude: Vec<u64>, #[case] expected: Vec<u64>) {
        let converted = convert_to_twos_complement(&magnitude, false).unwrap();
        assert_eq!(converted, expected);
        validate_twos_complement(&converted).unwrap();
        assert_eq!(negate_twos_complement(&magnitude), expected);
    }

    #[rstest]
    fn test_round_trip(mut rng: impl Rng, n_experiments: usize) {
        for _ in 0..n_experiments / 10 {
            let n = rng.random_range(1..5);
            let mut magnitude = random_limbs(&mut rng, n);
            magnitude[n - 1] &= LOW_MASK >> 1;
            let sign = rng.random_bool(0.5) || magnitude.iter().all(|&l| l == 0);

            let converted = convert_to_twos_complement(&magnitude, sign).unwrap();
            validate_twos_complement(&converted).unwrap();
            assert_eq!(convert_from_twos_complement(&converted), (magnitude, sign));
        }
    }

    #[rstest]
    fn test_conversion_rejects_sign_bit() {
        assert_eq!(
            convert_to_twos_complement(&[0, SIGN_BIT_32], true),
            Err(FixedPointError::TwosComplementOverflow)
        );
        assert_eq!(
            convert_to_twos_complement(&[5, SIGN_BIT_32 | 1], false),
            Err(FixedPointError::TwosComplementOverflow)
        );
    }

    #[rstest]
    fn test_negative_zero_is_zero() {
        assert_eq!(convert_to_twos_complement(&[0, 0], false).unwrap(), vec![0, 0]);
        assert_eq!(negate_twos_complement(&[0, 0]), vec![0, 0]);
    }

    #[rstest]
    fn test_add(mut rng: impl Rng, n_experiments: usize) {
        for _ in 0..n_experiments / 10 {
            let n = rng.random_range(1..4);
            let a = random_twos_complement(&mut rng, n);
            let b = random_twos_complement(&mut rng, n);

            let (sum, overflow) = add_twos_complement(&a, &b).unwrap();
            let expected = twos_complement_value(&a) + twos_complement_value(&b);
            let limit = BigInt::from(1) << (32 * n - 1);

            if expected >= limit || expected <= -limit {
                assert!(overflow, "{expected} should overflow");
            } else {
                assert!(!overflow);
                validate_twos_complement(&sum).unwrap();
                assert_eq!(twos_complement_value(&sum), expected);
            }
        }
    }

    #[rstest]
    fn test_add_most_negative_overflows() {
        let a = convert_to_twos_complement(&[0, 0x4000_0000], false).unwrap();
        let (sum, overflow) = add_twos_complement(&a, &a).unwrap();
        assert!(is_most_negative(&sum));
        assert!(overflow);
    }

    #[rstest]
    fn test_validate() {
        assert!(validate_twos_complement(&[LOW_MASK, u64::MAX]).is_ok());
        assert!(validate_twos_complement(&[LOW_MASK, 0x7FFF_FFFF]).is_ok());
        assert_eq!(
            validate_twos_complement(&[LOW_MASK, 0x8000_0000]),
            Err(FixedPointError::InvalidTwosComplement {
                index: 1,
                value: 0x8000_0000
            })
        );
        assert_eq!(
            validate_twos_complement(&[u64::MAX, 0]),
            Err(FixedPointError::InvalidTwosComplement {
                index: 0,
                value: u64::MAX
            })
        );
    }
}
