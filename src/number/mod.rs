use std::fmt::Debug;

use num_bigint::{BigInt, Sign};

use crate::format::{BITS_PER_LIMB, FixedPointFormat};
use crate::limbs::{self, convert_from_twos_complement, is_negative_twos_complement};
use crate::rvalue::RValue;

/// A sign-magnitude fixed-point number.
///
/// `sign` is `true` for non-negative values; zero is always stored with a
/// positive sign so derived equality is equality by value.
#[derive(Clone, PartialEq, Eq)]
pub struct Smx {
    sign: bool,
    mantissa: Vec<u64>,
    exponent: i32,
    bits_before_bp: u8,
    precision: u32,
}

impl Smx {
    pub fn new(
        sign: bool,
        mantissa: Vec<u64>,
        exponent: i32,
        bits_before_bp: u8,
        precision: u32,
    ) -> Self {
        let sign = sign || limbs::is_zero(&mantissa);
        Self {
            sign,
            mantissa,
            exponent,
            bits_before_bp,
            precision,
        }
    }

    pub fn zero(format: &FixedPointFormat, precision: u32) -> Self {
        Self::new(
            true,
            vec![0; format.limb_count()],
            format.target_exponent(),
            format.bits_before_bp(),
            precision,
        )
    }

    pub fn is_zero(&self) -> bool {
        limbs::is_zero(&self.mantissa)
    }

    pub fn sign(&self) -> bool {
        self.sign
    }

    pub fn mantissa(&self) -> &[u64] {
        &self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn bits_before_bp(&self) -> u8 {
        self.bits_before_bp
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn limb_count(&self) -> usize {
        self.mantissa.len()
    }

    /// Same magnitude, opposite sign. Zero stays positive.
    pub fn negated(&self) -> Self {
        Self::new(
            !self.sign,
            self.mantissa.clone(),
            self.exponent,
            self.bits_before_bp,
            self.precision,
        )
    }

    /// Signed integer value of the mantissa, to be scaled by `2^exponent`.
    pub fn to_bigint(&self) -> BigInt {
        let sign = if self.sign { Sign::Plus } else { Sign::Minus };
        BigInt::from_biguint(sign, limbs::from_limbs(&self.mantissa, BITS_PER_LIMB))
    }

    pub fn to_rvalue(&self) -> RValue {
        RValue::new(self.to_bigint(), self.exponent, self.precision)
    }

    pub fn to_f64(&self) -> f64 {
        self.to_rvalue().to_f64()
    }
}

impl Debug for Smx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smx")
            .field("sign", if self.sign { &'+' } else { &'-' })
            .field("value", &self.to_f64())
            .field("mantissa", &self.mantissa)
            .field("exponent", &self.exponent)
            .finish()
    }
}

/// A two's complement fixed-point number.
///
/// The sign is bit 31 of the most significant limb, which is kept
/// sign-extended through the upper half of its cell.
#[derive(Clone, PartialEq, Eq)]
pub struct Smx2C {
    mantissa: Vec<u64>,
    exponent: i32,
    bits_before_bp: u8,
    precision: u32,
}

impl Smx2C {
    pub fn new(mantissa: Vec<u64>, exponent: i32, bits_before_bp: u8, precision: u32) -> Self {
        debug_assert!(limbs::validate_twos_complement(&mantissa).is_ok());
        Self {
            mantissa,
            exponent,
            bits_before_bp,
            precision,
        }
    }

    pub fn zero(format: &FixedPointFormat, precision: u32) -> Self {
        Self::new(
            vec![0; format.limb_count()],
            format.target_exponent(),
            format.bits_before_bp(),
            precision,
        )
    }

    pub fn is_zero(&self) -> bool {
        limbs::is_zero(&self.mantissa)
    }

    /// `true` for non-negative values.
    pub fn sign(&self) -> bool {
        !is_negative_twos_complement(&self.mantissa)
    }

    pub fn mantissa(&self) -> &[u64] {
        &self.mantissa
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    pub fn bits_before_bp(&self) -> u8 {
        self.bits_before_bp
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn limb_count(&self) -> usize {
        self.mantissa.len()
    }

    pub fn to_bigint(&self) -> BigInt {
        let (magnitude, sign) = convert_from_twos_complement(&self.mantissa);
        let sign = if sign { Sign::Plus } else { Sign::Minus };
        BigInt::from_biguint(sign, limbs::from_limbs(&magnitude, BITS_PER_LIMB))
    }

    pub fn to_rvalue(&self) -> RValue {
        RValue::new(self.to_bigint(), self.exponent, self.precision)
    }

    pub fn to_f64(&self) -> f64 {
        self.to_rvalue().to_f64()
    }
}

impl Debug for Smx2C {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smx2C")
            .field("value", &self.to_f64())
            .field("mantissa", &self.mantissa)
            .field("exponent", &self.exponent)
            .finish()
    }
}
