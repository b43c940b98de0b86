//! # Fixed-Point Format
//!
//! Layout math for a fixed binary-point number made of 32-bit partial-word
//! limbs.
//!
//! ```text
//! MSL                                   LSL
//! [int bits | frac bits] [frac bits] ... [frac bits]
//!  <- B ->
//! ```
//!
//! The integer part always lives in the most significant limb, so
//! `bits_before_bp` can never exceed the limb width.

use crate::error::{FixedPointError, Result};

/// Bits of payload carried by every limb.
pub const BITS_PER_LIMB: u32 = 32;

/// Mask selecting the payload of a limb.
pub const LOW_MASK: u64 = (1 << BITS_PER_LIMB) - 1;

/// Mask selecting the (carry or sign-extension) upper half of a limb cell.
pub const HIGH_MASK: u64 = !LOW_MASK;

/// Bit just above the payload, used to detect borrows without wrapping.
pub const TEST_BIT_32: u64 = 1 << BITS_PER_LIMB;

/// Sign bit of the most significant limb in two's complement form.
pub const SIGN_BIT_32: u64 = 1 << (BITS_PER_LIMB - 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPointFormat {
    bits_before_bp: u8,
    fractional_bits: u32,
}

impl FixedPointFormat {
    /// Creates a format, rejecting integer parts wider than one limb.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mset_apfixed::FixedPointFormat;
    ///
    /// let format = FixedPointFormat::new(8, 56).unwrap();
    /// assert_eq!(format.limb_count(), 2);
    /// assert_eq!(format.target_exponent(), -56);
    /// assert!(FixedPointFormat::new(33, 31).is_err());
    /// ```
    pub fn new(bits_before_bp: u8, fractional_bits: u32) -> Result<Self> {
        if u32::from(bits_before_bp) > BITS_PER_LIMB {
            return Err(FixedPointError::BitsBeforeBinaryPoint(bits_before_bp));
        }
        if bits_before_bp == 0 && fractional_bits == 0 {
            return Err(FixedPointError::InvalidFractionalBits {
                bits_before_bp,
                fractional_bits,
            });
        }

        Ok(Self {
            bits_before_bp,
            fractional_bits,
        })
    }

    /// Creates a format and immediately widens it to a whole number of limbs.
    pub fn new_adjusted(bits_before_bp: u8, fractional_bits: u32) -> Result<Self> {
        Ok(Self::new(bits_before_bp, fractional_bits)?.adjusted())
    }

    /// Rounds the fractional bit count up so the total is a multiple of the
    /// limb width.
    pub fn adjusted(&self) -> Self {
        let limb_count = limb_count(self.total_bits(), BITS_PER_LIMB);
        Self {
            bits_before_bp: self.bits_before_bp,
            fractional_bits: limb_count as u32 * BITS_PER_LIMB - u32::from(self.bits_before_bp),
        }
    }

    pub fn is_adjusted(&self) -> bool {
        self.total_bits() % BITS_PER_LIMB == 0
    }

    pub fn bits_before_bp(&self) -> u8 {
        self.bits_before_bp
    }

    pub fn fractional_bits(&self) -> u32 {
        self.fractional_bits
    }

    pub fn total_bits(&self) -> u32 {
        u32::from(self.bits_before_bp) + self.fractional_bits
    }

    pub fn limb_count(&self) -> usize {
        limb_count(self.total_bits(), BITS_PER_LIMB)
    }

    pub fn target_exponent(&self) -> i32 {
        -(self.fractional_bits as i32)
    }

    /// Largest integer that fits in front of the binary point, unsigned.
    pub fn max_unsigned_integer(&self) -> u64 {
        (1u64 << self.bits_before_bp) - 1
    }

    /// Largest positive integer when the top bit is reserved for the sign.
    pub fn max_signed_integer(&self) -> u64 {
        match self.bits_before_bp {
            0 => 0,
            b => (1u64 << (b - 1)) - 1,
        }
    }
}

/// Number of limbs needed to hold `total_bits` bits.
pub fn limb_count(total_bits: u32, bits_per_limb: u32) -> usize {
    total_bits.div_ceil(bits_per_limb) as usize
}
