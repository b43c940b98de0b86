//! Structure-of-arrays storage for many fixed-point numbers.
//!
//! ```text
//! signs:      [s0 s1 s2 s3 | s4 s5 s6 s7 | ...]
//! limbs[0]:   [l0 l0 l0 l0 | l0 l0 l0 l0 | ...]   least significant
//! limbs[n-1]: [ln ln ln ln | ln ln ln ln | ...]   most significant
//!              \ group 0 /   \ group 1 /
//! ```
//!
//! A sign is a mask: all ones for a non-negative value, zero for a negative
//! one.

use wide::u64x4;

use crate::error::{FixedPointError, Result};
use crate::number::{Smx, Smx2C};
use crate::vector::LANES;

#[inline]
pub fn sign_mask(sign: bool) -> u64 {
    if sign { u64::MAX } else { 0 }
}

/// Per-lane view of a mask vector.
#[inline]
pub fn lane_flags(mask: u64x4) -> [bool; LANES] {
    mask.to_array().map(|lane| lane != 0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FpValues {
    signs: Vec<u64>,
    limbs: Vec<Vec<u64>>,
}

pub(crate) fn check_lane_alignment(value_count: usize) -> Result<()> {
    if value_count % LANES != 0 {
        return Err(FixedPointError::LaneMisaligned {
            value_count,
            lanes: LANES,
        });
    }
    Ok(())
}

impl FpValues {
    /// `value_count` zeros of `limb_count` limbs each.
    pub fn new(limb_count: usize, value_count: usize) -> Result<Self> {
        check_lane_alignment(value_count)?;
        Ok(Self {
            signs: vec![u64::MAX; value_count],
            limbs: vec![vec![0; value_count]; limb_count],
        })
    }

    /// Loads sign-magnitude numbers, one per lane.
    pub fn from_numbers(values: &[Smx]) -> Result<Self> {
        let limb_count = values.first().map_or(0, Smx::limb_count);
        let mut result = Self::new(limb_count, values.len())?;
        for (lane, value) in values.iter().enumerate() {
            result.set_mantissa(lane, value.mantissa())?;
            result.set_sign(lane, value.sign());
        }
        Ok(result)
    }

    /// Loads two's complement numbers, one per lane.
    pub fn from_twos_complement(values: &[Smx2C]) -> Result<Self> {
        let limb_count = values.first().map_or(0, Smx2C::limb_count);
        let mut result = Self::new(limb_count, values.len())?;
        for (lane, value) in values.iter().enumerate() {
            result.set_mantissa(lane, value.mantissa())?;
            result.set_sign(lane, value.sign());
        }
        Ok(result)
    }

    /// The same number in `count` lanes.
    pub fn duplicate(value: &Smx, count: usize) -> Result<Self> {
        let mut result = Self::new(value.limb_count(), count)?;
        for (limb, &word) in result.limbs.iter_mut().zip(value.mantissa()) {
            limb.fill(word);
        }
        result.signs.fill(sign_mask(value.sign()));
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }

    pub fn vec_count(&self) -> usize {
        self.len() / LANES
    }

    pub fn limb_count(&self) -> usize {
        self.limbs.len()
    }

    pub fn signs(&self) -> &[u64] {
        &self.signs
    }

    pub fn limbs(&self) -> &[Vec<u64>] {
        &self.limbs
    }

    pub fn sign(&self, lane: usize) -> bool {
        self.signs[lane] != 0
    }

    pub fn set_sign(&mut self, lane: usize, sign: bool) {
        self.signs[lane] = sign_mask(sign);
    }

    pub fn mantissa(&self, lane: usize) -> Vec<u64> {
        self.limbs.iter().map(|limb| limb[lane]).collect()
    }

    pub fn set_mantissa(&mut self, lane: usize, mantissa: &[u64]) -> Result<()> {
        if mantissa.len() != self.limb_count() {
            return Err(FixedPointError::LengthMismatch {
                left: self.limb_count(),
                right: mantissa.len(),
            });
        }
        for (limb, &word) in self.limbs.iter_mut().zip(mantissa) {
            limb[lane] = word;
        }
        Ok(())
    }

    pub fn is_zero(&self, lane: usize) -> bool {
        self.limbs.iter().all(|limb| limb[lane] == 0)
    }

    /// Copies one lane of `other` into the same lane of `self`.
    pub fn copy_lane_from(&mut self, other: &Self, lane: usize) {
        self.signs[lane] = other.signs[lane];
        for (limb, source) in self.limbs.iter_mut().zip(&other.limbs) {
            limb[lane] = source[lane];
        }
    }

    #[inline]
    pub(crate) fn limb_vector(&self, limb: usize, group: usize) -> u64x4 {
        load(&self.limbs[limb], group)
    }

    #[inline]
    pub(crate) fn sign_vector(&self, group: usize) -> u64x4 {
        load(&self.signs, group)
    }

    /// All limbs of one group, least significant first.
    pub(crate) fn group_limbs(&self, group: usize, into: &mut [u64x4]) {
        for (limb, slot) in self.limbs.iter().zip(into.iter_mut()) {
            *slot = load(limb, group);
        }
    }

    /// Writes a group's limbs and signs, skipping lanes whose `write` flag
    /// is off.
    pub(crate) fn store_group(
        &mut self,
        group: usize,
        limbs: &[u64x4],
        signs: u64x4,
        write: [bool; LANES],
    ) {
        if write.iter().all(|&w| w) {
            for (limb, &value) in self.limbs.iter_mut().zip(limbs) {
                store(limb, group, value);
            }
            store(&mut self.signs, group, signs);
            return;
        }

        let base = group * LANES;
        let signs = signs.to_array();
        for lane in (0..LANES).filter(|&lane| write[lane]) {
            for (limb, value) in self.limbs.iter_mut().zip(limbs) {
                limb[base + lane] = value.to_array()[lane];
            }
            self.signs[base + lane] = signs[lane];
        }
    }
}

#[inline]
fn load(words: &[u64], group: usize) -> u64x4 {
    let start = group * LANES;
    let mut lanes = [0; LANES];
    lanes.copy_from_slice(&words[start..start + LANES]);
    u64x4::new(lanes)
}

#[inline]
fn store(words: &mut [u64], group: usize, value: u64x4) {
    let start = group * LANES;
    words[start..start + LANES].copy_from_slice(&value.to_array());
}
