//! # Vector engines
//!
//! The scalar operation set applied to every lane of an [`FpValues`] at
//! once, four 64-bit lanes per [`u64x4`].
//!
//! ## Early retirement
//!
//! Work is tracked at two granularities:
//!
//! - the **in-play list** holds the indices of lane groups that still have
//!   at least one active lane; groups not in it are never touched,
//! - the **done flags** mark individual lanes that escaped, reached the
//!   iteration cap or saturated. A done lane is never written again.
//!
//! Outputs are caller-owned containers passed as `&mut`, so an output can
//! never alias an input of the same call. [`VectorEngine::add_assign`] and
//! [`VectorEngine::sub_assign`] cover the in-place case.

use wide::u64x4;

use crate::error::Result;
use crate::format::{BITS_PER_LIMB, FixedPointFormat, LOW_MASK, TEST_BIT_32};
use crate::number::Smx;
use crate::stats::ArithStats;

pub mod lanes;
pub mod sign_magnitude;
pub mod twos_complement;

pub use lanes::FpValues;
pub use sign_magnitude::VecMath;
pub use twos_complement::VecMath2C;

/// Number of 64-bit lanes in one SIMD vector.
pub const LANES: usize = 4;

pub trait VectorEngine {
    fn format(&self) -> &FixedPointFormat;
    fn threshold(&self) -> u32;
    fn stats(&self) -> ArithStats;
    fn reset_stats(&mut self);

    fn lane_state(&self) -> &LaneState;
    fn lane_state_mut(&mut self) -> &mut LaneState;

    /// Encodes sign-magnitude numbers in the engine's representation.
    fn create_values(&self, values: &[Smx]) -> Result<FpValues>;
    /// The same number in every lane.
    fn duplicate(&self, value: &Smx) -> Result<FpValues>;
    /// Decodes one lane back into a sign-magnitude number.
    fn get_smx(&self, values: &FpValues, lane: usize) -> Smx;

    fn square(&mut self, a: &FpValues, out: &mut FpValues) -> Result<()>;
    fn add(&mut self, a: &FpValues, b: &FpValues, out: &mut FpValues) -> Result<()>;
    fn sub(&mut self, a: &FpValues, b: &FpValues, out: &mut FpValues) -> Result<()>;
    fn is_greater_or_eq_than_threshold(&mut self, a: &FpValues, results: &mut [bool]);

    fn value_count(&self) -> usize {
        self.lane_state().value_count()
    }

    fn in_play_list(&self) -> &[usize] {
        self.lane_state().in_play_list()
    }

    fn done_flags(&self) -> &[bool] {
        self.lane_state().done_flags()
    }

    /// Zeros shaped for this engine.
    fn zero_values(&self) -> Result<FpValues> {
        FpValues::new(self.format().limb_count(), self.value_count())
    }

    /// `a += b`.
    fn add_assign(&mut self, a: &mut FpValues, b: &FpValues) -> Result<()> {
        let left = a.clone();
        self.add(&left, b, a)
    }

    /// `a -= b`.
    fn sub_assign(&mut self, a: &mut FpValues, b: &FpValues) -> Result<()> {
        let left = a.clone();
        self.sub(&left, b, a)
    }
}

/// In-play list and done flags for one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneState {
    value_count: usize,
    in_play_list: Vec<usize>,
    done_flags: Vec<bool>,
}

impl LaneState {
    pub fn new(value_count: usize) -> Result<Self> {
        lanes::check_lane_alignment(value_count)?;
        let mut state = Self {
            value_count,
            in_play_list: Vec::new(),
            done_flags: Vec::new(),
        };
        state.reset();
        Ok(state)
    }

    /// Every group in play, no lane done.
    pub fn reset(&mut self) {
        self.in_play_list = (0..self.vec_count()).collect();
        self.done_flags = vec![false; self.value_count];
    }

    pub fn value_count(&self) -> usize {
        self.value_count
    }

    pub fn vec_count(&self) -> usize {
        self.value_count / LANES
    }

    pub fn in_play_list(&self) -> &[usize] {
        &self.in_play_list
    }

    pub fn done_flags(&self) -> &[bool] {
        &self.done_flags
    }

    pub fn is_done(&self, lane: usize) -> bool {
        self.done_flags[lane]
    }

    pub fn mark_done(&mut self, lane: usize) {
        self.done_flags[lane] = true;
    }

    /// Lanes of `group` that may still be written.
    pub fn active_lanes(&self, group: usize) -> [bool; LANES] {
        let base = group * LANES;
        std::array::from_fn(|lane| !self.done_flags[base + lane])
    }

    /// Drops the groups whose lanes are all done.
    pub fn update_in_play_list(&mut self) {
        let done_flags = &self.done_flags;
        self.in_play_list
            .retain(|&group| done_flags[group * LANES..(group + 1) * LANES].iter().any(|d| !d));
    }

    pub fn is_finished(&self) -> bool {
        self.in_play_list.is_empty()
    }
}

#[inline]
pub(crate) fn low_mask() -> u64x4 {
    u64x4::splat(LOW_MASK)
}

/// Upper-triangle squaring of one group into `2n` bins.
pub(crate) fn square_group(limbs: &[u64x4], bins: &mut [u64x4]) {
    let mask = low_mask();
    bins.fill(u64x4::splat(0));

    for j in 0..limbs.len() {
        for i in j..limbs.len() {
            let product = limbs[j] * limbs[i];
            let mut lo = product & mask;
            let mut hi = product >> BITS_PER_LIMB;
            if i > j {
                lo = lo << 1_u32;
                hi = hi << 1_u32;
            }
            bins[i + j] = bins[i + j] + lo;
            bins[i + j + 1] = bins[i + j + 1] + hi;
        }
    }
}

/// Carry propagation over one group's bins.
///
/// # Returns
///
/// The carry out of the top bin, per lane.
pub(crate) fn propagate_carries(bins: &mut [u64x4]) -> u64x4 {
    let mask = low_mask();
    let mut carry = u64x4::splat(0);
    for bin in bins.iter_mut() {
        let sum = *bin + carry;
        *bin = sum & mask;
        carry = sum >> BITS_PER_LIMB;
    }
    carry
}

/// Normalizes a group's double-width product into `result`.
///
/// # Returns
///
/// Per lane, the bits that did not fit above the result window. Non-zero
/// means the product overflowed.
pub(crate) fn shift_and_trim_group(summed: &[u64x4], bits_before_bp: u8, result: &mut [u64x4]) -> u64x4 {
    let limb_count = summed.len() / 2;
    let shift = BITS_PER_LIMB - u32::from(bits_before_bp);
    let mask = low_mask();

    for (i, slot) in result.iter_mut().enumerate().take(limb_count) {
        let window = (summed[limb_count + i] << BITS_PER_LIMB) | summed[limb_count + i - 1];
        *slot = (window >> shift) & mask;
    }
    summed[summed.len() - 1] >> shift
}

/// Per lane, 1 where `msl ≥ threshold_msl` and 0 elsewhere.
///
/// Adding the test bit keeps the difference non-negative, so bit 32 of the
/// result is the comparison outcome.
pub(crate) fn reaches_threshold(msl: u64x4, threshold_msl: u64) -> u64x4 {
    let difference = (msl & low_mask()) + u64x4::splat(TEST_BIT_32) - u64x4::splat(threshold_msl);
    difference >> BITS_PER_LIMB
}
