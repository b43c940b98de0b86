use std::cmp::Ordering;

use tracing::debug;
use wide::u64x4;

use crate::error::{FixedPointError, Result};
use crate::format::{BITS_PER_LIMB, FixedPointFormat, TEST_BIT_32};
use crate::limbs;
use crate::number::Smx;
use crate::scalar::{check_threshold, log_saturation, threshold_msl};
use crate::stats::ArithStats;
use crate::vector::lanes::{lane_flags, sign_mask};
use crate::vector::{
    FpValues, LANES, LaneState, VectorEngine, low_mask, propagate_carries, reaches_threshold,
    shift_and_trim_group, square_group,
};

/// Sign-magnitude vector engine.
///
/// Mantissas are unsigned magnitudes, the sign lives in the lane's sign
/// mask.
#[derive(Debug, Clone)]
pub struct VecMath {
    format: FixedPointFormat,
    threshold: u32,
    threshold_msl: u64,
    max_integer_limbs: Vec<u64>,
    lane_state: LaneState,
    stats: ArithStats,
    group_limbs: Vec<u64x4>,
    bins: Vec<u64x4>,
    result: Vec<u64x4>,
    squares: Vec<u64x4>,
    spare: Vec<u64x4>,
    negated: FpValues,
}

enum LaneSum {
    Value(Vec<u64>, bool),
    Saturated,
}

/// Sign-magnitude addition of one lane, mirroring the scalar engine.
fn add_lane(a: &[u64], a_sign: bool, b: &[u64], b_sign: bool) -> Result<LaneSum> {
    if limbs::is_zero(b) {
        return Ok(LaneSum::Value(a.to_vec(), a_sign));
    }
    if limbs::is_zero(a) {
        return Ok(LaneSum::Value(b.to_vec(), b_sign));
    }

    if a_sign == b_sign {
        let (sum, carry) = limbs::add_magnitudes(a, b)?;
        if carry != 0 {
            return Ok(LaneSum::Saturated);
        }
        return Ok(LaneSum::Value(sum, a_sign));
    }

    let sum = match limbs::compare_magnitudes(a, b)? {
        Ordering::Less => LaneSum::Value(limbs::sub_magnitudes(b, a)?, b_sign),
        Ordering::Equal | Ordering::Greater => LaneSum::Value(limbs::sub_magnitudes(a, b)?, a_sign),
    };
    Ok(sum)
}

#[inline]
fn not(value: u64x4) -> u64x4 {
    value ^ u64x4::splat(u64::MAX)
}

/// Mask with all bits set in the lanes whose limbs are not all zero.
fn non_zero_mask(limbs: &[u64x4]) -> u64x4 {
    let any = limbs.iter().fold(u64x4::splat(0), |acc, &limb| acc | limb);
    u64x4::new(lane_flags(any).map(sign_mask))
}

impl VecMath {
    /// # Errors
    ///
    /// Fails when `value_count` is not a multiple of [`LANES`] or the
    /// threshold does not fit in the integer part.
    pub fn new(format: FixedPointFormat, value_count: usize, threshold: u32) -> Result<Self> {
        let format = format.adjusted();
        let max_integer = format.max_unsigned_integer();
        check_threshold(threshold, max_integer)?;
        let lane_state = LaneState::new(value_count)?;
        let vec_count = lane_state.vec_count();

        let limb_count = format.limb_count();
        let threshold_msl = threshold_msl(&format, threshold);
        debug!(
            bits_before_bp = format.bits_before_bp(),
            limb_count,
            value_count,
            threshold_msl,
            "created sign-magnitude vector engine"
        );

        Ok(Self {
            format,
            threshold,
            threshold_msl,
            max_integer_limbs: limbs::integer_limbs(max_integer, limb_count, format.bits_before_bp()),
            lane_state,
            stats: ArithStats::default(),
            group_limbs: vec![u64x4::splat(0); limb_count],
            bins: vec![u64x4::splat(0); limb_count * 2],
            result: vec![u64x4::splat(0); limb_count],
            squares: vec![u64x4::splat(0); limb_count * vec_count],
            spare: vec![u64x4::splat(0); limb_count],
            negated: FpValues::default(),
        })
    }

    pub fn threshold_msl(&self) -> u64 {
        self.threshold_msl
    }

    fn check_values(&self, values: &FpValues) {
        debug_assert_eq!(
            values.limb_count(),
            self.format.limb_count(),
            "container limb count does not match the format"
        );
        debug_assert_eq!(
            values.len(),
            self.lane_state.value_count(),
            "container value count does not match the engine"
        );
    }

    fn saturate_lane(&mut self, out: &mut FpValues, lane: usize) -> Result<()> {
        out.set_mantissa(lane, &self.max_integer_limbs)?;
        out.set_sign(lane, true);
        self.lane_state.mark_done(lane);
        self.stats.add_carries += 1;
        log_saturation(&self.stats);
        Ok(())
    }

    /// Every active lane has matching signs: add the magnitudes.
    fn add_same_signs(
        &mut self,
        a: &FpValues,
        b: &FpValues,
        out: &mut FpValues,
        group: usize,
        active: [bool; LANES],
    ) -> Result<()> {
        let mask = low_mask();
        let mut carry = u64x4::splat(0);
        for limb in 0..self.format.limb_count() {
            let sum = a.limb_vector(limb, group) + b.limb_vector(limb, group) + carry;
            self.result[limb] = sum & mask;
            carry = sum >> BITS_PER_LIMB;
        }

        let carries = lane_flags(carry);
        let write = std::array::from_fn(|lane| active[lane] && !carries[lane]);
        out.store_group(group, &self.result, a.sign_vector(group), write);

        for lane in (0..LANES).filter(|&lane| active[lane] && carries[lane]) {
            self.saturate_lane(out, group * LANES + lane)?;
        }
        Ok(())
    }

    /// Every active lane has opposite signs: subtract the smaller magnitude
    /// from the larger, computing both differences and picking per lane.
    fn add_opposite_signs(
        &mut self,
        a: &FpValues,
        b: &FpValues,
        out: &mut FpValues,
        group: usize,
        active: [bool; LANES],
    ) {
        let mask = low_mask();
        let test_bit = u64x4::splat(TEST_BIT_32);
        let one = u64x4::splat(1);
        let mut borrow_ab = u64x4::splat(0);
        let mut borrow_ba = u64x4::splat(0);

        for limb in 0..self.format.limb_count() {
            let left = a.limb_vector(limb, group);
            let right = b.limb_vector(limb, group);

            let ab = (left | test_bit) - right - borrow_ab;
            borrow_ab = ((ab >> BITS_PER_LIMB) & one) ^ one;
            self.result[limb] = ab & mask;

            let ba = (right | test_bit) - left - borrow_ba;
            borrow_ba = ((ba >> BITS_PER_LIMB) & one) ^ one;
            self.spare[limb] = ba & mask;
        }

        // A borrow out of a - b means |a| < |b|.
        let a_smaller = u64x4::splat(0) - borrow_ab;
        for (result, &spare) in self.result.iter_mut().zip(&self.spare) {
            *result = (*result & not(a_smaller)) | (spare & a_smaller);
        }

        let signs = (a.sign_vector(group) & not(a_smaller)) | (b.sign_vector(group) & a_smaller);
        let signs = signs | not(non_zero_mask(&self.result));
        out.store_group(group, &self.result, signs, active);
    }

    /// Signs differ within the group: one lane at a time.
    fn add_mixed_signs(
        &mut self,
        a: &FpValues,
        b: &FpValues,
        out: &mut FpValues,
        group: usize,
        active: [bool; LANES],
    ) -> Result<()> {
        for lane in (0..LANES).filter(|&lane| active[lane]) {
            let index = group * LANES + lane;
            match add_lane(&a.mantissa(index), a.sign(index), &b.mantissa(index), b.sign(index))? {
                LaneSum::Value(mantissa, sign) => {
                    out.set_mantissa(index, &mantissa)?;
                    out.set_sign(index, sign || limbs::is_zero(&mantissa));
                }
                LaneSum::Saturated => self.saturate_lane(out, index)?,
            }
        }
        Ok(())
    }

    /// `b` with its signs flipped in the in-play groups. Zero keeps its
    /// positive sign.
    fn negate_into(&mut self, b: &FpValues, negated: &mut FpValues) {
        if negated.len() != b.len() || negated.limb_count() != b.limb_count() {
            *negated = b.clone();
        }

        for &group in self.lane_state.in_play_list() {
            b.group_limbs(group, &mut self.group_limbs);
            let signs = b.sign_vector(group) ^ non_zero_mask(&self.group_limbs);
            negated.store_group(group, &self.group_limbs, signs, [true; LANES]);
        }
    }
}

impl VectorEngine for VecMath {
    fn format(&self) -> &FixedPointFormat {
        &self.format
    }

    fn threshold(&self) -> u32 {
        self.threshold
    }

    fn stats(&self) -> ArithStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = ArithStats::default();
    }

    fn lane_state(&self) -> &LaneState {
        &self.lane_state
    }

    fn lane_state_mut(&mut self) -> &mut LaneState {
        &mut self.lane_state
    }

    fn create_values(&self, values: &[Smx]) -> Result<FpValues> {
        if let Some(value) = values.iter().find(|v| v.limb_count() != self.format.limb_count()) {
            return Err(FixedPointError::LengthMismatch {
                left: self.format.limb_count(),
                right: value.limb_count(),
            });
        }
        FpValues::from_numbers(values)
    }

    fn duplicate(&self, value: &Smx) -> Result<FpValues> {
        FpValues::duplicate(value, self.lane_state.value_count())
    }

    fn get_smx(&self, values: &FpValues, lane: usize) -> Smx {
        Smx::new(
            values.sign(lane),
            values.mantissa(lane),
            self.format.target_exponent(),
            self.format.bits_before_bp(),
            self.format.fractional_bits(),
        )
    }

    fn square(&mut self, a: &FpValues, out: &mut FpValues) -> Result<()> {
        self.check_values(a);
        self.check_values(out);

        let limb_count = self.format.limb_count();
        let positive = u64x4::splat(u64::MAX);
        let Self {
            format,
            lane_state,
            stats,
            group_limbs,
            bins,
            squares,
            ..
        } = self;

        // Every group is squared before any is stored, so an overflow leaves
        // `out` untouched.
        for (slot, &group) in lane_state.in_play_list().iter().enumerate() {
            let square = &mut squares[slot * limb_count..(slot + 1) * limb_count];
            a.group_limbs(group, group_limbs);
            square_group(group_limbs, bins);
            stats.splits += (limb_count * (limb_count + 1) / 2 * LANES) as u64;

            let carry = propagate_carries(bins);
            stats.carry_passes += 1;
            let overflow = shift_and_trim_group(bins, format.bits_before_bp(), square) | carry;

            let active = lane_state.active_lanes(group);
            let overflowed = lane_flags(overflow);
            if (0..LANES).any(|lane| active[lane] && overflowed[lane]) {
                stats.multiply_carries += 1;
                return Err(FixedPointError::MultiplyOverflow);
            }
        }

        for (slot, &group) in lane_state.in_play_list().iter().enumerate() {
            let square = &squares[slot * limb_count..(slot + 1) * limb_count];
            out.store_group(group, square, positive, lane_state.active_lanes(group));
        }
        Ok(())
    }

    fn add(&mut self, a: &FpValues, b: &FpValues, out: &mut FpValues) -> Result<()> {
        self.check_values(a);
        self.check_values(b);
        self.check_values(out);

        for index in 0..self.lane_state.in_play_list().len() {
            let group = self.lane_state.in_play_list()[index];
            let active = self.lane_state.active_lanes(group);
            let same_sign = lane_flags(not(a.sign_vector(group) ^ b.sign_vector(group)));

            let active_lanes = (0..LANES).filter(|&lane| active[lane]);
            if active_lanes.clone().all(|lane| same_sign[lane]) {
                self.add_same_signs(a, b, out, group, active)?;
            } else if active_lanes.clone().all(|lane| !same_sign[lane]) {
                self.add_opposite_signs(a, b, out, group, active);
            } else {
                self.add_mixed_signs(a, b, out, group, active)?;
            }
        }
        Ok(())
    }

    fn sub(&mut self, a: &FpValues, b: &FpValues, out: &mut FpValues) -> Result<()> {
        self.check_values(b);
        let mut negated = std::mem::take(&mut self.negated);
        self.negate_into(b, &mut negated);
        let result = self.add(a, &negated, out);
        self.negated = negated;
        result
    }

    fn is_greater_or_eq_than_threshold(&mut self, a: &FpValues, results: &mut [bool]) {
        self.check_values(a);
        let msl = self.format.limb_count() - 1;
        for &group in self.lane_state.in_play_list() {
            let reached = reaches_threshold(a.limb_vector(msl, group), self.threshold_msl).to_array();
            for (lane, &flag) in reached.iter().enumerate() {
                results[group * LANES + lane] = flag == 1;
            }
            self.stats.threshold_comparisons += LANES as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::rvalue::RValue;
    use crate::scalar::{ScalarEngine, ScalarMath};
    use crate::tests::*;

    const VALUE_COUNT: usize = 16;

    #[fixture]
    fn format() -> FixedPointFormat {
        FixedPointFormat::new(8, 56).unwrap()
    }

    #[fixture]
    fn vec_math(format: FixedPointFormat) -> VecMath {
        VecMath::new(format, VALUE_COUNT, 4).unwrap()
    }

    #[fixture]
    fn scalar(format: FixedPointFormat) -> ScalarMath {
        ScalarMath::new(format, 4).unwrap()
    }

    fn random_values(rng: &mut impl Rng, format: &FixedPointFormat, max_integer: u64) -> Vec<Smx> {
        (0..VALUE_COUNT)
            .map(|_| random_smx(&mut *rng, format, max_integer))
            .collect()
    }

    fn create(scalar: &ScalarMath, values: &[f64]) -> Vec<Smx> {
        values
            .iter()
            .map(|&v| scalar.create_number(&RValue::from_f64(v, 64).unwrap()).unwrap())
            .collect()
    }

    fn lanes_of(engine: &VecMath, values: &FpValues) -> Vec<Smx> {
        (0..values.len()).map(|lane| engine.get_smx(values, lane)).collect()
    }

    #[rstest]
    fn test_construction_errors(format: FixedPointFormat) {
        assert!(matches!(
            VecMath::new(format, 6, 4),
            Err(FixedPointError::LaneMisaligned { value_count: 6, .. })
        ));
        assert!(matches!(
            VecMath::new(format, 8, 256),
            Err(FixedPointError::ThresholdTooLarge { .. })
        ));
        assert!(matches!(
            VecMath::new(FixedPointFormat::new(8, 56).unwrap(), 0, 4),
            Ok(_)
        ));
    }

    #[rstest]
    fn test_square_matches_scalar(
        mut vec_math: VecMath,
        mut scalar: ScalarMath,
        mut rng: impl Rng,
        n_experiments: usize,
    ) {
        for _ in 0..n_experiments / 100 {
            let values = random_values(&mut rng, scalar.format(), 15);
            let a = vec_math.create_values(&values).unwrap();
            let mut out = vec_math.zero_values().unwrap();
            vec_math.square(&a, &mut out).unwrap();

            for (lane, value) in values.iter().enumerate() {
                assert_eq!(vec_math.get_smx(&out, lane), scalar.square(value).unwrap());
            }
        }
    }

    #[rstest]
    fn test_add_and_sub_match_scalar(
        mut vec_math: VecMath,
        mut scalar: ScalarMath,
        mut rng: impl Rng,
        n_experiments: usize,
    ) {
        for _ in 0..n_experiments / 100 {
            let left = random_values(&mut rng, scalar.format(), 100);
            let mut right = random_values(&mut rng, scalar.format(), 100);
            // Force uniform-sign groups as well as mixed ones.
            for lane in 0..4 {
                let sign = left[lane].sign();
                if right[lane].sign() != sign {
                    right[lane] = right[lane].negated();
                }
                let sign = left[4 + lane].sign();
                if right[4 + lane].sign() == sign {
                    right[4 + lane] = right[4 + lane].negated();
                }
            }

            let a = vec_math.create_values(&left).unwrap();
            let b = vec_math.create_values(&right).unwrap();
            let mut sum = vec_math.zero_values().unwrap();
            let mut difference = vec_math.zero_values().unwrap();
            vec_math.add(&a, &b, &mut sum).unwrap();
            vec_math.sub(&a, &b, &mut difference).unwrap();

            for lane in 0..VALUE_COUNT {
                let expected_sum = scalar.add(&left[lane], &right[lane]).unwrap();
                let expected_difference = scalar.sub(&left[lane], &right[lane]).unwrap();
                assert_eq!(vec_math.get_smx(&sum, lane), expected_sum, "lane {lane}");
                assert_eq!(vec_math.get_smx(&difference, lane), expected_difference, "lane {lane}");
            }
        }
        assert_eq!(vec_math.stats().add_carries, 0);
    }

    #[rstest]
    fn test_opposite_signs_equal_magnitudes(mut vec_math: VecMath, scalar: ScalarMath) {
        let left = create(&scalar, &[1.5, -2.0, 0.0, 3.25, 1.0, 2.0, 3.0, 4.0]);
        let mut left = left.into_iter().cycle().take(VALUE_COUNT).collect::<Vec<_>>();
        left[2] = scalar.zero();
        let right: Vec<Smx> = left.iter().map(Smx::negated).collect();

        let a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        vec_math.add(&a, &b, &mut out).unwrap();

        for lane in 0..VALUE_COUNT {
            let value = vec_math.get_smx(&out, lane);
            assert!(value.is_zero());
            assert!(out.sign(lane), "lane {lane} should be positive zero");
        }
    }

    #[rstest]
    fn test_saturation_marks_lane_done(mut vec_math: VecMath, scalar: ScalarMath) {
        let mut left = create(&scalar, &[200.0, 1.0, 2.0, 3.0]);
        left.resize(VALUE_COUNT, scalar.zero());
        let mut right = create(&scalar, &[100.0, 1.0, 2.0, 3.0]);
        right.resize(VALUE_COUNT, scalar.zero());

        let a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        vec_math.add(&a, &b, &mut out).unwrap();

        assert_eq!(vec_math.get_smx(&out, 0), scalar.max_integer_value());
        assert!(vec_math.done_flags()[0]);
        assert!(!vec_math.done_flags()[1]);
        assert_eq!(vec_math.get_smx(&out, 1).to_f64(), 2.0);
        assert_eq!(vec_math.stats().add_carries, 1);

        // The clamped lane is no longer written.
        let clamp = out.clone();
        vec_math.add(&clamp, &b, &mut out).unwrap();
        vec_math.sub(&clamp, &b, &mut out).unwrap();
        vec_math.square(&a, &mut out).unwrap();
        assert_eq!(vec_math.get_smx(&out, 0), scalar.max_integer_value());
        assert_eq!(vec_math.stats().add_carries, 1);
    }

    #[rstest]
    fn test_mixed_group_saturation(mut vec_math: VecMath, scalar: ScalarMath) {
        let mut left = create(&scalar, &[200.0, -1.0, 2.0, -3.0]);
        left.resize(VALUE_COUNT, scalar.zero());
        let mut right = create(&scalar, &[100.0, 1.5, 2.0, 3.0]);
        right.resize(VALUE_COUNT, scalar.zero());

        let a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        vec_math.add(&a, &b, &mut out).unwrap();

        let values: Vec<f64> = lanes_of(&vec_math, &out).iter().take(4).map(Smx::to_f64).collect();
        assert_eq!(values, vec![255.0, 0.5, 4.0, 0.0]);
        assert_eq!(vec_math.done_flags()[..4], [true, false, false, false]);
    }

    #[rstest]
    fn test_square_overflow(mut vec_math: VecMath, scalar: ScalarMath) {
        let mut values = create(&scalar, &[16.0]);
        values.resize(VALUE_COUNT, scalar.zero());
        let a = vec_math.create_values(&values).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        assert_eq!(vec_math.square(&a, &mut out), Err(FixedPointError::MultiplyOverflow));

        // Overflow in a retired lane is ignored.
        vec_math.lane_state_mut().mark_done(0);
        assert!(vec_math.square(&a, &mut out).is_ok());
    }

    #[rstest]
    fn test_square_overflow_leaves_output_untouched(mut vec_math: VecMath, scalar: ScalarMath) {
        let mut values = create(&scalar, &[1.5; VALUE_COUNT]);
        values[4] = create(&scalar, &[16.0])[0].clone();
        let a = vec_math.create_values(&values).unwrap();
        let mut out = vec_math.duplicate(&create(&scalar, &[-0.75])[0]).unwrap();
        let before = out.clone();

        assert_eq!(vec_math.square(&a, &mut out), Err(FixedPointError::MultiplyOverflow));
        assert_eq!(out, before);

        vec_math.lane_state_mut().mark_done(4);
        vec_math.square(&a, &mut out).unwrap();
        assert_eq!(vec_math.get_smx(&out, 0).to_f64(), 2.25);
        assert_eq!(out.mantissa(4), before.mantissa(4));
    }

    #[rstest]
    fn test_skips_groups_out_of_play(mut vec_math: VecMath, scalar: ScalarMath) {
        let values = create(&scalar, &[1.5; VALUE_COUNT]);
        let a = vec_math.create_values(&values).unwrap();
        for lane in 4..8 {
            vec_math.lane_state_mut().mark_done(lane);
        }
        vec_math.lane_state_mut().update_in_play_list();
        assert_eq!(vec_math.in_play_list(), &[0, 2, 3]);

        let mut out = vec_math.zero_values().unwrap();
        vec_math.square(&a, &mut out).unwrap();
        assert_eq!(vec_math.get_smx(&out, 0).to_f64(), 2.25);
        assert!(vec_math.get_smx(&out, 5).is_zero());
        assert_eq!(vec_math.get_smx(&out, 8).to_f64(), 2.25);
    }

    #[rstest]
    fn test_threshold(mut vec_math: VecMath, scalar: ScalarMath) {
        let values = create(&scalar, &[0.0, 3.999, 4.0, 8.0]);
        let values: Vec<Smx> = values.into_iter().cycle().take(VALUE_COUNT).collect();
        let a = vec_math.create_values(&values).unwrap();

        let mut results = vec![false; VALUE_COUNT];
        vec_math.is_greater_or_eq_than_threshold(&a, &mut results);
        assert_eq!(results[..4], [false, false, true, true]);
        assert_eq!(results[12..], [false, false, true, true]);
    }

    #[rstest]
    fn test_in_place_operations(mut vec_math: VecMath, mut scalar: ScalarMath, mut rng: impl Rng) {
        let left = random_values(&mut rng, scalar.format(), 50);
        let right = random_values(&mut rng, scalar.format(), 50);
        let mut a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();

        vec_math.add_assign(&mut a, &b).unwrap();
        for lane in 0..VALUE_COUNT {
            let expected = scalar.add(&left[lane], &right[lane]).unwrap();
            assert_eq!(vec_math.get_smx(&a, lane), expected);
        }

        vec_math.sub_assign(&mut a, &b).unwrap();
        assert_eq!(lanes_of(&vec_math, &a), left);

        // Subtracting a container from a copy of itself gives zero everywhere.
        let copy = a.clone();
        vec_math.sub_assign(&mut a, &copy).unwrap();
        assert!((0..VALUE_COUNT).all(|lane| a.is_zero(lane) && a.sign(lane)));
    }

    #[rstest]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "limb count")]
    fn test_limb_count_mismatch_panics(mut vec_math: VecMath) {
        let a = FpValues::new(3, VALUE_COUNT).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        let _ = vec_math.square(&a, &mut out);
    }
}
