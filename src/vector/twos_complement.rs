use tracing::debug;
use wide::u64x4;

use crate::error::{FixedPointError, Result};
use crate::format::{BITS_PER_LIMB, FixedPointFormat, HIGH_MASK, SIGN_BIT_32};
use crate::limbs::{self, convert_from_twos_complement, convert_to_twos_complement};
use crate::number::Smx;
use crate::scalar::{check_threshold, log_saturation, threshold_msl};
use crate::stats::ArithStats;
use crate::vector::lanes::{lane_flags, sign_mask};
use crate::vector::{
    FpValues, LANES, LaneState, VectorEngine, low_mask, propagate_carries, reaches_threshold,
    shift_and_trim_group, square_group,
};

/// Two's complement vector engine.
///
/// Lower limbs carry 32 payload bits, the most significant limb is
/// sign-extended to 64 bits, so additions need no sign bookkeeping. The
/// sign masks are kept in step for callers that read them.
#[derive(Debug, Clone)]
pub struct VecMath2C {
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
    negated: FpValues,
}

/// All bits set in the lanes whose most significant limb is negative.
#[inline]
fn negative_mask(msl: u64x4) -> u64x4 {
    let sign = (msl >> (BITS_PER_LIMB - 1)) & u64x4::splat(1);
    u64x4::splat(0) - sign
}

/// Sign masks (all ones for non-negative) derived from the top limb.
#[inline]
fn sign_masks(msl: u64x4) -> u64x4 {
    negative_mask(msl) ^ u64x4::splat(u64::MAX)
}

/// Replaces each negative lane by its magnitude, in place.
///
/// `flip` is all ones in the lanes to negate; the increment rides on the
/// carry chain.
fn conditional_negate(limbs: &mut [u64x4], flip: u64x4) {
    let mask = low_mask();
    let mut carry = flip & u64x4::splat(1);
    for limb in limbs.iter_mut() {
        let sum = ((*limb ^ flip) & mask) + carry;
        *limb = sum & mask;
        carry = sum >> BITS_PER_LIMB;
    }
}

/// Two's complement negation keeping the top limb sign-extended.
fn negate_group(limbs: &mut [u64x4]) {
    let mask = low_mask();
    let all = u64x4::splat(u64::MAX);
    let mut carry = u64x4::splat(1);
    let top = limbs.len() - 1;
    for limb in limbs[..top].iter_mut() {
        let sum = ((*limb ^ all) & mask) + carry;
        *limb = sum & mask;
        carry = sum >> BITS_PER_LIMB;
    }
    limbs[top] = (limbs[top] ^ all) + carry;
}

impl VecMath2C {
    pub fn new(format: FixedPointFormat, value_count: usize, threshold: u32) -> Result<Self> {
        let format = format.adjusted();
        let max_integer = format.max_signed_integer();
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
            "created two's complement vector engine"
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

    /// Per lane, whether the sum in `self.result` left the format: the top
    /// limb is not a sign-extended 32-bit word, or only the sign bit is set.
    fn overflowed_lanes(&self) -> [bool; LANES] {
        let top = self.result.len() - 1;
        let msl = self.result[top].to_array();
        let lower_zero: [bool; LANES] = std::array::from_fn(|lane| {
            self.result[..top].iter().all(|limb| limb.to_array()[lane] == 0)
        });

        std::array::from_fn(|lane| {
            let upper = msl[lane] & HIGH_MASK;
            let sign = msl[lane] & SIGN_BIT_32 != 0;
            let extended = if sign { upper == HIGH_MASK } else { upper == 0 };
            let most_negative = sign && msl[lane] & !HIGH_MASK == SIGN_BIT_32 && lower_zero[lane];
            !extended || most_negative
        })
    }

    fn negate_into(&mut self, b: &FpValues, negated: &mut FpValues) {
        if negated.len() != b.len() || negated.limb_count() != b.limb_count() {
            *negated = b.clone();
        }

        for &group in self.lane_state.in_play_list() {
            b.group_limbs(group, &mut self.group_limbs);
            negate_group(&mut self.group_limbs);
            let signs = sign_masks(self.group_limbs[self.group_limbs.len() - 1]);
            negated.store_group(group, &self.group_limbs, signs, [true; LANES]);
        }
    }
}

impl VectorEngine for VecMath2C {
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
        let mut container = FpValues::new(self.format.limb_count(), values.len())?;
        for (lane, value) in values.iter().enumerate() {
            let mantissa = convert_to_twos_complement(value.mantissa(), value.sign()).map_err(|_| {
                FixedPointError::ValueTooLarge {
                    bits_before_bp: self.format.bits_before_bp(),
                }
            })?;
            container.set_mantissa(lane, &mantissa)?;
            container.set_sign(lane, value.sign());
        }
        Ok(container)
    }

    fn duplicate(&self, value: &Smx) -> Result<FpValues> {
        let values = vec![value.clone(); self.lane_state.value_count()];
        self.create_values(&values)
    }

    fn get_smx(&self, values: &FpValues, lane: usize) -> Smx {
        let (magnitude, sign) = convert_from_twos_complement(&values.mantissa(lane));
        Smx::new(
            sign,
            magnitude,
            self.format.target_exponent(),
            self.format.bits_before_bp(),
            self.format.fractional_bits(),
        )
    }

    fn square(&mut self, a: &FpValues, out: &mut FpValues) -> Result<()> {
        self.check_values(a);
        self.check_values(out);

        let limb_count = self.format.limb_count();
        let positive = u64x4::splat(sign_mask(true));
        let sign_bit = u64x4::splat(SIGN_BIT_32);
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
            let flip = negative_mask(group_limbs[limb_count - 1]);
            conditional_negate(group_limbs, flip);
            square_group(group_limbs, bins);
            stats.splits += (limb_count * (limb_count + 1) / 2 * LANES) as u64;

            let carry = propagate_carries(bins);
            stats.carry_passes += 1;
            let overflow = shift_and_trim_group(bins, format.bits_before_bp(), square) | carry;
            let overflow = overflow | (square[limb_count - 1] & sign_bit);

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

        let mask = low_mask();
        let top = self.format.limb_count() - 1;
        for index in 0..self.lane_state.in_play_list().len() {
            let group = self.lane_state.in_play_list()[index];

            let mut carry = u64x4::splat(0);
            for limb in 0..top {
                let sum = a.limb_vector(limb, group) + b.limb_vector(limb, group) + carry;
                self.result[limb] = sum & mask;
                carry = sum >> BITS_PER_LIMB;
            }
            self.result[top] = a.limb_vector(top, group) + b.limb_vector(top, group) + carry;

            let active = self.lane_state.active_lanes(group);
            let overflowed = self.overflowed_lanes();
            let write = std::array::from_fn(|lane| active[lane] && !overflowed[lane]);
            out.store_group(group, &self.result, sign_masks(self.result[top]), write);

            for lane in (0..LANES).filter(|&lane| active[lane] && overflowed[lane]) {
                self.saturate_lane(out, group * LANES + lane)?;
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
    use crate::scalar::{ScalarEngine, ScalarMath2C};
    use crate::tests::*;
    use crate::vector::VecMath;

    const VALUE_COUNT: usize = 8;

    #[fixture]
    fn format() -> FixedPointFormat {
        FixedPointFormat::new(8, 56).unwrap()
    }

    #[fixture]
    fn vec_math(format: FixedPointFormat) -> VecMath2C {
        VecMath2C::new(format, VALUE_COUNT, 4).unwrap()
    }

    #[fixture]
    fn scalar(format: FixedPointFormat) -> ScalarMath2C {
        ScalarMath2C::new(format, 4).unwrap()
    }

    fn create(scalar: &ScalarMath2C, values: &[f64]) -> Vec<Smx> {
        values
            .iter()
            .map(|&v| {
                let number = scalar.create_number(&RValue::from_f64(v, 64).unwrap()).unwrap();
                scalar.to_smx(&number)
            })
            .collect()
    }

    fn random_values(rng: &mut impl Rng, format: &FixedPointFormat, max_integer: u64) -> Vec<Smx> {
        (0..VALUE_COUNT)
            .map(|_| random_smx(&mut *rng, format, max_integer))
            .collect()
    }

    #[rstest]
    fn test_storage_is_sign_extended(vec_math: VecMath2C, scalar: ScalarMath2C) {
        let values = create(&scalar, &[-0.5, 0.5, -1.0, 0.0, -127.0, 127.0, -0.25, 3.0]);
        let container = vec_math.create_values(&values).unwrap();
        for lane in 0..VALUE_COUNT {
            limbs::validate_twos_complement(&container.mantissa(lane)).unwrap();
            assert_eq!(container.sign(lane), values[lane].sign());
            assert_eq!(vec_math.get_smx(&container, lane), values[lane]);
        }
        assert_eq!(container.mantissa(0), vec![0, 0xFFFF_FFFF_FF80_0000]);
    }

    #[rstest]
    fn test_matches_scalar(
        mut vec_math: VecMath2C,
        mut scalar: ScalarMath2C,
        mut rng: impl Rng,
        n_experiments: usize,
    ) {
        for _ in 0..n_experiments / 100 {
            let left = random_values(&mut rng, scalar.format(), 11);
            let right = random_values(&mut rng, scalar.format(), 11);
            let a = vec_math.create_values(&left).unwrap();
            let b = vec_math.create_values(&right).unwrap();

            let mut square = vec_math.zero_values().unwrap();
            let mut sum = vec_math.zero_values().unwrap();
            let mut difference = vec_math.zero_values().unwrap();
            vec_math.square(&a, &mut square).unwrap();
            vec_math.add(&a, &b, &mut sum).unwrap();
            vec_math.sub(&a, &b, &mut difference).unwrap();

            for lane in 0..VALUE_COUNT {
                let x = scalar.from_smx(&left[lane]).unwrap();
                let y = scalar.from_smx(&right[lane]).unwrap();
                let expected_square = scalar.square(&x).unwrap();
                let expected_sum = scalar.add(&x, &y).unwrap();
                let expected_difference = scalar.sub(&x, &y).unwrap();

                assert_eq!(square.mantissa(lane), expected_square.mantissa());
                assert_eq!(sum.mantissa(lane), expected_sum.mantissa());
                assert_eq!(difference.mantissa(lane), expected_difference.mantissa());
                assert_eq!(sum.sign(lane), expected_sum.sign());
                assert_eq!(difference.sign(lane), expected_difference.sign());
            }
        }
    }

    #[rstest]
    fn test_matches_sign_magnitude_engine(
        mut vec_math: VecMath2C,
        format: FixedPointFormat,
        mut rng: impl Rng,
        n_experiments: usize,
    ) {
        let mut vec_math_sm = VecMath::new(format, VALUE_COUNT, 4).unwrap();
        for _ in 0..n_experiments / 100 {
            let left = random_values(&mut rng, &format, 11);
            let right = random_values(&mut rng, &format, 11);

            let a = vec_math.create_values(&left).unwrap();
            let b = vec_math.create_values(&right).unwrap();
            let a_sm = vec_math_sm.create_values(&left).unwrap();
            let b_sm = vec_math_sm.create_values(&right).unwrap();

            let mut out = vec_math.zero_values().unwrap();
            let mut out_sm = vec_math_sm.zero_values().unwrap();
            vec_math.sub(&a, &b, &mut out).unwrap();
            vec_math_sm.sub(&a_sm, &b_sm, &mut out_sm).unwrap();
            for lane in 0..VALUE_COUNT {
                assert_eq!(vec_math.get_smx(&out, lane), vec_math_sm.get_smx(&out_sm, lane));
            }

            let mut square = vec_math.zero_values().unwrap();
            let mut square_sm = vec_math_sm.zero_values().unwrap();
            vec_math.square(&a, &mut square).unwrap();
            vec_math_sm.square(&a_sm, &mut square_sm).unwrap();
            for lane in 0..VALUE_COUNT {
                assert_eq!(vec_math.get_smx(&square, lane), vec_math_sm.get_smx(&square_sm, lane));
            }
        }
    }

    #[rstest]
    fn test_add_overflow_saturates(mut vec_math: VecMath2C, scalar: ScalarMath2C) {
        let left = create(&scalar, &[100.0, -100.0, -100.0, 1.0, 5.0, 6.0, 7.0, 8.0]);
        let right = create(&scalar, &[50.0, -50.0, -28.0, -1.0, 5.0, 6.0, 7.0, 8.0]);
        let a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        vec_math.add(&a, &b, &mut out).unwrap();

        let max = scalar.to_smx(&scalar.max_integer_value());
        for lane in 0..3 {
            assert_eq!(vec_math.get_smx(&out, lane), max, "lane {lane}");
        }
        assert!(out.is_zero(3));
        assert!(out.sign(3));
        assert_eq!(vec_math.done_flags()[..4], [true, true, true, false]);
        assert_eq!(vec_math.stats().add_carries, 3);
        assert_eq!(vec_math.get_smx(&out, 7).to_f64(), 16.0);
    }

    #[rstest]
    fn test_square_signed_overflow(mut vec_math: VecMath2C, scalar: ScalarMath2C) {
        let values = create(&scalar, &[-12.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let a = vec_math.create_values(&values).unwrap();
        let mut out = vec_math.zero_values().unwrap();
        assert_eq!(vec_math.square(&a, &mut out), Err(FixedPointError::MultiplyOverflow));
        assert_eq!(vec_math.stats().multiply_carries, 1);

        let values = create(&scalar, &[-11.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let a = vec_math.create_values(&values).unwrap();
        vec_math.square(&a, &mut out).unwrap();
        assert_eq!(vec_math.get_smx(&out, 0).to_f64(), 121.0);
        assert!(out.sign(0));
    }

    #[rstest]
    fn test_square_overflow_leaves_output_untouched(mut vec_math: VecMath2C, scalar: ScalarMath2C) {
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
    fn test_sub_in_place(mut vec_math: VecMath2C, scalar: ScalarMath2C) {
        let left = create(&scalar, &[1.0, -2.0, 3.5, -4.25, 0.0, 0.0, 1.0, -1.0]);
        let right = create(&scalar, &[0.5, 0.5, -0.5, -0.5, 0.0, 2.0, 1.0, -1.0]);
        let mut a = vec_math.create_values(&left).unwrap();
        let b = vec_math.create_values(&right).unwrap();

        vec_math.sub_assign(&mut a, &b).unwrap();
        let values: Vec<f64> = (0..VALUE_COUNT).map(|lane| vec_math.get_smx(&a, lane).to_f64()).collect();
        assert_eq!(values, vec![0.5, -2.5, 4.0, -3.75, 0.0, -2.0, 0.0, 0.0]);
        for lane in 0..VALUE_COUNT {
            limbs::validate_twos_complement(&a.mantissa(lane)).unwrap();
        }
    }

    #[rstest]
    fn test_threshold(mut vec_math: VecMath2C, scalar: ScalarMath2C) {
        let values = create(&scalar, &[0.0, 3.999, 4.0, 8.0, 126.5, 0.5, 4.5, 1.0]);
        let a = vec_math.create_values(&values).unwrap();
        let mut results = vec![false; VALUE_COUNT];
        vec_math.is_greater_or_eq_than_threshold(&a, &mut results);
        assert_eq!(results, vec![false, false, true, true, true, false, true, false]);
    }
}
