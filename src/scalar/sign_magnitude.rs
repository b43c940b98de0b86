use std::cmp::Ordering;

use tracing::debug;

use crate::error::Result;
use crate::format::FixedPointFormat;
use crate::limbs;
use crate::number::Smx;
use crate::rvalue::RValue;
use crate::scalar::{
    ScalarEngine, check_threshold, create_magnitude, log_saturation, msl_reaches_threshold,
    multiply_magnitude_by_int, multiply_magnitudes, square_magnitude, threshold_msl,
};
use crate::stats::ArithStats;

/// Sign-magnitude scalar engine.
#[derive(Debug, Clone)]
pub struct ScalarMath {
    format: FixedPointFormat,
    threshold: u32,
    threshold_msl: u64,
    max_integer_value: u64,
    stats: ArithStats,
}

impl ScalarMath {
    /// Creates an engine for `format`, widened to a whole number of limbs.
    ///
    /// # Errors
    ///
    /// Fails if `threshold` is larger than the biggest unsigned integer the
    /// format can hold.
    pub fn new(format: FixedPointFormat, threshold: u32) -> Result<Self> {
        let format = format.adjusted();
        let max_integer_value = format.max_unsigned_integer();
        check_threshold(threshold, max_integer_value)?;

        let threshold_msl = threshold_msl(&format, threshold);
        debug!(
            bits_before_bp = format.bits_before_bp(),
            fractional_bits = format.fractional_bits(),
            limb_count = format.limb_count(),
            threshold,
            threshold_msl,
            "created sign-magnitude scalar engine"
        );

        Ok(Self {
            format,
            threshold,
            threshold_msl,
            max_integer_value,
            stats: ArithStats::default(),
        })
    }

    pub fn threshold_msl(&self) -> u64 {
        self.threshold_msl
    }

    fn precision(&self) -> u32 {
        self.format.fractional_bits()
    }

    fn number(&self, sign: bool, mantissa: Vec<u64>) -> Smx {
        Smx::new(
            sign,
            mantissa,
            self.format.target_exponent(),
            self.format.bits_before_bp(),
            self.precision(),
        )
    }

    fn check_operand(&self, a: &Smx) {
        debug_assert_eq!(
            a.limb_count(),
            self.format.limb_count(),
            "operand limb count does not match the format"
        );
        debug_assert_eq!(
            a.exponent(),
            self.format.target_exponent(),
            "operand exponent does not match the format"
        );
    }

    fn saturate(&mut self) -> Smx {
        self.stats.add_carries += 1;
        log_saturation(&self.stats);
        self.max_integer_value()
    }

    /// `delta × i` for every `i` in `0..count`.
    pub fn build_sample_point_offsets(&mut self, delta: &Smx, count: usize) -> Result<Vec<Smx>> {
        (0..count)
            .map(|i| self.multiply_by_int(delta, i as i64))
            .collect()
    }

    /// `start + offset` for every offset.
    pub fn build_sample_points(&mut self, start: &Smx, offsets: &[Smx]) -> Result<Vec<Smx>> {
        offsets
            .iter()
            .map(|offset| self.add(start, offset))
            .collect()
    }
}

impl ScalarEngine for ScalarMath {
    type Number = Smx;

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

    fn zero(&self) -> Smx {
        Smx::zero(&self.format, self.precision())
    }

    fn max_integer_value(&self) -> Smx {
        let mantissa = limbs::integer_limbs(
            self.max_integer_value,
            self.format.limb_count(),
            self.format.bits_before_bp(),
        );
        self.number(true, mantissa)
    }

    fn create_number(&self, value: &RValue) -> Result<Smx> {
        let (mantissa, sign) = create_magnitude(&self.format, value)?;
        Ok(self.number(sign, mantissa))
    }

    fn get_rvalue(&self, value: &Smx) -> RValue {
        value.to_rvalue()
    }

    fn from_smx(&self, value: &Smx) -> Result<Smx> {
        self.check_operand(value);
        Ok(value.clone())
    }

    fn multiply(&mut self, a: &Smx, b: &Smx) -> Result<Smx> {
        self.check_operand(a);
        self.check_operand(b);
        if a.is_zero() || b.is_zero() {
            return Ok(self.zero());
        }

        let mantissa = multiply_magnitudes(&mut self.stats, &self.format, a.mantissa(), b.mantissa())?;
        Ok(self.number(a.sign() == b.sign(), mantissa))
    }

    fn multiply_by_int(&mut self, a: &Smx, b: i64) -> Result<Smx> {
        self.check_operand(a);
        let mantissa = multiply_magnitude_by_int(&mut self.stats, &self.format, a.mantissa(), b)?;
        Ok(self.number(a.sign() == (b >= 0), mantissa))
    }

    fn square(&mut self, a: &Smx) -> Result<Smx> {
        self.check_operand(a);
        if a.is_zero() {
            return Ok(self.zero());
        }

        let mantissa = square_magnitude(&mut self.stats, &self.format, a.mantissa())?;
        Ok(self.number(true, mantissa))
    }

    fn add(&mut self, a: &Smx, b: &Smx) -> Result<Smx> {
        self.check_operand(a);
        self.check_operand(b);
        if b.is_zero() {
            return Ok(a.clone());
        }
        if a.is_zero() {
            return Ok(b.clone());
        }

        if a.sign() == b.sign() {
            let (sum, carry) = limbs::add_magnitudes(a.mantissa(), b.mantissa())?;
            if carry != 0 {
                return Ok(self.saturate());
            }
            return Ok(self.number(a.sign(), sum));
        }

        let result = match limbs::compare_magnitudes(a.mantissa(), b.mantissa())? {
            Ordering::Less => {
                let difference = limbs::sub_magnitudes(b.mantissa(), a.mantissa())?;
                self.number(b.sign(), difference)
            }
            Ordering::Equal | Ordering::Greater => {
                let difference = limbs::sub_magnitudes(a.mantissa(), b.mantissa())?;
                self.number(a.sign(), difference)
            }
        };
        Ok(result)
    }

    fn sub(&mut self, a: &Smx, b: &Smx) -> Result<Smx> {
        self.add(a, &b.negated())
    }

    fn is_greater_or_eq_than_threshold(&mut self, a: &Smx) -> bool {
        self.stats.threshold_comparisons += 1;
        msl_reaches_threshold(a.mantissa(), self.threshold_msl)
    }

    fn is_zero(&self, a: &Smx) -> bool {
        a.is_zero()
    }
}
