use tracing::debug;

use crate::error::{FixedPointError, Result};
use crate::format::FixedPointFormat;
use crate::limbs::{self, add_twos_complement, convert_from_twos_complement, convert_to_twos_complement};
use crate::number::{Smx, Smx2C};
use crate::rvalue::RValue;
use crate::scalar::{
    ScalarEngine, check_signed_magnitude, check_threshold, create_magnitude, log_saturation,
    msl_reaches_threshold, multiply_magnitude_by_int, multiply_magnitudes, square_magnitude,
    threshold_msl,
};
use crate::stats::ArithStats;

/// Two's complement scalar engine.
///
/// Products are formed on magnitudes and re-encoded, additions are native.
/// The top bit of the integer part is the sign, so the largest integer is
/// half of what [`crate::scalar::ScalarMath`] can hold.
#[derive(Debug, Clone)]
pub struct ScalarMath2C {
    format: FixedPointFormat,
    threshold: u32,
    threshold_msl: u64,
    max_integer_value: u64,
    stats: ArithStats,
}

impl ScalarMath2C {
    pub fn new(format: FixedPointFormat, threshold: u32) -> Result<Self> {
        let format = format.adjusted();
        let max_integer_value = format.max_signed_integer();
        check_threshold(threshold, max_integer_value)?;

        let threshold_msl = threshold_msl(&format, threshold);
        debug!(
            bits_before_bp = format.bits_before_bp(),
            fractional_bits = format.fractional_bits(),
            limb_count = format.limb_count(),
            threshold,
            threshold_msl,
            "created two's complement scalar engine"
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

    fn number(&self, mantissa: Vec<u64>) -> Smx2C {
        Smx2C::new(
            mantissa,
            self.format.target_exponent(),
            self.format.bits_before_bp(),
            self.format.fractional_bits(),
        )
    }

    fn encode(&self, magnitude: &[u64], sign: bool) -> Result<Smx2C> {
        let mantissa = convert_to_twos_complement(magnitude, sign).map_err(|_| {
            FixedPointError::ValueTooLarge {
                bits_before_bp: self.format.bits_before_bp(),
            }
        })?;
        Ok(self.number(mantissa))
    }

    fn check_operand(&self, a: &Smx2C) {
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
        debug_assert!(
            limbs::validate_twos_complement(a.mantissa()).is_ok(),
            "operand is not sign-extended"
        );
    }

    /// Back to sign-magnitude form.
    pub fn to_smx(&self, value: &Smx2C) -> Smx {
        let (magnitude, sign) = convert_from_twos_complement(value.mantissa());
        Smx::new(
            sign,
            magnitude,
            value.exponent(),
            value.bits_before_bp(),
            value.precision(),
        )
    }

    /// Re-applies `sign` to a product magnitude.
    fn signed_product(&self, magnitude: Vec<u64>, sign: bool) -> Result<Smx2C> {
        let mantissa = convert_to_twos_complement(&magnitude, sign)?;
        Ok(self.number(mantissa))
    }
}

impl ScalarEngine for ScalarMath2C {
    type Number = Smx2C;

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

    fn zero(&self) -> Smx2C {
        Smx2C::zero(&self.format, self.format.fractional_bits())
    }

    fn max_integer_value(&self) -> Smx2C {
        self.number(limbs::integer_limbs(
            self.max_integer_value,
            self.format.limb_count(),
            self.format.bits_before_bp(),
        ))
    }

    fn create_number(&self, value: &RValue) -> Result<Smx2C> {
        let (magnitude, sign) = create_magnitude(&self.format, value)?;
        self.encode(&magnitude, sign)
    }

    fn get_rvalue(&self, value: &Smx2C) -> RValue {
        value.to_rvalue()
    }

    fn from_smx(&self, value: &Smx) -> Result<Smx2C> {
        debug_assert_eq!(value.limb_count(), self.format.limb_count());
        self.encode(value.mantissa(), value.sign())
    }

    fn multiply(&mut self, a: &Smx2C, b: &Smx2C) -> Result<Smx2C> {
        self.check_operand(a);
        self.check_operand(b);
        if a.is_zero() || b.is_zero() {
            return Ok(self.zero());
        }

        let (a_magnitude, a_sign) = convert_from_twos_complement(a.mantissa());
        let (b_magnitude, b_sign) = convert_from_twos_complement(b.mantissa());
        let magnitude = multiply_magnitudes(&mut self.stats, &self.format, &a_magnitude, &b_magnitude)?;
        let magnitude = check_signed_magnitude(&mut self.stats, magnitude)?;
        self.signed_product(magnitude, a_sign == b_sign)
    }

    fn multiply_by_int(&mut self, a: &Smx2C, b: i64) -> Result<Smx2C> {
        self.check_operand(a);
        let (magnitude, sign) = convert_from_twos_complement(a.mantissa());
        let magnitude = multiply_magnitude_by_int(&mut self.stats, &self.format, &magnitude, b)?;
        let magnitude = check_signed_magnitude(&mut self.stats, magnitude)?;
        self.signed_product(magnitude, sign == (b >= 0))
    }

    fn square(&mut self, a: &Smx2C) -> Result<Smx2C> {
        self.check_operand(a);
        if a.is_zero() {
            return Ok(self.zero());
        }

        let (magnitude, _) = convert_from_twos_complement(a.mantissa());
        let magnitude = square_magnitude(&mut self.stats, &self.format, &magnitude)?;
        let magnitude = check_signed_magnitude(&mut self.stats, magnitude)?;
        Ok(self.number(magnitude))
    }

    fn add(&mut self, a: &Smx2C, b: &Smx2C) -> Result<Smx2C> {
        self.check_operand(a);
        self.check_operand(b);

        let (sum, overflow) = add_twos_complement(a.mantissa(), b.mantissa())?;
        if overflow {
            self.stats.add_carries += 1;
            log_saturation(&self.stats);
            return Ok(self.max_integer_value());
        }
        Ok(self.number(sum))
    }

    fn sub(&mut self, a: &Smx2C, b: &Smx2C) -> Result<Smx2C> {
        self.check_operand(b);
        let negated = self.number(limbs::negate_twos_complement(b.mantissa()));
        self.add(a, &negated)
    }

    fn is_greater_or_eq_than_threshold(&mut self, a: &Smx2C) -> bool {
        self.stats.threshold_comparisons += 1;
        msl_reaches_threshold(a.mantissa(), self.threshold_msl)
    }

    fn is_zero(&self, a: &Smx2C) -> bool {
        a.is_zero()
    }
}
