//! Error type shared by every engine, codec function and generator.

use thiserror::Error;

/// Everything that can go wrong while building or driving a fixed-point engine.
///
/// All variants describe contract violations: a format that cannot hold the
/// requested values, operands that do not belong to the engine, or a product
/// whose integer part does not fit. Additive overflow is not listed here, it
/// saturates instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixedPointError {
    #[error("bits before the binary point must be at most 32, got {0}")]
    BitsBeforeBinaryPoint(u8),

    #[error("format needs at least one bit, got {bits_before_bp}:{fractional_bits}")]
    InvalidFractionalBits {
        bits_before_bp: u8,
        fractional_bits: u32,
    },

    #[error("threshold {threshold} exceeds the largest representable integer {max_integer}")]
    ThresholdTooLarge { threshold: u32, max_integer: u64 },

    #[error("value count {value_count} is not a multiple of the lane width {lanes}")]
    LaneMisaligned { value_count: usize, lanes: usize },

    #[error("value does not fit in {bits_before_bp} bits before the binary point")]
    ValueTooLarge { bits_before_bp: u8 },

    #[error("product overflowed the integer part of the format")]
    MultiplyOverflow,

    #[error("multiplier {multiplier} needs more than {bits_before_bp} bits")]
    MultiplierTooLarge { multiplier: i64, bits_before_bp: u8 },

    #[error("limb arrays have different lengths: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("magnitude is too large for the two's complement format")]
    TwosComplementOverflow,

    #[error("limb {index} is not a valid two's complement word: {value:#018x}")]
    InvalidTwosComplement { index: usize, value: u64 },

    #[error("limb {index} holds {value:#x}, which does not fit in {bits_per_limb} bits")]
    InvalidLimb {
        index: usize,
        value: u64,
        bits_per_limb: u32,
    },

    #[error("target iterations must be at least 1")]
    InvalidTargetIterations,

    #[error("block must contain at least one sample point, got {width}x{height}")]
    EmptyBlock { width: usize, height: usize },

    #[error("engine does not match the request: format {bits_before_bp}:{fractional_bits}, threshold {threshold}")]
    EngineMismatch {
        bits_before_bp: u8,
        fractional_bits: u32,
        threshold: u32,
    },
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
