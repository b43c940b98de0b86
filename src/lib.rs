//! # mset-apfixed
//!
//! Arbitrary-precision fixed-point arithmetic for escape-time fractals. Numbers
//! carry a fixed number of bits before the binary point and as many fractional
//! bits as the zoom depth needs, spread over 32-bit limbs.
//!
//! ## Overview
//!
//! - **Formats**: [`FixedPointFormat`] fixes the integer bits (at most 32) and
//!   rounds the fractional bits up to whole limbs.
//! - **Scalar engines**: [`ScalarMath`] (sign-magnitude) and [`ScalarMath2C`]
//!   (two's complement) multiply, square, add and subtract one number at a
//!   time.
//! - **Vector engines**: [`VecMath`] and [`VecMath2C`] apply the same
//!   operations to many lanes at once and retire lanes as they finish.
//! - **Generators**: [`MapSectionGeneratorScalar`] and
//!   [`MapSectionGeneratorVector`] turn a [`MapSectionRequest`] into a block of
//!   escape counts.
//!
//! Products that overflow the integer part are errors. Sums that overflow
//! saturate to the largest representable integer, since such a point has
//! escaped anyway.
//!
//! ## Architecture
//!
//! ### Limbs
//! Free functions over `&[u64]` limb slices, least significant limb first:
//! splitting big integers, magnitude comparison and arithmetic, partial
//! product summation, shift-and-trim, two's complement conversion.
//!
//! ### Engines
//! The [`ScalarEngine`] and [`VectorEngine`] traits define the operation set.
//! Each representation implements both on top of the limb functions.
//!
//! ### Iteration
//! [`IteratorScalar`] and [`IteratorVector`] advance `z ← z² + c`; the
//! generators decide when a point is finished.
//!
//! ## Quick Start
//!
//! ```rust
//! use mset_apfixed::prelude::*;
//!
//! let request = MapSectionRequest::new(
//!     RPoint::new(
//!         RValue::from_f64(-0.75, 64).unwrap(),
//!         RValue::from_f64(0.0, 64).unwrap(),
//!     ),
//!     RValue::from_f64(2.75, 64).unwrap(),
//!     4,
//!     1,
//!     100,
//!     56,
//! );
//!
//! let format = request.format().unwrap();
//! let engine = VecMath::new(format, request.block_width, request.threshold).unwrap();
//! let mut generator = MapSectionGeneratorVector::new(engine).unwrap();
//!
//! let response = generator.generate(&request).unwrap();
//! assert_eq!(response.counts, vec![100, 1, 1, 1]);
//! ```
//!
//! ## Scalar arithmetic
//!
//! ```rust
//! use mset_apfixed::prelude::*;
//!
//! let format = FixedPointFormat::new(8, 24).unwrap();
//! let mut math = ScalarMath2C::new(format, 4).unwrap();
//!
//! let a = math.create_number(&RValue::from_f64(-1.25, 32).unwrap()).unwrap();
//! let square = math.square(&a).unwrap();
//! assert_eq!(math.get_rvalue(&square).to_f64(), 1.5625);
//!
//! let twelve = math.create_number(&RValue::from_f64(12.0, 32).unwrap()).unwrap();
//! assert_eq!(math.square(&twelve), Err(FixedPointError::MultiplyOverflow));
//! ```

pub mod error;
pub mod format;
pub mod generator;
pub mod iterator;
pub mod limbs;
pub mod number;
pub mod rvalue;
pub mod scalar;
pub mod stats;
pub mod vector;

// Re-export the main types for convenience
pub use error::{FixedPointError, Result};
pub use format::FixedPointFormat;
pub use generator::{
    CompletionFlags, MapSectionGeneratorScalar, MapSectionGeneratorVector, MapSectionRequest,
    MapSectionResponse,
};
pub use iterator::{IteratorScalar, IteratorVector};
pub use number::{Smx, Smx2C};
pub use rvalue::{RPoint, RValue};
pub use scalar::{ScalarEngine, ScalarMath, ScalarMath2C};
pub use stats::ArithStats;
pub use vector::{FpValues, VecMath, VecMath2C, VectorEngine};

pub mod prelude {
    //! Prelude module for mset-apfixed.
    //!
    //! Re-exports the types and traits needed to build engines and generate
    //! map sections, so that a single glob import brings the engine traits
    //! into scope.

    pub use crate::error::FixedPointError;
    pub use crate::format::FixedPointFormat;
    pub use crate::generator::{
        CompletionFlags, MapSectionGeneratorScalar, MapSectionGeneratorVector, MapSectionRequest,
        MapSectionResponse,
    };
    pub use crate::iterator::{IteratorScalar, IteratorVector};
    pub use crate::number::{Smx, Smx2C};
    pub use crate::rvalue::{RPoint, RValue};
    pub use crate::scalar::{ScalarEngine, ScalarMath, ScalarMath2C};
    pub use crate::stats::ArithStats;
    pub use crate::vector::{FpValues, VecMath, VecMath2C, VectorEngine};
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use num_bigint::{BigInt, BigUint, Sign};
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use rstest::fixture;

    use crate::format::{BITS_PER_LIMB, FixedPointFormat, HIGH_MASK, LOW_MASK, SIGN_BIT_32};
    use crate::number::Smx;

    const EPSILON: f64 = 1e-8;
    static SEED: OnceLock<u64> = OnceLock::new();

    #[fixture]
    pub const fn n_experiments() -> usize {
        100_000
    }

    #[fixture]
    pub fn seed() -> u64 {
        *SEED.get_or_init(|| rand::rng().random())
    }

    #[fixture]
    pub fn rng(n_experiments: usize, seed: u64) -> impl Rng {
        println!("{} experiments with seed {}", n_experiments, seed);
        StdRng::seed_from_u64(seed)
    }

    #[track_caller]
    pub fn assert_almost_eq(a: f64, b: f64, message: &str) {
        let diff = (a - b).abs() / a.abs().max(b.abs()).max(1e-10);
        assert!(
            diff <= EPSILON,
            "{message}: {a:.5e} vs {b:.5e} ({diff:.2e} > {EPSILON:.2e})",
        );
    }

    pub fn random_f64(mut rng: impl Rng) -> f64 {
        loop {
            let float = f64::from_bits(rng.random());
            if float.is_finite() {
                return float;
            }
        }
    }

    pub fn random_biguint(mut rng: impl Rng, n_bits: usize) -> BigUint {
        let n_bytes = n_bits.div_ceil(8);
        let mut bytes = vec![0u8; n_bytes];
        rng.fill(&mut bytes[..]);
        let last_num_bits = n_bits % 8;
        if last_num_bits > 0 {
            bytes[n_bytes - 1] &= (1 << last_num_bits) - 1;
        }
        BigUint::from_bytes_le(&bytes)
    }

    pub fn random_bigint(mut rng: impl Rng, n_bits: usize) -> BigInt {
        let uint = random_biguint(&mut rng, n_bits - 1);
        if rng.random_bool(0.5) {
            BigInt::from_biguint(Sign::Plus, uint)
        } else {
            BigInt::from_biguint(Sign::Minus, uint)
        }
    }

    /// Random 32-bit limbs.
    pub fn random_limbs(mut rng: impl Rng, n: usize) -> Vec<u64> {
        (0..n).map(|_| u64::from(rng.random::<u32>())).collect()
    }

    /// Random valid two's complement limbs, never the most negative value.
    pub fn random_twos_complement(mut rng: impl Rng, n: usize) -> Vec<u64> {
        loop {
            let mut limbs = random_limbs(&mut rng, n);
            let msl = limbs[n - 1];
            if msl == SIGN_BIT_32 && limbs[..n - 1].iter().all(|&limb| limb == 0) {
                continue;
            }
            if msl & SIGN_BIT_32 != 0 {
                limbs[n - 1] = msl | HIGH_MASK;
            }
            return limbs;
        }
    }

    /// Random number of `format` whose integer part is below `max_integer`.
    pub fn random_smx(mut rng: impl Rng, format: &FixedPointFormat, max_integer: u64) -> Smx {
        let mut mantissa = random_limbs(&mut rng, format.limb_count());
        let fraction_bits = BITS_PER_LIMB - u32::from(format.bits_before_bp());
        let integer = rng.random_range(0..max_integer);
        let msl = mantissa.len() - 1;
        mantissa[msl] = (integer << fraction_bits) | (mantissa[msl] & (LOW_MASK >> format.bits_before_bp()));

        Smx::new(
            rng.random_bool(0.5),
            mantissa,
            format.target_exponent(),
            format.bits_before_bp(),
            format.fractional_bits(),
        )
    }
}
