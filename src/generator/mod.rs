//! # Map section generation
//!
//! A map section is a rectangular block of sample points. Point `(i, j)` of
//! the block is
//!
//! ```text
//! c = (position.x + delta × i) + (position.y + delta × j)·i
//! ```
//!
//! and its escape count lands at index `j × block_width + i` of the response.
//!
//! [`MapSectionGeneratorScalar`] iterates one point at a time.
//! [`MapSectionGeneratorVector`] iterates a whole row at once and needs an
//! engine sized to the block width.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};
use crate::format::FixedPointFormat;
use crate::number::Smx;
use crate::rvalue::{RPoint, RValue};
use crate::scalar::{ScalarEngine, ScalarMath};

pub mod scalar;
pub mod vector;

pub use scalar::MapSectionGeneratorScalar;
pub use vector::MapSectionGeneratorVector;

pub const DEFAULT_THRESHOLD: u32 = 4;
pub const DEFAULT_BITS_BEFORE_BINARY_POINT: u8 = 8;

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_bits_before_binary_point() -> u8 {
    DEFAULT_BITS_BEFORE_BINARY_POINT
}

/// What to compute for one block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapSectionRequest {
    /// Value of `c` at the first sample point.
    pub position: RPoint,
    /// Distance between neighbouring sample points, on both axes.
    pub sample_point_delta: RValue,
    pub block_width: usize,
    pub block_height: usize,
    pub target_iterations: u16,
    /// Fractional bits of the fixed-point format.
    pub precision: u32,
    #[cfg_attr(feature = "serde", serde(default = "default_threshold"))]
    pub threshold: u32,
    #[cfg_attr(feature = "serde", serde(default = "default_bits_before_binary_point"))]
    pub bits_before_binary_point: u8,
}

impl MapSectionRequest {
    pub fn new(
        position: RPoint,
        sample_point_delta: RValue,
        block_width: usize,
        block_height: usize,
        target_iterations: u16,
        precision: u32,
    ) -> Self {
        Self {
            position,
            sample_point_delta,
            block_width,
            block_height,
            target_iterations,
            precision,
            threshold: default_threshold(),
            bits_before_binary_point: default_bits_before_binary_point(),
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_bits_before_binary_point(mut self, bits_before_binary_point: u8) -> Self {
        self.bits_before_binary_point = bits_before_binary_point;
        self
    }

    /// The format every number of this block is computed in.
    pub fn format(&self) -> Result<FixedPointFormat> {
        FixedPointFormat::new_adjusted(self.bits_before_binary_point, self.precision)
    }

    pub fn sample_count(&self) -> usize {
        self.block_width * self.block_height
    }

    /// Checks the block shape and the iteration target.
    pub fn validate(&self) -> Result<()> {
        if self.target_iterations == 0 {
            return Err(FixedPointError::InvalidTargetIterations);
        }
        if self.block_width == 0 || self.block_height == 0 {
            return Err(FixedPointError::EmptyBlock {
                width: self.block_width,
                height: self.block_height,
            });
        }
        self.format().map(|_| ())
    }

    /// Fails unless `format` and `threshold` are the ones this request asks for.
    pub(crate) fn check_engine(&self, format: &FixedPointFormat, threshold: u32) -> Result<FixedPointFormat> {
        let expected = self.format()?;
        if *format != expected || threshold != self.threshold {
            return Err(FixedPointError::EngineMismatch {
                bits_before_bp: expected.bits_before_bp(),
                fractional_bits: expected.fractional_bits(),
                threshold: self.threshold,
            });
        }
        Ok(expected)
    }
}

/// Which points of a block reached a final count.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompletionFlags {
    AllComplete,
    NoneComplete,
    Mixed(Vec<bool>),
}

impl CompletionFlags {
    /// Whether point `index` is complete.
    pub fn is_complete(&self, index: usize) -> bool {
        match self {
            Self::AllComplete => true,
            Self::NoneComplete => false,
            Self::Mixed(flags) => flags[index],
        }
    }

    /// One flag per point.
    pub fn expand(&self, len: usize) -> Vec<bool> {
        match self {
            Self::Mixed(flags) => flags.clone(),
            _ => vec![self.is_complete(0); len],
        }
    }
}

pub fn compress_done_flags(done_flags: &[bool]) -> CompletionFlags {
    if done_flags.iter().all(|&done| done) {
        CompletionFlags::AllComplete
    } else if done_flags.iter().all(|&done| !done) {
        CompletionFlags::NoneComplete
    } else {
        CompletionFlags::Mixed(done_flags.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapSectionResponse {
    /// Escape counts in row-major block order.
    pub counts: Vec<u16>,
    /// A point is complete when it escaped before the iteration target, so
    /// its count would not change at a higher target.
    pub done_flags: CompletionFlags,
}

impl MapSectionResponse {
    pub fn from_counts(counts: Vec<u16>, target_iterations: u16) -> Self {
        let done_flags: Vec<bool> = counts.iter().map(|&count| count < target_iterations).collect();
        Self {
            done_flags: compress_done_flags(&done_flags),
            counts,
        }
    }
}

/// Real parts of a block's columns and imaginary parts of its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePoints {
    pub x: Vec<Smx>,
    pub y: Vec<Smx>,
}

/// Builds the sample point coordinates of a request in `format`.
pub fn build_sample_points(request: &MapSectionRequest, format: FixedPointFormat) -> Result<SamplePoints> {
    let mut math = ScalarMath::new(format, request.threshold)?;
    let start_x = math.create_number(&request.position.x)?;
    let start_y = math.create_number(&request.position.y)?;
    let delta = math.create_number(&request.sample_point_delta)?;

    let x_offsets = math.build_sample_point_offsets(&delta, request.block_width)?;
    let y_offsets = math.build_sample_point_offsets(&delta, request.block_height)?;
    Ok(SamplePoints {
        x: math.build_sample_points(&start_x, &x_offsets)?,
        y: math.build_sample_points(&start_y, &y_offsets)?,
    })
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn request() -> MapSectionRequest {
        MapSectionRequest::new(
            RPoint::new(
                RValue::from_f64(-2.0, 64).unwrap(),
                RValue::from_f64(-1.0, 64).unwrap(),
            ),
            RValue::from_f64(0.375, 64).unwrap(),
            8,
            4,
            50,
            56,
        )
    }

    #[rstest]
    #[case(vec![true, true, true], CompletionFlags::AllComplete)]
    #[case(vec![false, false], CompletionFlags::NoneComplete)]
    #[case(vec![true, false, true], CompletionFlags::Mixed(vec![true, false, true]))]
    fn test_compress_done_flags(#[case] flags: Vec<bool>, #[case] expected: CompletionFlags) {
        let compressed = compress_done_flags(&flags);
        assert_eq!(compressed, expected);
        assert_eq!(compressed.expand(flags.len()), flags);
    }

    #[rstest]
    fn test_response_done_flags() {
        let response = MapSectionResponse::from_counts(vec![1, 100, 7], 100);
        assert_eq!(response.done_flags, CompletionFlags::Mixed(vec![true, false, true]));
        assert!(!response.done_flags.is_complete(1));

        let response = MapSectionResponse::from_counts(vec![100, 100], 100);
        assert_eq!(response.done_flags, CompletionFlags::NoneComplete);
    }

    #[rstest]
    fn test_validate(request: MapSectionRequest) {
        assert_eq!(request.validate(), Ok(()));
        assert_eq!(request.format().unwrap().limb_count(), 2);

        let mut invalid = request.clone();
        invalid.target_iterations = 0;
        assert_eq!(invalid.validate(), Err(FixedPointError::InvalidTargetIterations));

        let mut invalid = request.clone();
        invalid.block_height = 0;
        assert_eq!(
            invalid.validate(),
            Err(FixedPointError::EmptyBlock { width: 8, height: 0 })
        );

        let invalid = request.with_bits_before_binary_point(40);
        assert_eq!(invalid.validate(), Err(FixedPointError::BitsBeforeBinaryPoint(40)));
    }

    #[rstest]
    fn test_check_engine(request: MapSectionRequest) {
        let format = request.format().unwrap();
        assert_eq!(request.check_engine(&format, 4), Ok(format));
        assert!(request.check_engine(&format, 8).is_err());

        let other = FixedPointFormat::new_adjusted(8, 24).unwrap();
        assert_eq!(
            request.check_engine(&other, 4),
            Err(FixedPointError::EngineMismatch {
                bits_before_bp: 8,
                fractional_bits: 56,
                threshold: 4
            })
        );
    }

    #[rstest]
    fn test_sample_points(request: MapSectionRequest) {
        let points = build_sample_points(&request, request.format().unwrap()).unwrap();
        let x: Vec<f64> = points.x.iter().map(Smx::to_f64).collect();
        let y: Vec<f64> = points.y.iter().map(Smx::to_f64).collect();
        assert_eq!(x, vec![-2.0, -1.625, -1.25, -0.875, -0.5, -0.125, 0.25, 0.625]);
        assert_eq!(y, vec![-1.0, -0.625, -0.25, 0.125]);
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn test_request_serde_round_trip(request: MapSectionRequest) {
        let json = serde_json::to_string(&request).unwrap();
        let decoded: MapSectionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, request);
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn test_request_defaults(request: MapSectionRequest) {
        let mut json = serde_json::to_value(&request).unwrap();
        let object = json.as_object_mut().unwrap();
        object.remove("threshold");
        object.remove("bits_before_binary_point");

        let decoded: MapSectionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.threshold, DEFAULT_THRESHOLD);
        assert_eq!(decoded.bits_before_binary_point, DEFAULT_BITS_BEFORE_BINARY_POINT);
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn test_response_serde_round_trip() {
        let response = MapSectionResponse::from_counts(vec![3, 50, 50, 12], 50);
        let json = serde_json::to_string(&response).unwrap();
        let decoded: MapSectionResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, response);
    }
}
