//! # Escape-time iteration
//!
//! Both iterators advance `z ← z² + c` using three squares per step:
//!
//! ```text
//! zr' = zr² − zi² + cr
//! zi' = (zr + zi)² − zr² − zi² + ci
//! ```
//!
//! [`IteratorScalar`] runs one point to completion. [`IteratorVector`] only
//! advances every in-play lane by one step; deciding when a lane is finished
//! is left to the caller.

use tracing::trace;

use crate::error::Result;
use crate::scalar::ScalarEngine;
use crate::vector::{FpValues, VectorEngine};

/// Iterates single points on a scalar engine.
#[derive(Debug, Clone)]
pub struct IteratorScalar<E: ScalarEngine> {
    engine: E,
}

impl<E: ScalarEngine> IteratorScalar<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Counts the steps until `c` escapes, at most `target_iterations`.
    ///
    /// Starting from `z = 0`, the count is the first `n` for which
    /// `|z_n|² ≥ threshold`. An addition that saturates ends the point at the
    /// current step.
    ///
    /// # Errors
    ///
    /// Returns [`FixedPointError::MultiplyOverflow`] when a square does not
    /// fit the format.
    ///
    /// [`FixedPointError::MultiplyOverflow`]: crate::error::FixedPointError::MultiplyOverflow
    pub fn iterate(&mut self, c_r: &E::Number, c_i: &E::Number, target_iterations: u16) -> Result<u16> {
        let engine = &mut self.engine;
        let mut zr = engine.zero();
        let mut zi = engine.zero();
        let mut zr_sqr = engine.zero();
        let mut zi_sqr = engine.zero();

        let mut count = 0;
        while count < target_iterations {
            count += 1;
            let saturations = engine.stats().add_carries;

            let sum = engine.add(&zr, &zi)?;
            if engine.stats().add_carries != saturations {
                break;
            }
            let sum_sqr = engine.square(&sum)?;
            let cross = engine.sub(&sum_sqr, &zr_sqr)?;
            let cross = engine.sub(&cross, &zi_sqr)?;
            let next_zi = engine.add(&cross, c_i)?;

            let difference = engine.sub(&zr_sqr, &zi_sqr)?;
            zr = engine.add(&difference, c_r)?;
            zi = next_zi;
            if engine.stats().add_carries != saturations {
                break;
            }

            zr_sqr = engine.square(&zr)?;
            zi_sqr = engine.square(&zi)?;
            let sum_of_squares = engine.add(&zr_sqr, &zi_sqr)?;
            if engine.stats().add_carries != saturations
                || engine.is_greater_or_eq_than_threshold(&sum_of_squares)
            {
                break;
            }
        }
        Ok(count)
    }
}

/// Advances many points at once on a vector engine.
///
/// Holds the iteration state of every lane. The engine's lane state decides
/// which groups are touched.
#[derive(Debug, Clone)]
pub struct IteratorVector<E: VectorEngine> {
    engine: E,
    zr: FpValues,
    zi: FpValues,
    zr_sqr: FpValues,
    zi_sqr: FpValues,
    sum_of_squares: FpValues,
    temp: FpValues,
    temp2: FpValues,
}

impl<E: VectorEngine> IteratorVector<E> {
    pub fn new(engine: E) -> Result<Self> {
        let zero = engine.zero_values()?;
        Ok(Self {
            engine,
            zr: zero.clone(),
            zi: zero.clone(),
            zr_sqr: zero.clone(),
            zi_sqr: zero.clone(),
            sum_of_squares: zero.clone(),
            temp: zero.clone(),
            temp2: zero,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn zr(&self) -> &FpValues {
        &self.zr
    }

    pub fn zi(&self) -> &FpValues {
        &self.zi
    }

    pub fn sum_of_squares(&self) -> &FpValues {
        &self.sum_of_squares
    }

    /// Sets every lane back to `z = 0` and puts every group in play.
    pub fn reset(&mut self) -> Result<()> {
        let zero = self.engine.zero_values()?;
        for values in [
            &mut self.zr,
            &mut self.zi,
            &mut self.zr_sqr,
            &mut self.zi_sqr,
            &mut self.sum_of_squares,
        ] {
            values.clone_from(&zero);
        }
        self.engine.lane_state_mut().reset();
        Ok(())
    }

    /// One step for every active lane of every in-play group.
    ///
    /// Lanes that saturate during the step are marked done by the engine and
    /// keep their last value.
    pub fn iterate(&mut self, c_r: &FpValues, c_i: &FpValues) -> Result<()> {
        let Self {
            engine,
            zr,
            zi,
            zr_sqr,
            zi_sqr,
            sum_of_squares,
            temp,
            temp2,
        } = self;
        trace!(in_play = engine.in_play_list().len(), "vector step");

        engine.add(zr, zi, temp)?;
        engine.square(temp, temp2)?;
        engine.sub(temp2, zr_sqr, temp)?;
        engine.sub(temp, zi_sqr, temp2)?;
        engine.add(temp2, c_i, zi)?;

        engine.sub(zr_sqr, zi_sqr, temp)?;
        engine.add(temp, c_r, zr)?;

        engine.square(zr, zr_sqr)?;
        engine.square(zi, zi_sqr)?;
        engine.add(zr_sqr, zi_sqr, sum_of_squares)
    }

    /// Escape flags of the current sums of squares, for in-play groups.
    pub fn escaped(&mut self, results: &mut [bool]) {
        self.engine.is_greater_or_eq_than_threshold(&self.sum_of_squares, results);
    }
}
