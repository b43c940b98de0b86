use tracing::{debug, instrument, trace, warn};

use crate::error::{FixedPointError, Result};
use crate::generator::{MapSectionRequest, MapSectionResponse, build_sample_points};
use crate::iterator::IteratorVector;
use crate::stats::ArithStats;
use crate::vector::{FpValues, LANES, LaneState, VectorEngine};

/// Generates map sections a row at a time, one lane per column.
#[derive(Debug, Clone)]
pub struct MapSectionGeneratorVector<E: VectorEngine> {
    iterator: IteratorVector<E>,
    escaped: Vec<bool>,
    finished: Vec<bool>,
    stats: ArithStats,
}

/// Counts one more step for every unfinished lane and retires the lanes that
/// escaped, saturated or reached the target.
///
/// A retired lane's count is never touched again.
pub(crate) fn update_the_done_flags(
    lane_state: &mut LaneState,
    escaped: &[bool],
    counts: &mut [u16],
    finished: &mut [bool],
    target_iterations: u16,
) {
    for lane in 0..counts.len() {
        if finished[lane] {
            continue;
        }
        counts[lane] += 1;
        if escaped[lane] || lane_state.is_done(lane) || counts[lane] >= target_iterations {
            finished[lane] = true;
            lane_state.mark_done(lane);
        }
    }
    lane_state.update_in_play_list();
}

impl<E: VectorEngine> MapSectionGeneratorVector<E> {
    /// The engine's value count fixes the block width this generator accepts.
    pub fn new(engine: E) -> Result<Self> {
        let value_count = engine.value_count();
        Ok(Self {
            iterator: IteratorVector::new(engine)?,
            escaped: vec![false; value_count],
            finished: vec![false; value_count],
            stats: ArithStats::default(),
        })
    }

    pub fn engine(&self) -> &E {
        self.iterator.engine()
    }

    pub fn into_engine(self) -> E {
        self.iterator.into_engine()
    }

    /// Engine counters summed over the rows of the last block. The engine's
    /// own counters only cover the last row.
    pub fn stats(&self) -> ArithStats {
        self.stats
    }

    /// Escape counts for every point of the block.
    ///
    /// # Errors
    ///
    /// Fails on an invalid request, when the block width differs from the
    /// engine's value count, when the format or threshold differ from the
    /// engine's, and when a sample point or a product does not fit the format.
    #[instrument(
        skip_all,
        fields(
            width = request.block_width,
            height = request.block_height,
            target = request.target_iterations
        )
    )]
    pub fn generate(&mut self, request: &MapSectionRequest) -> Result<MapSectionResponse> {
        self.generate_counts(request)
            .map(|counts| MapSectionResponse::from_counts(counts, request.target_iterations))
            .inspect_err(|error| warn!(%error, "map section is not computable in this format"))
    }

    fn generate_counts(&mut self, request: &MapSectionRequest) -> Result<Vec<u16>> {
        request.validate()?;
        let engine = self.iterator.engine();
        let value_count = engine.value_count();
        if request.block_width != value_count {
            return Err(FixedPointError::LengthMismatch {
                left: value_count,
                right: request.block_width,
            });
        }
        let format = request.check_engine(engine.format(), engine.threshold())?;
        let points = build_sample_points(request, format)?;
        let c_rs = engine.create_values(&points.x)?;
        debug!(
            limb_count = format.limb_count(),
            vec_count = value_count / LANES,
            "generating map section a row at a time"
        );

        self.stats = ArithStats::default();
        let mut counts = vec![0; request.sample_count()];
        for (row, y) in points.y.iter().enumerate() {
            let c_is = self.iterator.engine().duplicate(y)?;
            let row_counts = &mut counts[row * value_count..(row + 1) * value_count];
            self.generate_row(&c_rs, &c_is, row_counts, request.target_iterations)?;
        }

        debug!(stats = ?self.stats, "map section complete");
        Ok(counts)
    }

    fn generate_row(
        &mut self,
        c_rs: &FpValues,
        c_is: &FpValues,
        counts: &mut [u16],
        target_iterations: u16,
    ) -> Result<()> {
        self.iterator.reset()?;
        self.iterator.engine_mut().reset_stats();
        self.finished.fill(false);
        self.escaped.fill(false);

        let mut passes = 0_u32;
        while !self.iterator.engine().lane_state().is_finished() {
            self.iterator.iterate(c_rs, c_is)?;
            self.iterator.escaped(&mut self.escaped);
            update_the_done_flags(
                self.iterator.engine_mut().lane_state_mut(),
                &self.escaped,
                counts,
                &mut self.finished,
                target_iterations,
            );
            passes += 1;
            trace!(
                passes,
                in_play = self.iterator.engine().in_play_list().len(),
                "row pass complete"
            );
        }
        self.stats += self.iterator.engine().stats();
        Ok(())
    }
}
