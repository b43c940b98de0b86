use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::generator::{MapSectionRequest, MapSectionResponse, build_sample_points};
use crate::iterator::IteratorScalar;
use crate::scalar::ScalarEngine;

/// Generates map sections one sample point at a time.
#[derive(Debug, Clone)]
pub struct MapSectionGeneratorScalar<E: ScalarEngine> {
    iterator: IteratorScalar<E>,
}

impl<E: ScalarEngine> MapSectionGeneratorScalar<E> {
    pub fn new(engine: E) -> Self {
        Self {
            iterator: IteratorScalar::new(engine),
        }
    }

    pub fn engine(&self) -> &E {
        self.iterator.engine()
    }

    pub fn into_engine(self) -> E {
        self.iterator.into_engine()
    }

    /// Escape counts for every point of the block.
    ///
    /// # Errors
    ///
    /// Fails on an invalid request, on a request whose format or threshold
    /// differ from the engine's, and when a sample point or an intermediate
    /// product does not fit the format.
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
        let format = request.check_engine(engine.format(), engine.threshold())?;
        let points = build_sample_points(request, format)?;

        let c_rs = points
            .x
            .iter()
            .map(|x| engine.from_smx(x))
            .collect::<Result<Vec<_>>>()?;
        let c_is = points
            .y
            .iter()
            .map(|y| engine.from_smx(y))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            limb_count = format.limb_count(),
            "generating map section one point at a time"
        );

        let mut counts = Vec::with_capacity(request.sample_count());
        for c_i in &c_is {
            for c_r in &c_rs {
                counts.push(self.iterator.iterate(c_r, c_i, request.target_iterations)?);
            }
        }

        debug!(stats = ?self.iterator.engine().stats(), "map section complete");
        Ok(counts)
    }
}
