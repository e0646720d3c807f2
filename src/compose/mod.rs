//! The distributed compositing engine and its session facade.

pub mod bswap;
pub mod pool;

use crate::codec::compress::CompressOptions;
use crate::codec::{composite, compress, decompress};
use crate::comm::Communicator;
use crate::compose::bswap::BinarySwap;
use crate::compose::pool::ScratchPool;
use crate::config::{Config, SingleImageStrategy};
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::dense::DenseImage;
use crate::image::sparse::SparseImage;

/// Session-oriented entry point tying configuration, scratch buffers, and
/// the codec together.
///
/// One compositor per rank; instances are single-threaded and not
/// reentrant.
pub struct Compositor {
    config: Config,
    pool: ScratchPool,
}

impl Compositor {
    /// Create a compositor from a validated configuration.
    pub fn new(config: Config) -> FloeResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: ScratchPool::new(),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compress a locally rendered dense image under the configured
    /// composite mode.
    pub fn compress(&self, image: &DenseImage) -> FloeResult<SparseImage> {
        if image.color_format() != self.config.color_format
            || image.depth_format() != self.config.depth_format
        {
            return Err(FloeError::invalid_value(
                "image formats do not match the configured formats",
            ));
        }
        compress::compress(
            image,
            self.config.composite_mode,
            &CompressOptions::default(),
        )
    }

    /// Decompress a sparse image (a reduction result piece, usually) into a
    /// dense image.
    pub fn decompress(
        &self,
        sparse: &SparseImage,
        background: decompress::Background,
    ) -> FloeResult<DenseImage> {
        decompress::decompress(sparse, background)
    }

    /// Composite two sparse images directly.
    pub fn composite(
        &self,
        front: &SparseImage,
        back: &SparseImage,
    ) -> FloeResult<SparseImage> {
        composite::composite(front, back)
    }

    /// Reduce `input` across the communicator with the configured
    /// single-image strategy; returns this rank's piece of the composited
    /// image and its pixel offset.
    pub fn binary_swap<C: Communicator>(
        &mut self,
        comm: &C,
        input: SparseImage,
    ) -> FloeResult<(SparseImage, usize)> {
        let group: Vec<usize> = if self.config.compose_order.is_empty() {
            (0..comm.size()).collect()
        } else {
            self.config.compose_order.clone()
        };
        for &rank in &group {
            if rank >= comm.size() {
                return Err(FloeError::invalid_value(
                    "compose order names a rank outside the communicator",
                ));
            }
        }
        let mut engine = BinarySwap::new(comm, &mut self.pool, self.config.interlace_images);
        match self.config.single_image_strategy {
            SingleImageStrategy::BinarySwap => engine.compose(&group, input),
            SingleImageStrategy::BinarySwapFolding => engine.folding_compose(&group, input),
        }
    }
}
