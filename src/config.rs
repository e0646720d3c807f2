//! Process-wide compositing configuration.

use std::collections::HashSet;

use crate::foundation::error::{FloeError, FloeResult};
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat};

/// Multi-tile compositing strategy. Only binary swap is offered; the
/// single-tile pipeline hands the whole composite area to the single-image
/// strategy below.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Strategy {
    /// Reduce every tile with binary swap.
    #[default]
    BinarySwap,
}

/// How a single image is reduced across a compose group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SingleImageStrategy {
    /// Binary swap with telescoping for non-power-of-two groups.
    #[default]
    BinarySwap,
    /// Binary swap with odd/even folding for non-power-of-two groups.
    BinarySwapFolding,
}

/// One display tile of the composited area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tile {
    /// Left edge of the tile in the global display, in pixels.
    pub x: i32,
    /// Top edge of the tile in the global display, in pixels.
    pub y: i32,
    /// Tile width in pixels.
    pub width: usize,
    /// Tile height in pixels.
    pub height: usize,
    /// Rank that displays this tile.
    pub display_rank: usize,
}

/// Compositing context configuration, set once per context.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Color format every rank renders into.
    pub color_format: ColorFormat,
    /// Depth format every rank renders into.
    pub depth_format: DepthFormat,
    /// Visibility rule used when combining fragments.
    pub composite_mode: CompositeMode,
    /// Multi-tile strategy.
    pub strategy: Strategy,
    /// Single-image reduction algorithm.
    pub single_image_strategy: SingleImageStrategy,
    /// Permute pixels before swapping to balance active pixels across
    /// partitions.
    pub interlace_images: bool,
    /// Communicator ranks in compose order (front first). Empty means
    /// natural rank order over the whole communicator.
    pub compose_order: Vec<usize>,
    /// Display tiles; the in-scope pipeline supports a single tile covering
    /// the composite area.
    pub tiles: Vec<Tile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_format: ColorFormat::RgbaU8,
            depth_format: DepthFormat::F32,
            composite_mode: CompositeMode::ZBuffer,
            strategy: Strategy::BinarySwap,
            single_image_strategy: SingleImageStrategy::BinarySwap,
            interlace_images: true,
            compose_order: Vec::new(),
            tiles: Vec::new(),
        }
    }
}

impl Config {
    /// Check internal consistency.
    pub fn validate(&self) -> FloeResult<()> {
        if self.tiles.len() > 1 {
            return Err(FloeError::invalid_operation(
                "only a single display tile is supported",
            ));
        }
        let mut seen = HashSet::new();
        for &rank in &self.compose_order {
            if !seen.insert(rank) {
                return Err(FloeError::invalid_value(
                    "compose order lists a rank twice",
                ));
            }
        }
        if self.composite_mode == CompositeMode::Blend
            && self.color_format == ColorFormat::RgbF32
        {
            return Err(FloeError::invalid_operation(
                "blending requires a color format with an alpha channel",
            ));
        }
        if self.composite_mode == CompositeMode::ZBuffer
            && self.depth_format == DepthFormat::None
        {
            return Err(FloeError::invalid_operation(
                "z-buffer compositing requires a depth buffer",
            ));
        }
        Ok(())
    }
}
