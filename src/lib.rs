//! Floe is a parallel image compositor for sort-last distributed rendering.
//!
//! Each participating process renders part of a 3D scene into a local image;
//! floe combines the per-process images into one final image with correct
//! visibility across the whole scene, supporting both z-buffer visibility
//! (nearest fragment wins) and alpha blending with the non-commutative
//! *over* operator.
//!
//! The crate is built around two pieces:
//!
//! - A **sparse image codec**: run-length-encoded images (with a layered
//!   variant keeping multiple depth-sorted fragments per pixel), the
//!   compress / decompress / scan / split / interlace primitives over them,
//!   and a compressed-compressed [`composite`] that merges two sparse
//!   images without materializing dense pixels.
//! - A **binary-swap engine** ([`BinarySwap`]) driving an all-to-all
//!   partitioned reduction over a [`Communicator`] of `P` ranks, yielding on
//!   each rank a contiguous piece of the final image plus its pixel offset.
//!
//! Rendering, display, and the message-passing fabric are external
//! collaborators: plug in any transport with ordered point-to-point
//! delivery by implementing [`Communicator`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod comm;
pub mod compose;
mod config;
mod foundation;
pub mod image;

pub use crate::codec::composite::{composite, composite_in};
pub use crate::codec::compress::{CompressOptions, Padding, Region, compress, compress_in};
pub use crate::codec::decompress::{Background, decompress, decompress_into};
pub use crate::codec::scan::{
    bit_reverse, interlace_alloc, interlace_into_buffer, interlace_offset, split_alloc,
    split_into_buffers,
};
pub use crate::comm::local::LocalCommunicator;
pub use crate::comm::{Communicator, MessageTag, RecvRequest};
pub use crate::compose::Compositor;
pub use crate::compose::bswap::BinarySwap;
pub use crate::compose::pool::{BufferId, ScratchPool};
pub use crate::config::{Config, SingleImageStrategy, Strategy, Tile};
pub use crate::foundation::error::{FloeError, FloeResult};
pub use crate::image::dense::DenseImage;
pub use crate::image::format::{ColorFormat, CompositeMode, DepthFormat, FragmentLayout};
pub use crate::image::sparse::{
    SPARSE_HEADER_SIZE, SPARSE_MAGIC, SparseImage, max_buffer_size,
};
