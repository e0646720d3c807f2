//! Dense → sparse compression.
//!
//! One single-pass run loop, monomorphized over a `DenseSource` that knows
//! how to test a pixel's activity and encode its payload. The format and
//! mode are resolved once per call; the per-pixel path never branches on
//! them.

use crate::codec::runs::RunWriter;
use crate::foundation::bytes::ByteWriter;
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::dense::DenseImage;
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat};
use crate::image::sparse::SparseImage;

/// Rectangular sub-region of the input image to compress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// Left edge of the region, in pixels.
    pub x: usize,
    /// Top edge of the region, in pixels.
    pub y: usize,
    /// Region width in pixels.
    pub width: usize,
    /// Region height in pixels.
    pub height: usize,
}

/// Inactive borders emitted around the compressed panel, enlarging the
/// output image relative to the input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Padding {
    /// Inactive columns on the left of each row.
    pub left: usize,
    /// Inactive columns on the right of each row.
    pub right: usize,
    /// Inactive rows above the panel.
    pub top: usize,
    /// Inactive rows below the panel.
    pub bottom: usize,
}

/// Optional geometry adjustments for [`compress`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressOptions {
    /// Compress only this region of the input (default: the whole image).
    pub region: Option<Region>,
    /// Surround the output with inactive borders.
    pub padding: Option<Padding>,
}

/// Compress a dense image into a freshly allocated sparse image.
pub fn compress(
    image: &DenseImage,
    mode: CompositeMode,
    opts: &CompressOptions,
) -> FloeResult<SparseImage> {
    compress_in(Vec::new(), image, mode, opts)
}

/// Compress a dense image, reusing `buffer` for the output allocation.
pub fn compress_in(
    buffer: Vec<u8>,
    image: &DenseImage,
    mode: CompositeMode,
    opts: &CompressOptions,
) -> FloeResult<SparseImage> {
    let region = opts.region.unwrap_or(Region {
        x: 0,
        y: 0,
        width: image.width(),
        height: image.height(),
    });
    if region.x + region.width > image.width() || region.y + region.height > image.height() {
        return Err(FloeError::sanity_check(
            "compress region does not fit inside the input image",
        ));
    }
    let padding = opts.padding.unwrap_or_default();
    let out_width = padding.left + region.width + padding.right;
    let out_height = padding.top + region.height + padding.bottom;
    let geometry = Geometry {
        image_width: image.width(),
        region,
        padding,
        out_width,
    };

    let sparse = match mode {
        CompositeMode::ZBuffer => {
            let depth = image.depth().map_err(|_| {
                FloeError::invalid_operation("cannot use z-buffer compression with no z buffer")
            })?;
            let mut sparse = SparseImage::allocate_in(
                buffer,
                image.color_format(),
                DepthFormat::F32,
                out_width,
                out_height,
            )?;
            if image.is_layered() {
                // Only the nearest fragment survives, so the output is flat.
                let layers = image.num_layers();
                match image.color_format() {
                    ColorFormat::None => run_source(
                        &ZLayered {
                            color: NoColorSrc,
                            depth,
                            layers,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbaU8 => run_source(
                        &ZLayered {
                            color: RgbaU8Src(image.color_rgba_u8()?),
                            depth,
                            layers,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbF32 => run_source(
                        &ZLayered {
                            color: RgbF32Src(image.color_rgb_f32()?),
                            depth,
                            layers,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbaF32 => run_source(
                        &ZLayered {
                            color: RgbaF32Src(image.color_rgba_f32()?),
                            depth,
                            layers,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                }
            } else {
                match image.color_format() {
                    ColorFormat::None => run_source(
                        &ZFlat {
                            color: NoColorSrc,
                            depth,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbaU8 => run_source(
                        &ZFlat {
                            color: RgbaU8Src(image.color_rgba_u8()?),
                            depth,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbF32 => run_source(
                        &ZFlat {
                            color: RgbF32Src(image.color_rgb_f32()?),
                            depth,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                    ColorFormat::RgbaF32 => run_source(
                        &ZFlat {
                            color: RgbaF32Src(image.color_rgba_f32()?),
                            depth,
                        },
                        &geometry,
                        &mut sparse,
                    )?,
                }
            }
            sparse
        }
        CompositeMode::Blend if image.is_layered() => {
            // The over-operator is non-commutative, so fragments are kept
            // separate until final decompression; the output stays layered.
            let layers = image.num_layers();
            let depth = image.depth()?;
            let mut sparse = SparseImage::allocate_layered_in(
                buffer,
                image.color_format(),
                DepthFormat::F32,
                out_width,
                out_height,
                layers,
            )?;
            match image.color_format() {
                ColorFormat::RgbaU8 => run_source(
                    &BlendLayered {
                        color: RgbaU8Src(image.color_rgba_u8()?),
                        depth,
                        layers,
                    },
                    &geometry,
                    &mut sparse,
                )?,
                ColorFormat::RgbaF32 => run_source(
                    &BlendLayered {
                        color: RgbaF32Src(image.color_rgba_f32()?),
                        depth,
                        layers,
                    },
                    &geometry,
                    &mut sparse,
                )?,
                ColorFormat::RgbF32 | ColorFormat::None => {
                    return Err(FloeError::invalid_operation(
                        "blending requires a color format with an alpha channel",
                    ));
                }
            }
            sparse
        }
        CompositeMode::Blend => {
            if image.depth_format() != DepthFormat::None {
                tracing::warn!(
                    "z buffer ignored during blend compression; the output carries no depth"
                );
            }
            match image.color_format() {
                ColorFormat::RgbaU8 => {
                    let mut sparse = SparseImage::allocate_in(
                        buffer,
                        ColorFormat::RgbaU8,
                        DepthFormat::None,
                        out_width,
                        out_height,
                    )?;
                    run_source(
                        &BlendFlat {
                            color: RgbaU8Src(image.color_rgba_u8()?),
                        },
                        &geometry,
                        &mut sparse,
                    )?;
                    sparse
                }
                ColorFormat::RgbaF32 => {
                    let mut sparse = SparseImage::allocate_in(
                        buffer,
                        ColorFormat::RgbaF32,
                        DepthFormat::None,
                        out_width,
                        out_height,
                    )?;
                    run_source(
                        &BlendFlat {
                            color: RgbaF32Src(image.color_rgba_f32()?),
                        },
                        &geometry,
                        &mut sparse,
                    )?;
                    sparse
                }
                ColorFormat::RgbF32 => {
                    return Err(FloeError::invalid_operation(
                        "blending requires a color format with an alpha channel",
                    ));
                }
                ColorFormat::None => {
                    // Well-defined but meaningless; emit an all-inactive
                    // stream so downstream composites still line up.
                    tracing::warn!("blend-compressing an image with no color data");
                    let mut sparse = SparseImage::allocate_in(
                        buffer,
                        ColorFormat::None,
                        DepthFormat::None,
                        out_width,
                        out_height,
                    )?;
                    sparse.set_dimensions(out_width, out_height)?;
                    sparse
                }
            }
        }
    };

    let dense_bytes = image.fragment_count()
        * (image.color_format().color_size() + image.depth_format().depth_size());
    tracing::debug!(
        compressed = sparse.actual_byte_size(),
        dense = dense_bytes,
        "compressed image"
    );
    Ok(sparse)
}

struct Geometry {
    image_width: usize,
    region: Region,
    padding: Padding,
    out_width: usize,
}

/// Activity test plus payload encoder for one dense layout and mode.
trait DenseSource {
    fn is_active(&self, pixel: usize) -> bool;
    /// Encode the pixel's payload; returns the stored fragment count.
    fn write_pixel(&self, pixel: usize, rw: &mut RunWriter<'_>) -> FloeResult<usize>;
}

fn run_source<S: DenseSource>(
    src: &S,
    geometry: &Geometry,
    sparse: &mut SparseImage,
) -> FloeResult<()> {
    let layered = sparse.is_layered();
    let mut rw = RunWriter::new(ByteWriter::new(sparse.payload_mut()), layered);
    rw.add_inactive(geometry.padding.top * geometry.out_width)?;
    for row in 0..geometry.region.height {
        rw.add_inactive(geometry.padding.left)?;
        let base = (geometry.region.y + row) * geometry.image_width + geometry.region.x;
        for col in 0..geometry.region.width {
            let pixel = base + col;
            if src.is_active(pixel) {
                rw.begin_active_pixel()?;
                let frags = src.write_pixel(pixel, &mut rw)?;
                rw.add_fragments(frags);
            } else {
                rw.add_inactive(1)?;
            }
        }
        rw.add_inactive(geometry.padding.right)?;
    }
    rw.add_inactive(geometry.padding.bottom * geometry.out_width)?;
    let len = rw.finish()?;
    sparse.finish_payload(len)
}

/// Per-format color reader used by the sources below.
trait ColorSrc {
    fn alpha_nonzero(&self, frag: usize) -> bool;
    fn write_color(&self, frag: usize, w: &mut ByteWriter<'_>) -> FloeResult<()>;
}

struct RgbaU8Src<'a>(&'a [u8]);

impl ColorSrc for RgbaU8Src<'_> {
    fn alpha_nonzero(&self, frag: usize) -> bool {
        self.0[frag * 4 + 3] != 0
    }

    fn write_color(&self, frag: usize, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        w.put_bytes(&self.0[frag * 4..frag * 4 + 4])
    }
}

struct RgbaF32Src<'a>(&'a [f32]);

impl ColorSrc for RgbaF32Src<'_> {
    fn alpha_nonzero(&self, frag: usize) -> bool {
        self.0[frag * 4 + 3] != 0.0
    }

    fn write_color(&self, frag: usize, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        for channel in &self.0[frag * 4..frag * 4 + 4] {
            w.put_f32(*channel)?;
        }
        Ok(())
    }
}

struct RgbF32Src<'a>(&'a [f32]);

impl ColorSrc for RgbF32Src<'_> {
    fn alpha_nonzero(&self, _frag: usize) -> bool {
        false
    }

    fn write_color(&self, frag: usize, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        for channel in &self.0[frag * 3..frag * 3 + 3] {
            w.put_f32(*channel)?;
        }
        Ok(())
    }
}

struct NoColorSrc;

impl ColorSrc for NoColorSrc {
    fn alpha_nonzero(&self, _frag: usize) -> bool {
        false
    }

    fn write_color(&self, _frag: usize, _w: &mut ByteWriter<'_>) -> FloeResult<()> {
        Ok(())
    }
}

/// Flat z-buffer compression: active iff depth < 1.
struct ZFlat<'a, C> {
    color: C,
    depth: &'a [f32],
}

impl<C: ColorSrc> DenseSource for ZFlat<'_, C> {
    fn is_active(&self, pixel: usize) -> bool {
        self.depth[pixel] < 1.0
    }

    fn write_pixel(&self, pixel: usize, rw: &mut RunWriter<'_>) -> FloeResult<usize> {
        let w = rw.writer();
        self.color.write_color(pixel, w)?;
        w.put_f32(self.depth[pixel])?;
        Ok(1)
    }
}

/// Flat blend compression: active iff alpha is nonzero; depth is dropped.
struct BlendFlat<C> {
    color: C,
}

impl<C: ColorSrc> DenseSource for BlendFlat<C> {
    fn is_active(&self, pixel: usize) -> bool {
        self.color.alpha_nonzero(pixel)
    }

    fn write_pixel(&self, pixel: usize, rw: &mut RunWriter<'_>) -> FloeResult<usize> {
        self.color.write_color(pixel, rw.writer())?;
        Ok(1)
    }
}

/// Layered z-buffer compression: keep only the nearest fragment, which is
/// stored first.
struct ZLayered<'a, C> {
    color: C,
    depth: &'a [f32],
    layers: usize,
}

impl<C: ColorSrc> DenseSource for ZLayered<'_, C> {
    fn is_active(&self, pixel: usize) -> bool {
        self.depth[pixel * self.layers] < 1.0
    }

    fn write_pixel(&self, pixel: usize, rw: &mut RunWriter<'_>) -> FloeResult<usize> {
        let frag = pixel * self.layers;
        let w = rw.writer();
        self.color.write_color(frag, w)?;
        w.put_f32(self.depth[frag])?;
        Ok(1)
    }
}

/// Layered blend compression: store every active fragment behind a layer
/// count. Active fragments order before inactive ones, so the scan stops at
/// the first zero alpha.
struct BlendLayered<'a, C> {
    color: C,
    depth: &'a [f32],
    layers: usize,
}

impl<C: ColorSrc> DenseSource for BlendLayered<'_, C> {
    fn is_active(&self, pixel: usize) -> bool {
        self.color.alpha_nonzero(pixel * self.layers)
    }

    fn write_pixel(&self, pixel: usize, rw: &mut RunWriter<'_>) -> FloeResult<usize> {
        let first = pixel * self.layers;
        let mut count = 0;
        while count < self.layers && self.color.alpha_nonzero(first + count) {
            count += 1;
        }
        let w = rw.writer();
        w.put_u32(count as u32)?;
        for layer in 0..count {
            self.color.write_color(first + layer, w)?;
            w.put_f32(self.depth[first + layer])?;
        }
        Ok(count)
    }
}
