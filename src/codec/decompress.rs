//! Sparse → dense decompression.
//!
//! Flat streams are copied back into their color and depth planes, with
//! inactive pixels filled from the background. Layered streams are the one
//! place the *over* operator actually runs: each pixel starts at the
//! background color and its fragments are blended back-to-front, so all
//! preceding stages only had to preserve fragment order.

use smallvec::SmallVec;

use crate::codec::composite::{over_rgba_f32, over_rgba_u8};
use crate::foundation::bytes::ByteReader;
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::dense::{ColorPlane, DenseImage};
use crate::image::format::{DepthFormat, Fragment, RgbaF32Z, RgbaU8Z};
use crate::image::sparse::SparseImage;

/// Background value written to inactive pixels and blended under layered
/// fragments.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Background {
    /// Transparent black, valid for any color format.
    #[default]
    Transparent,
    /// An RGBA8 background, for `rgba_u8` images.
    RgbaU8([u8; 4]),
    /// An RGBA32F background, for `rgba_f32` images.
    RgbaF32([f32; 4]),
}

impl Background {
    fn as_rgba_u8(self) -> FloeResult<[u8; 4]> {
        match self {
            Background::Transparent => Ok([0; 4]),
            Background::RgbaU8(color) => Ok(color),
            Background::RgbaF32(_) => Err(FloeError::invalid_value(
                "background color does not match the image color format",
            )),
        }
    }

    fn as_rgba_f32(self) -> FloeResult<[f32; 4]> {
        match self {
            Background::Transparent => Ok([0.0; 4]),
            Background::RgbaF32(color) => Ok(color),
            Background::RgbaU8(_) => Err(FloeError::invalid_value(
                "background color does not match the image color format",
            )),
        }
    }
}

/// Decompress into a freshly allocated dense image.
///
/// Flat streams keep their formats; layered streams blend down to a
/// color-only image (depth is dropped, as for any output image).
pub fn decompress(sparse: &SparseImage, background: Background) -> FloeResult<DenseImage> {
    let mut dense = if sparse.is_layered() {
        DenseImage::allocate(
            sparse.color_format(),
            DepthFormat::None,
            sparse.width(),
            sparse.height(),
        )?
    } else {
        DenseImage::allocate(
            sparse.color_format(),
            sparse.depth_format(),
            sparse.width(),
            sparse.height(),
        )?
    };
    decompress_into(sparse, &mut dense, background)?;
    Ok(dense)
}

/// Decompress into an existing dense image of matching shape.
pub fn decompress_into(
    sparse: &SparseImage,
    dense: &mut DenseImage,
    background: Background,
) -> FloeResult<()> {
    if dense.width() != sparse.width() || dense.height() != sparse.height() {
        return Err(FloeError::invalid_value(
            "decompression target size does not match the sparse image",
        ));
    }
    if dense.color_format() != sparse.color_format() {
        return Err(FloeError::invalid_value(
            "decompression target color format does not match the sparse image",
        ));
    }
    if dense.is_layered() {
        return Err(FloeError::invalid_operation(
            "decompression targets are flat images",
        ));
    }

    if sparse.is_layered() {
        if dense.depth_format() != DepthFormat::None {
            return Err(FloeError::invalid_operation(
                "layered blend decompression produces color only",
            ));
        }
        let (plane, _depth) = dense.color_and_depth_mut();
        match plane {
            ColorPlane::RgbaU8(buf) => run_layered(
                sparse,
                &mut LayeredRgbaU8Sink {
                    buf,
                    bg: background.as_rgba_u8()?,
                },
            ),
            ColorPlane::RgbaF32(buf) => run_layered(
                sparse,
                &mut LayeredRgbaF32Sink {
                    buf,
                    bg: background.as_rgba_f32()?,
                },
            ),
            _ => Err(FloeError::invalid_operation(
                "layered streams carry a color format with an alpha channel",
            )),
        }
    } else {
        if dense.depth_format() != sparse.depth_format() {
            return Err(FloeError::invalid_value(
                "decompression target depth format does not match the sparse image",
            ));
        }
        let (plane, depth) = dense.color_and_depth_mut();
        match plane {
            ColorPlane::None => run_flat(sparse, &mut NoColorSink, depth),
            ColorPlane::RgbaU8(buf) => run_flat(
                sparse,
                &mut RgbaU8Sink {
                    buf,
                    bg: background.as_rgba_u8()?,
                },
                depth,
            ),
            ColorPlane::RgbF32(buf) => run_flat(sparse, &mut RgbF32Sink { buf }, depth),
            ColorPlane::RgbaF32(buf) => run_flat(
                sparse,
                &mut RgbaF32Sink {
                    buf,
                    bg: background.as_rgba_f32()?,
                },
                depth,
            ),
        }
    }
}

/// Per-format color writer for flat decompression.
trait FlatSink {
    fn put_background(&mut self, pixel: usize);
    fn read_pixel(&mut self, pixel: usize, r: &mut ByteReader<'_>) -> FloeResult<()>;
}

struct NoColorSink;

impl FlatSink for NoColorSink {
    fn put_background(&mut self, _pixel: usize) {}

    fn read_pixel(&mut self, _pixel: usize, _r: &mut ByteReader<'_>) -> FloeResult<()> {
        Ok(())
    }
}

struct RgbaU8Sink<'a> {
    buf: &'a mut [u8],
    bg: [u8; 4],
}

impl FlatSink for RgbaU8Sink<'_> {
    fn put_background(&mut self, pixel: usize) {
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&self.bg);
    }

    fn read_pixel(&mut self, pixel: usize, r: &mut ByteReader<'_>) -> FloeResult<()> {
        let color = r.take_bytes(4)?;
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(color);
        Ok(())
    }
}

struct RgbF32Sink<'a> {
    buf: &'a mut [f32],
}

impl FlatSink for RgbF32Sink<'_> {
    fn put_background(&mut self, pixel: usize) {
        self.buf[pixel * 3..pixel * 3 + 3].fill(0.0);
    }

    fn read_pixel(&mut self, pixel: usize, r: &mut ByteReader<'_>) -> FloeResult<()> {
        for channel in 0..3 {
            self.buf[pixel * 3 + channel] = r.take_f32()?;
        }
        Ok(())
    }
}

struct RgbaF32Sink<'a> {
    buf: &'a mut [f32],
    bg: [f32; 4],
}

impl FlatSink for RgbaF32Sink<'_> {
    fn put_background(&mut self, pixel: usize) {
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&self.bg);
    }

    fn read_pixel(&mut self, pixel: usize, r: &mut ByteReader<'_>) -> FloeResult<()> {
        for channel in 0..4 {
            self.buf[pixel * 4 + channel] = r.take_f32()?;
        }
        Ok(())
    }
}

fn run_flat<S: FlatSink>(
    sparse: &SparseImage,
    sink: &mut S,
    mut depth: Option<&mut [f32]>,
) -> FloeResult<()> {
    let total = sparse.pixel_count();
    let mut r = ByteReader::new(sparse.payload());
    let mut pixel = 0;
    while pixel < total {
        let inactive = r.take_u32()? as usize;
        let active = r.take_u32()? as usize;
        if pixel + inactive + active > total {
            return Err(FloeError::invalid_value(
                "sparse run totals exceed the image size",
            ));
        }
        for _ in 0..inactive {
            sink.put_background(pixel);
            if let Some(depth) = depth.as_deref_mut() {
                depth[pixel] = 1.0;
            }
            pixel += 1;
        }
        for _ in 0..active {
            sink.read_pixel(pixel, &mut r)?;
            if let Some(depth) = depth.as_deref_mut() {
                depth[pixel] = r.take_f32()?;
            }
            pixel += 1;
        }
    }
    if r.remaining() != 0 {
        return Err(FloeError::invalid_value(
            "trailing bytes after the last sparse run",
        ));
    }
    Ok(())
}

/// Per-format pixel writer for layered blend decompression.
trait LayeredSink {
    type Frag: Fragment;

    fn put_background(&mut self, pixel: usize);
    /// Blend `frags` (stored front-to-back) over the background and store
    /// the result.
    fn blend_pixel(&mut self, pixel: usize, frags: &[Self::Frag]);
}

struct LayeredRgbaU8Sink<'a> {
    buf: &'a mut [u8],
    bg: [u8; 4],
}

impl LayeredSink for LayeredRgbaU8Sink<'_> {
    type Frag = RgbaU8Z;

    fn put_background(&mut self, pixel: usize) {
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&self.bg);
    }

    fn blend_pixel(&mut self, pixel: usize, frags: &[RgbaU8Z]) {
        let mut acc = self.bg;
        for frag in frags.iter().rev() {
            acc = over_rgba_u8(frag.color, acc);
        }
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&acc);
    }
}

struct LayeredRgbaF32Sink<'a> {
    buf: &'a mut [f32],
    bg: [f32; 4],
}

impl LayeredSink for LayeredRgbaF32Sink<'_> {
    type Frag = RgbaF32Z;

    fn put_background(&mut self, pixel: usize) {
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&self.bg);
    }

    fn blend_pixel(&mut self, pixel: usize, frags: &[RgbaF32Z]) {
        let mut acc = self.bg;
        for frag in frags.iter().rev() {
            acc = over_rgba_f32(frag.color, acc);
        }
        self.buf[pixel * 4..pixel * 4 + 4].copy_from_slice(&acc);
    }
}

fn run_layered<S: LayeredSink>(sparse: &SparseImage, sink: &mut S) -> FloeResult<()> {
    let total = sparse.pixel_count();
    let mut r = ByteReader::new(sparse.payload());
    let mut pixel = 0;
    let mut frags: SmallVec<[S::Frag; 8]> = SmallVec::new();
    while pixel < total {
        let inactive = r.take_u32()? as usize;
        let active = r.take_u32()? as usize;
        let run_frags = r.take_u32()? as usize;
        if pixel + inactive + active > total {
            return Err(FloeError::invalid_value(
                "sparse run totals exceed the image size",
            ));
        }
        for _ in 0..inactive {
            sink.put_background(pixel);
            pixel += 1;
        }
        let mut seen_frags = 0;
        for _ in 0..active {
            let count = r.take_u32()? as usize;
            seen_frags += count;
            frags.clear();
            for _ in 0..count {
                frags.push(S::Frag::read(&mut r)?);
            }
            sink.blend_pixel(pixel, &frags);
            pixel += 1;
        }
        if seen_frags != run_frags {
            return Err(FloeError::invalid_value(
                "layer counts disagree with the run's fragment total",
            ));
        }
    }
    if r.remaining() != 0 {
        return Err(FloeError::invalid_value(
            "trailing bytes after the last sparse run",
        ));
    }
    Ok(())
}
