//! Dense image buffers: owned color and depth planes.

use crate::foundation::error::{FloeError, FloeResult};
use crate::image::format::{ColorFormat, CompositeMode, DepthFormat};

/// Typed storage for the color plane of a dense image.
#[derive(Clone, Debug)]
pub(crate) enum ColorPlane {
    None,
    RgbaU8(Vec<u8>),
    RgbF32(Vec<f32>),
    RgbaF32(Vec<f32>),
}

impl ColorPlane {
    fn allocate(format: ColorFormat, fragments: usize) -> Self {
        match format {
            ColorFormat::None => ColorPlane::None,
            ColorFormat::RgbaU8 => ColorPlane::RgbaU8(vec![0; fragments * 4]),
            ColorFormat::RgbF32 => ColorPlane::RgbF32(vec![0.0; fragments * 3]),
            ColorFormat::RgbaF32 => ColorPlane::RgbaF32(vec![0.0; fragments * 4]),
        }
    }

    fn format(&self) -> ColorFormat {
        match self {
            ColorPlane::None => ColorFormat::None,
            ColorPlane::RgbaU8(_) => ColorFormat::RgbaU8,
            ColorPlane::RgbF32(_) => ColorFormat::RgbF32,
            ColorPlane::RgbaF32(_) => ColorFormat::RgbaF32,
        }
    }

    fn clear(&mut self) {
        match self {
            ColorPlane::None => {}
            ColorPlane::RgbaU8(buf) => buf.fill(0),
            ColorPlane::RgbF32(buf) | ColorPlane::RgbaF32(buf) => buf.fill(0.0),
        }
    }

    /// Copy one fragment's color between planes of the same format.
    fn copy_fragment(dst: &mut ColorPlane, dst_idx: usize, src: &ColorPlane, src_idx: usize) {
        match (dst, src) {
            (ColorPlane::None, ColorPlane::None) => {}
            (ColorPlane::RgbaU8(d), ColorPlane::RgbaU8(s)) => {
                d[dst_idx * 4..dst_idx * 4 + 4].copy_from_slice(&s[src_idx * 4..src_idx * 4 + 4]);
            }
            (ColorPlane::RgbF32(d), ColorPlane::RgbF32(s)) => {
                d[dst_idx * 3..dst_idx * 3 + 3].copy_from_slice(&s[src_idx * 3..src_idx * 3 + 3]);
            }
            (ColorPlane::RgbaF32(d), ColorPlane::RgbaF32(s)) => {
                d[dst_idx * 4..dst_idx * 4 + 4].copy_from_slice(&s[src_idx * 4..src_idx * 4 + 4]);
            }
            _ => unreachable!("callers check format equality before copying"),
        }
    }
}

/// A dense image of `width × height` pixels with one or more depth-sorted
/// fragments per pixel.
///
/// Planes are laid out row-major by pixel, then by layer within each pixel.
/// For layered images, callers must keep fragments within a pixel sorted by
/// depth ascending, with all active fragments before any inactive one; the
/// compressor relies on both invariants.
#[derive(Clone, Debug)]
pub struct DenseImage {
    width: usize,
    height: usize,
    num_layers: usize,
    layered: bool,
    color: ColorPlane,
    depth: Option<Vec<f32>>,
}

impl DenseImage {
    /// Allocate a flat image (one fragment per pixel).
    pub fn allocate(
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
    ) -> FloeResult<Self> {
        Self::new_inner(color, depth, width, height, 1, false)
    }

    /// Allocate a layered image with `num_layers` fragments per pixel.
    ///
    /// Layered images must carry depth so fragments can be ordered.
    pub fn allocate_layered(
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
        num_layers: usize,
    ) -> FloeResult<Self> {
        if depth != DepthFormat::F32 {
            return Err(FloeError::invalid_operation(
                "layered images must contain depth information",
            ));
        }
        if num_layers == 0 {
            return Err(FloeError::invalid_value(
                "layered images need at least one layer",
            ));
        }
        Self::new_inner(color, depth, width, height, num_layers, true)
    }

    fn new_inner(
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
        num_layers: usize,
        layered: bool,
    ) -> FloeResult<Self> {
        let fragments = width
            .checked_mul(height)
            .and_then(|px| px.checked_mul(num_layers))
            .ok_or_else(|| FloeError::out_of_resources("dense image dimensions overflow"))?;
        let mut image = Self {
            width,
            height,
            num_layers,
            layered,
            color: ColorPlane::allocate(color, fragments),
            depth: match depth {
                DepthFormat::None => None,
                DepthFormat::F32 => Some(vec![0.0; fragments]),
            },
        };
        image.clear();
        Ok(image)
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Fragments per pixel.
    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Whether the image stores multiple depth-sorted fragments per pixel.
    pub fn is_layered(&self) -> bool {
        self.layered
    }

    /// Total pixel count `width × height`.
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Total fragment count across all layers.
    pub fn fragment_count(&self) -> usize {
        self.pixel_count() * self.num_layers
    }

    /// Color format of the image.
    pub fn color_format(&self) -> ColorFormat {
        self.color.format()
    }

    /// Depth format of the image.
    pub fn depth_format(&self) -> DepthFormat {
        if self.depth.is_some() {
            DepthFormat::F32
        } else {
            DepthFormat::None
        }
    }

    /// Drop buffers the output consumer does not need. Currently this
    /// discards the depth plane; displays only consume color.
    pub fn adjust_for_output(&mut self) {
        self.depth = None;
    }

    /// Reset every fragment to background: zeroed color, depth `1.0`.
    pub fn clear(&mut self) {
        self.color.clear();
        if let Some(depth) = &mut self.depth {
            depth.fill(1.0);
        }
    }

    /// Linear fragment index for `(x, y, layer)`.
    pub fn fragment_index(&self, x: usize, y: usize, layer: usize) -> usize {
        (y * self.width + x) * self.num_layers + layer
    }

    /// The RGBA8 color plane.
    pub fn color_rgba_u8(&self) -> FloeResult<&[u8]> {
        match &self.color {
            ColorPlane::RgbaU8(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgba_u8")),
        }
    }

    /// The mutable RGBA8 color plane.
    pub fn color_rgba_u8_mut(&mut self) -> FloeResult<&mut [u8]> {
        match &mut self.color {
            ColorPlane::RgbaU8(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgba_u8")),
        }
    }

    /// The RGB32F color plane.
    pub fn color_rgb_f32(&self) -> FloeResult<&[f32]> {
        match &self.color {
            ColorPlane::RgbF32(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgb_f32")),
        }
    }

    /// The mutable RGB32F color plane.
    pub fn color_rgb_f32_mut(&mut self) -> FloeResult<&mut [f32]> {
        match &mut self.color {
            ColorPlane::RgbF32(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgb_f32")),
        }
    }

    /// The RGBA32F color plane.
    pub fn color_rgba_f32(&self) -> FloeResult<&[f32]> {
        match &self.color {
            ColorPlane::RgbaF32(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgba_f32")),
        }
    }

    /// The mutable RGBA32F color plane.
    pub fn color_rgba_f32_mut(&mut self) -> FloeResult<&mut [f32]> {
        match &mut self.color {
            ColorPlane::RgbaF32(buf) => Ok(buf),
            _ => Err(FloeError::invalid_operation("color plane is not rgba_f32")),
        }
    }

    /// Simultaneous mutable access to both planes, for the decompressor.
    pub(crate) fn color_and_depth_mut(&mut self) -> (&mut ColorPlane, Option<&mut [f32]>) {
        (&mut self.color, self.depth.as_deref_mut())
    }

    /// The depth plane.
    pub fn depth(&self) -> FloeResult<&[f32]> {
        self.depth
            .as_deref()
            .ok_or_else(|| FloeError::invalid_operation("image has no depth plane"))
    }

    /// The mutable depth plane.
    pub fn depth_mut(&mut self) -> FloeResult<&mut [f32]> {
        self.depth
            .as_deref_mut()
            .ok_or_else(|| FloeError::invalid_operation("image has no depth plane"))
    }

    /// Whether the pixel at linear index `idx` contributes a visible
    /// fragment under `mode`: nonzero alpha for blend, depth `< 1` for
    /// z-buffer. Only the first fragment is consulted; active fragments
    /// order before inactive ones.
    pub fn is_pixel_active(&self, idx: usize, mode: CompositeMode) -> FloeResult<bool> {
        let frag = idx * self.num_layers;
        match mode {
            CompositeMode::ZBuffer => {
                let depth = self.depth()?;
                Ok(depth[frag] < 1.0)
            }
            CompositeMode::Blend => match &self.color {
                ColorPlane::RgbaU8(buf) => Ok(buf[frag * 4 + 3] != 0),
                ColorPlane::RgbaF32(buf) => Ok(buf[frag * 4 + 3] != 0.0),
                _ => Err(FloeError::invalid_operation(
                    "blending requires a color format with an alpha channel",
                )),
            },
        }
    }

    /// Store an RGBA8 fragment color at `(x, y, layer)`.
    pub fn set_rgba_u8(
        &mut self,
        x: usize,
        y: usize,
        layer: usize,
        color: [u8; 4],
    ) -> FloeResult<()> {
        let idx = self.fragment_index(x, y, layer);
        let buf = self.color_rgba_u8_mut()?;
        buf[idx * 4..idx * 4 + 4].copy_from_slice(&color);
        Ok(())
    }

    /// Store an RGBA32F fragment color at `(x, y, layer)`.
    pub fn set_rgba_f32(
        &mut self,
        x: usize,
        y: usize,
        layer: usize,
        color: [f32; 4],
    ) -> FloeResult<()> {
        let idx = self.fragment_index(x, y, layer);
        let buf = self.color_rgba_f32_mut()?;
        buf[idx * 4..idx * 4 + 4].copy_from_slice(&color);
        Ok(())
    }

    /// Store an RGB32F fragment color at `(x, y, layer)`.
    pub fn set_rgb_f32(
        &mut self,
        x: usize,
        y: usize,
        layer: usize,
        color: [f32; 3],
    ) -> FloeResult<()> {
        let idx = self.fragment_index(x, y, layer);
        let buf = self.color_rgb_f32_mut()?;
        buf[idx * 3..idx * 3 + 3].copy_from_slice(&color);
        Ok(())
    }

    /// Store a fragment depth at `(x, y, layer)`.
    pub fn set_depth(&mut self, x: usize, y: usize, layer: usize, depth: f32) -> FloeResult<()> {
        let idx = self.fragment_index(x, y, layer);
        self.depth_mut()?[idx] = depth;
        Ok(())
    }

    /// Read the RGBA8 fragment color at `(x, y, layer)`.
    pub fn rgba_u8_at(&self, x: usize, y: usize, layer: usize) -> FloeResult<[u8; 4]> {
        let idx = self.fragment_index(x, y, layer);
        let buf = self.color_rgba_u8()?;
        Ok([
            buf[idx * 4],
            buf[idx * 4 + 1],
            buf[idx * 4 + 2],
            buf[idx * 4 + 3],
        ])
    }

    /// Read the fragment depth at `(x, y, layer)`.
    pub fn depth_at(&self, x: usize, y: usize, layer: usize) -> FloeResult<f32> {
        let idx = self.fragment_index(x, y, layer);
        Ok(self.depth()?[idx])
    }

    /// Merge several layered images into one by merging each pixel's
    /// fragment list in depth order (ties keep source order). The output has
    /// the summed layer count; background fragments sort last because their
    /// depth is `1.0`.
    pub fn merge_layered(sources: &[DenseImage]) -> FloeResult<DenseImage> {
        let first = sources
            .first()
            .ok_or_else(|| FloeError::invalid_value("merge needs at least one source image"))?;
        for src in sources {
            if !src.is_layered() {
                return Err(FloeError::invalid_operation(
                    "merge requires layered source images",
                ));
            }
            if src.width != first.width
                || src.height != first.height
                || src.color_format() != first.color_format()
            {
                return Err(FloeError::invalid_value(
                    "merge sources must share dimensions and formats",
                ));
            }
        }

        let total_layers: usize = sources.iter().map(|s| s.num_layers).sum();
        let mut out = DenseImage::allocate_layered(
            first.color_format(),
            DepthFormat::F32,
            first.width,
            first.height,
            total_layers,
        )?;

        let mut order: Vec<(f32, usize, usize)> = Vec::with_capacity(total_layers);
        for pixel in 0..first.pixel_count() {
            order.clear();
            for (src_idx, src) in sources.iter().enumerate() {
                let depth = src.depth()?;
                for layer in 0..src.num_layers {
                    order.push((depth[pixel * src.num_layers + layer], src_idx, layer));
                }
            }
            order.sort_by(|a, b| a.0.total_cmp(&b.0));

            for (slot, &(depth, src_idx, layer)) in order.iter().enumerate() {
                let src = &sources[src_idx];
                let dst_frag = pixel * total_layers + slot;
                let src_frag = pixel * src.num_layers + layer;
                ColorPlane::copy_fragment(&mut out.color, dst_frag, &src.color, src_frag);
                if let Some(out_depth) = &mut out.depth {
                    out_depth[dst_frag] = depth;
                }
            }
        }
        Ok(out)
    }
}
