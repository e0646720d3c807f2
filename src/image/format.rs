//! Pixel formats, composite modes, and per-fragment wire codecs.
//!
//! Formats are resolved once per operation into a [`FragmentLayout`]; the hot
//! per-pixel paths are monomorphized over the concrete fragment types below
//! and never branch on format per pixel.

use crate::foundation::bytes::{ByteReader, ByteWriter};
use crate::foundation::error::{FloeError, FloeResult};

/// Color layout of a fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ColorFormat {
    /// No color data (depth-only rendering).
    None,
    /// Four 8-bit channels, RGBA order, premultiplied alpha.
    RgbaU8,
    /// Three 32-bit float channels, no alpha.
    RgbF32,
    /// Four 32-bit float channels, RGBA order, premultiplied alpha.
    RgbaF32,
}

impl ColorFormat {
    /// Number of color channels.
    pub fn channels(self) -> usize {
        match self {
            ColorFormat::None => 0,
            ColorFormat::RgbF32 => 3,
            ColorFormat::RgbaU8 | ColorFormat::RgbaF32 => 4,
        }
    }

    /// Bytes per channel.
    pub fn channel_size(self) -> usize {
        match self {
            ColorFormat::None => 0,
            ColorFormat::RgbaU8 => 1,
            ColorFormat::RgbF32 | ColorFormat::RgbaF32 => 4,
        }
    }

    /// Bytes of color data per fragment.
    pub fn color_size(self) -> usize {
        self.channels() * self.channel_size()
    }

    /// Whether the format carries an alpha channel (channel index 3).
    pub fn has_alpha(self) -> bool {
        matches!(self, ColorFormat::RgbaU8 | ColorFormat::RgbaF32)
    }

    pub(crate) fn code(self) -> u32 {
        match self {
            ColorFormat::None => 0,
            ColorFormat::RgbaU8 => 1,
            ColorFormat::RgbF32 => 2,
            ColorFormat::RgbaF32 => 3,
        }
    }

    pub(crate) fn from_code(code: u32) -> FloeResult<Self> {
        match code {
            0 => Ok(ColorFormat::None),
            1 => Ok(ColorFormat::RgbaU8),
            2 => Ok(ColorFormat::RgbF32),
            3 => Ok(ColorFormat::RgbaF32),
            other => Err(FloeError::invalid_value(format!(
                "unknown color format code {other:#x}"
            ))),
        }
    }
}

/// Depth layout of a fragment.
///
/// A depth sample lies in `[0, 1]`; `1.0` denotes background / unwritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DepthFormat {
    /// No depth data.
    None,
    /// One 32-bit float depth sample.
    F32,
}

impl DepthFormat {
    /// Bytes of depth data per fragment.
    pub fn depth_size(self) -> usize {
        match self {
            DepthFormat::None => 0,
            DepthFormat::F32 => 4,
        }
    }

    pub(crate) fn code(self) -> u32 {
        match self {
            DepthFormat::None => 0,
            DepthFormat::F32 => 1,
        }
    }

    pub(crate) fn from_code(code: u32) -> FloeResult<Self> {
        match code {
            0 => Ok(DepthFormat::None),
            1 => Ok(DepthFormat::F32),
            other => Err(FloeError::invalid_value(format!(
                "unknown depth format code {other:#x}"
            ))),
        }
    }
}

/// Visibility rule used when combining fragments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CompositeMode {
    /// Nearest fragment wins (opaque rendering).
    ZBuffer,
    /// Non-commutative *over* operator with premultiplied alpha
    /// (volumetric / translucent rendering).
    Blend,
}

/// Fragment layout of a sparse stream, resolved once per operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentLayout {
    /// Color format of every fragment.
    pub color: ColorFormat,
    /// Depth format of every fragment.
    pub depth: DepthFormat,
    /// Whether pixels carry a variable number of depth-sorted fragments.
    pub layered: bool,
}

impl FragmentLayout {
    /// Bytes per fragment (color followed by depth).
    pub fn fragment_size(&self) -> usize {
        self.color.color_size() + self.depth.depth_size()
    }

    /// Bytes per run header: two `u32` counts, plus a fragment count for
    /// layered streams.
    pub fn run_header_size(&self) -> usize {
        if self.layered { 12 } else { 8 }
    }
}

/// Wire codec for one fragment kind. The stream stores color first, then
/// depth, all little-endian.
pub(crate) trait Fragment: Copy {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self>;
    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()>;
}

/// Fragments that carry a depth sample, usable for z-pick and depth merges.
pub(crate) trait DepthFragment: Fragment {
    fn depth(&self) -> f32;
}

/// RGBA8 color plus depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RgbaU8Z {
    pub(crate) color: [u8; 4],
    pub(crate) depth: f32,
}

/// RGBA32F color plus depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RgbaF32Z {
    pub(crate) color: [f32; 4],
    pub(crate) depth: f32,
}

/// RGB32F color plus depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RgbF32Z {
    pub(crate) color: [f32; 3],
    pub(crate) depth: f32,
}

/// Depth-only fragment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct DepthOnlyZ {
    pub(crate) depth: f32,
}

/// RGBA8 color, no depth (flat blend streams).
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RgbaU8 {
    pub(crate) color: [u8; 4],
}

/// RGBA32F color, no depth (flat blend streams).
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RgbaF32 {
    pub(crate) color: [f32; 4],
}

impl Fragment for RgbaU8Z {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        let c = r.take_bytes(4)?;
        Ok(Self {
            color: [c[0], c[1], c[2], c[3]],
            depth: r.take_f32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        w.put_bytes(&self.color)?;
        w.put_f32(self.depth)
    }
}

impl DepthFragment for RgbaU8Z {
    fn depth(&self) -> f32 {
        self.depth
    }
}

impl Fragment for RgbaF32Z {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        let mut color = [0.0f32; 4];
        for channel in &mut color {
            *channel = r.take_f32()?;
        }
        Ok(Self {
            color,
            depth: r.take_f32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        for channel in self.color {
            w.put_f32(channel)?;
        }
        w.put_f32(self.depth)
    }
}

impl DepthFragment for RgbaF32Z {
    fn depth(&self) -> f32 {
        self.depth
    }
}

impl Fragment for RgbF32Z {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        let mut color = [0.0f32; 3];
        for channel in &mut color {
            *channel = r.take_f32()?;
        }
        Ok(Self {
            color,
            depth: r.take_f32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        for channel in self.color {
            w.put_f32(channel)?;
        }
        w.put_f32(self.depth)
    }
}

impl DepthFragment for RgbF32Z {
    fn depth(&self) -> f32 {
        self.depth
    }
}

impl Fragment for DepthOnlyZ {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        Ok(Self {
            depth: r.take_f32()?,
        })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        w.put_f32(self.depth)
    }
}

impl DepthFragment for DepthOnlyZ {
    fn depth(&self) -> f32 {
        self.depth
    }
}

impl Fragment for RgbaU8 {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        let c = r.take_bytes(4)?;
        Ok(Self {
            color: [c[0], c[1], c[2], c[3]],
        })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        w.put_bytes(&self.color)
    }
}

impl Fragment for RgbaF32 {
    fn read(r: &mut ByteReader<'_>) -> FloeResult<Self> {
        let mut color = [0.0f32; 4];
        for channel in &mut color {
            *channel = r.take_f32()?;
        }
        Ok(Self { color })
    }

    fn write(&self, w: &mut ByteWriter<'_>) -> FloeResult<()> {
        for channel in self.color {
            w.put_f32(channel)?;
        }
        Ok(())
    }
}
