//! The sparse (run-length-encoded) image buffer and its wire format.
//!
//! A sparse image is one contiguous byte region: a fixed 28-byte header
//! followed by a payload of runs. All header integers and run counts are
//! little-endian `u32`. The header records the live byte length
//! (`actual_byte_size`); the backing buffer is usually larger, sized for the
//! worst case so codec passes never reallocate.
//!
//! ```text
//! offset  field              notes
//!      0  magic              b"FLOE"
//!      4  color_format       enum code
//!      8  depth_format       enum code
//!     12  width              pixels
//!     16  height             pixels
//!     20  flags              bit 0 = layered
//!     24  actual_byte_size   header + payload, bytes
//!     28  payload...
//! ```

use crate::foundation::bytes::{ByteReader, ByteWriter};
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::format::{ColorFormat, DepthFormat, FragmentLayout};

/// Identifies a sparse image stream.
pub const SPARSE_MAGIC: u32 = u32::from_le_bytes(*b"FLOE");

/// Byte offset where the run payload begins.
pub const SPARSE_HEADER_SIZE: usize = 28;

const FLAG_LAYERED: u32 = 0x1;
const ACTUAL_SIZE_OFFSET: usize = 24;

/// Worst-case byte size of a sparse image buffer for the given shape.
///
/// Every run holds at least one pixel, every run after the first holds at
/// least one inactive pixel, so a stream over `N` pixels has at most
/// `N/2 + 2` runs; fragment data is bounded by every pixel being active with
/// `max_layers` fragments each.
pub fn max_buffer_size(
    color: ColorFormat,
    depth: DepthFormat,
    layered: bool,
    width: usize,
    height: usize,
    max_layers: usize,
) -> FloeResult<usize> {
    let layout = FragmentLayout {
        color,
        depth,
        layered,
    };
    let pixels = width
        .checked_mul(height)
        .ok_or_else(|| FloeError::out_of_resources("sparse image dimensions overflow"))?;
    let runs = pixels / 2 + 2;
    let frag_bytes = if layered {
        pixels * 4 + pixels * max_layers * layout.fragment_size()
    } else {
        pixels * layout.fragment_size()
    };
    Ok(SPARSE_HEADER_SIZE + runs * layout.run_header_size() + frag_bytes)
}

/// A sparse image backed by an owned byte buffer.
#[derive(Clone, Debug)]
pub struct SparseImage {
    buf: Vec<u8>,
    color: ColorFormat,
    depth: DepthFormat,
    layered: bool,
    width: u32,
    height: u32,
}

impl SparseImage {
    /// Allocate a flat sparse image sized for the worst case.
    pub fn allocate(
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
    ) -> FloeResult<Self> {
        Self::allocate_in(Vec::new(), color, depth, width, height)
    }

    /// Allocate a layered sparse image sized for up to `max_layers`
    /// fragments per pixel.
    pub fn allocate_layered(
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
        max_layers: usize,
    ) -> FloeResult<Self> {
        Self::allocate_layered_in(Vec::new(), color, depth, width, height, max_layers)
    }

    /// Like [`SparseImage::allocate`], reusing `buffer`'s capacity.
    pub fn allocate_in(
        buffer: Vec<u8>,
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
    ) -> FloeResult<Self> {
        let capacity = max_buffer_size(color, depth, false, width, height, 1)?;
        Self::with_capacity_in(
            buffer,
            FragmentLayout {
                color,
                depth,
                layered: false,
            },
            width,
            height,
            capacity,
        )
    }

    /// Like [`SparseImage::allocate_layered`], reusing `buffer`'s capacity.
    pub fn allocate_layered_in(
        buffer: Vec<u8>,
        color: ColorFormat,
        depth: DepthFormat,
        width: usize,
        height: usize,
        max_layers: usize,
    ) -> FloeResult<Self> {
        if depth != DepthFormat::F32 {
            return Err(FloeError::invalid_operation(
                "layered images must contain depth information",
            ));
        }
        let capacity = max_buffer_size(color, depth, true, width, height, max_layers)?;
        Self::with_capacity_in(
            buffer,
            FragmentLayout {
                color,
                depth,
                layered: true,
            },
            width,
            height,
            capacity,
        )
    }

    pub(crate) fn with_capacity_in(
        mut buffer: Vec<u8>,
        layout: FragmentLayout,
        width: usize,
        height: usize,
        capacity: usize,
    ) -> FloeResult<Self> {
        let width: u32 = width
            .try_into()
            .map_err(|_| FloeError::invalid_value("sparse image width exceeds u32"))?;
        let height: u32 = height
            .try_into()
            .map_err(|_| FloeError::invalid_value("sparse image height exceeds u32"))?;
        if u32::try_from(width as u64 * height as u64).is_err() {
            return Err(FloeError::invalid_value(
                "sparse image pixel count exceeds the u32 run counters",
            ));
        }
        buffer.clear();
        buffer.resize(capacity.max(SPARSE_HEADER_SIZE), 0);
        let mut image = Self {
            buf: buffer,
            color: layout.color,
            depth: layout.depth,
            layered: layout.layered,
            width,
            height,
        };
        image.write_header()?;
        Ok(image)
    }

    /// The zero-sized sentinel: returned by ranks that hold no image after a
    /// reduction and used as the empty neighbor during binary swap.
    pub fn null() -> Self {
        Self::with_capacity_in(
            Vec::new(),
            FragmentLayout {
                color: ColorFormat::None,
                depth: DepthFormat::None,
                layered: false,
            },
            0,
            0,
            SPARSE_HEADER_SIZE,
        )
        .unwrap_or_else(|_| unreachable!("header-only allocation cannot fail"))
    }

    /// Whether this image holds no pixels.
    pub fn is_null(&self) -> bool {
        self.pixel_count() == 0
    }

    fn write_header(&mut self) -> FloeResult<()> {
        let color = self.color;
        let depth = self.depth;
        let layered = self.layered;
        let (width, height) = (self.width, self.height);
        let mut w = ByteWriter::new(&mut self.buf);
        w.put_u32(SPARSE_MAGIC)?;
        w.put_u32(color.code())?;
        w.put_u32(depth.code())?;
        w.put_u32(width)?;
        w.put_u32(height)?;
        w.put_u32(if layered { FLAG_LAYERED } else { 0 })?;
        w.put_u32(SPARSE_HEADER_SIZE as u32)?;
        Ok(())
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height as usize
    }

    /// Total pixel count `width × height`.
    pub fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    /// Color format of the stream's fragments.
    pub fn color_format(&self) -> ColorFormat {
        self.color
    }

    /// Depth format of the stream's fragments.
    pub fn depth_format(&self) -> DepthFormat {
        self.depth
    }

    /// Whether pixels carry a variable number of fragments.
    pub fn is_layered(&self) -> bool {
        self.layered
    }

    /// The stream's fragment layout.
    pub fn layout(&self) -> FragmentLayout {
        FragmentLayout {
            color: self.color,
            depth: self.depth,
            layered: self.layered,
        }
    }

    /// Live byte length of header plus payload.
    pub fn actual_byte_size(&self) -> usize {
        u32::from_le_bytes([
            self.buf[ACTUAL_SIZE_OFFSET],
            self.buf[ACTUAL_SIZE_OFFSET + 1],
            self.buf[ACTUAL_SIZE_OFFSET + 2],
            self.buf[ACTUAL_SIZE_OFFSET + 3],
        ]) as usize
    }

    /// The live run payload.
    pub fn payload(&self) -> &[u8] {
        &self.buf[SPARSE_HEADER_SIZE..self.actual_byte_size()]
    }

    /// The full writable payload region (up to the worst-case capacity).
    pub(crate) fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[SPARSE_HEADER_SIZE..]
    }

    /// Record the payload length; must be called exactly once per fill, as
    /// the final step.
    pub(crate) fn finish_payload(&mut self, payload_len: usize) -> FloeResult<()> {
        let total = SPARSE_HEADER_SIZE + payload_len;
        if total > self.buf.len() {
            return Err(FloeError::sanity_check(
                "payload length exceeds the allocated buffer",
            ));
        }
        let total: u32 = total
            .try_into()
            .map_err(|_| FloeError::sanity_check("sparse image size exceeds u32"))?;
        self.buf[ACTUAL_SIZE_OFFSET..ACTUAL_SIZE_OFFSET + 4]
            .copy_from_slice(&total.to_le_bytes());
        Ok(())
    }

    /// Resize the image to `width × height`, resetting the payload to a
    /// single all-inactive run (or nothing for a zero-sized image).
    ///
    /// Used by the swap engine to report "I have no image" and by tests to
    /// build empty neighbors.
    pub fn set_dimensions(&mut self, width: usize, height: usize) -> FloeResult<()> {
        self.width = width
            .try_into()
            .map_err(|_| FloeError::invalid_value("sparse image width exceeds u32"))?;
        self.height = height
            .try_into()
            .map_err(|_| FloeError::invalid_value("sparse image height exceeds u32"))?;
        let run = self.layout().run_header_size();
        if self.buf.len() < SPARSE_HEADER_SIZE + run {
            self.buf.resize(SPARSE_HEADER_SIZE + run, 0);
        }
        self.write_header()?;
        let pixels = self.pixel_count();
        if pixels == 0 {
            self.finish_payload(0)
        } else {
            let layered = self.layered;
            let mut w = ByteWriter::new(self.payload_mut());
            w.put_u32(pixels as u32)?;
            w.put_u32(0)?;
            if layered {
                w.put_u32(0)?;
            }
            let len = w.pos();
            self.finish_payload(len)
        }
    }

    /// The contiguous bytes to hand to a transport, starting at the header.
    pub fn package_for_send(&self) -> &[u8] {
        &self.buf[..self.actual_byte_size()]
    }

    /// Reconstruct a sparse image over a received buffer, without copying.
    ///
    /// Rejects buffers whose magic does not match or whose recorded size
    /// exceeds the transported length.
    pub fn unpackage_from_receive(buffer: Vec<u8>) -> FloeResult<Self> {
        let mut r = ByteReader::new(&buffer);
        if buffer.len() < SPARSE_HEADER_SIZE {
            return Err(FloeError::invalid_value(
                "received buffer is shorter than a sparse image header",
            ));
        }
        let magic = r.take_u32()?;
        if magic != SPARSE_MAGIC {
            return Err(FloeError::invalid_value(
                "received buffer is not a sparse image stream",
            ));
        }
        let color = ColorFormat::from_code(r.take_u32()?)?;
        let depth = DepthFormat::from_code(r.take_u32()?)?;
        let width = r.take_u32()?;
        let height = r.take_u32()?;
        let flags = r.take_u32()?;
        let actual = r.take_u32()? as usize;
        if actual < SPARSE_HEADER_SIZE || actual > buffer.len() {
            return Err(FloeError::invalid_value(
                "sparse image size field exceeds the transported length",
            ));
        }
        let layered = flags & FLAG_LAYERED != 0;
        if layered && depth != DepthFormat::F32 {
            return Err(FloeError::invalid_value(
                "layered sparse stream without depth information",
            ));
        }
        Ok(Self {
            buf: buffer,
            color,
            depth,
            layered,
            width,
            height,
        })
    }

    /// Take back the backing buffer, e.g. to return it to a scratch pool.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}
