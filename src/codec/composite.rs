//! Compressed-compressed composite: merge two sparse images of equal pixel
//! count without materializing dense pixels.
//!
//! Both inputs advance through their runs independently; each loop
//! iteration consumes the minimum of the matching classes (both inactive,
//! one-sided active, both active) and emits runs on the fly. Only the
//! both-active case touches fragment data, through one of three rules:
//! z-pick (nearest depth wins, ties to the front input), *over* (flat blend
//! streams), or depth-merge (layered streams, which defer blending to
//! decompression).

use std::marker::PhantomData;

use crate::codec::runs::{RunCursor, RunWriter};
use crate::foundation::bytes::ByteWriter;
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::format::{
    ColorFormat, DepthFormat, DepthFragment, Fragment, DepthOnlyZ, RgbF32Z, RgbaF32, RgbaF32Z,
    RgbaU8, RgbaU8Z,
};
use crate::image::sparse::{SPARSE_HEADER_SIZE, SparseImage};

pub(crate) fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

/// Premultiplied *over* for RGBA8: `out = front + (1 - α_front) · back`.
pub(crate) fn over_rgba_u8(front: [u8; 4], back: [u8; 4]) -> [u8; 4] {
    let inv = 255u16 - u16::from(front[3]);
    let mut out = [0u8; 4];
    for channel in 0..4 {
        out[channel] = front[channel].saturating_add(mul_div255(u16::from(back[channel]), inv));
    }
    out
}

/// Premultiplied *over* for RGBA32F.
pub(crate) fn over_rgba_f32(front: [f32; 4], back: [f32; 4]) -> [f32; 4] {
    let inv = 1.0 - front[3];
    [
        front[0] + back[0] * inv,
        front[1] + back[1] * inv,
        front[2] + back[2] * inv,
        front[3] + back[3] * inv,
    ]
}

/// Composite two sparse images into a freshly allocated output.
pub fn composite(front: &SparseImage, back: &SparseImage) -> FloeResult<SparseImage> {
    composite_in(Vec::new(), front, back)
}

/// Composite two sparse images, reusing `buffer` for the output.
///
/// The operation is deterministic and allocation-free beyond the output
/// buffer; a pixel-count mismatch is a `SanityCheck`, and inputs whose runs
/// do not cover exactly the pixel count are reported as corrupt via
/// `InvalidValue` after the final counter check.
pub fn composite_in(
    buffer: Vec<u8>,
    front: &SparseImage,
    back: &SparseImage,
) -> FloeResult<SparseImage> {
    if front.pixel_count() != back.pixel_count() {
        return Err(FloeError::sanity_check(
            "input buffers do not agree for compressed-compressed composite",
        ));
    }
    if front.layout() != back.layout() {
        return Err(FloeError::invalid_value(
            "compressed-compressed composite inputs must share formats",
        ));
    }
    let layout = front.layout();
    let pixels = front.pixel_count();
    // Worst case: every input fragment survives, plus run headers.
    let capacity = SPARSE_HEADER_SIZE
        + (pixels / 2 + 2) * layout.run_header_size()
        + (front.actual_byte_size() - SPARSE_HEADER_SIZE)
        + (back.actual_byte_size() - SPARSE_HEADER_SIZE);
    let mut dest =
        SparseImage::with_capacity_in(buffer, layout, front.width(), front.height(), capacity)?;

    if layout.layered {
        match layout.color {
            ColorFormat::RgbaU8 => ccc_run::<MergeRule<RgbaU8Z>>(front, back, &mut dest)?,
            ColorFormat::RgbaF32 => ccc_run::<MergeRule<RgbaF32Z>>(front, back, &mut dest)?,
            _ => {
                return Err(FloeError::invalid_operation(
                    "layered streams carry a color format with an alpha channel",
                ));
            }
        }
    } else {
        match (layout.color, layout.depth) {
            (ColorFormat::None, DepthFormat::F32) => {
                ccc_run::<ZPickRule<DepthOnlyZ>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbaU8, DepthFormat::F32) => {
                ccc_run::<ZPickRule<RgbaU8Z>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbF32, DepthFormat::F32) => {
                ccc_run::<ZPickRule<RgbF32Z>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbaF32, DepthFormat::F32) => {
                ccc_run::<ZPickRule<RgbaF32Z>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbaU8, DepthFormat::None) => {
                ccc_run::<OverRule<RgbaU8>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbaF32, DepthFormat::None) => {
                ccc_run::<OverRule<RgbaF32>>(front, back, &mut dest)?
            }
            (ColorFormat::RgbF32 | ColorFormat::None, DepthFormat::None) => {
                return Err(FloeError::invalid_operation(
                    "cannot composite fragments with neither depth nor alpha",
                ));
            }
        }
    }
    Ok(dest)
}

/// Per-fragment composite rule, monomorphized into the run loop.
trait CccRule {
    const LAYERED: bool;

    /// Composite one active pixel from each side into the destination.
    fn composite_pixel(
        f: &mut RunCursor<'_>,
        b: &mut RunCursor<'_>,
        rw: &mut RunWriter<'_>,
    ) -> FloeResult<()>;
}

/// Nearest fragment wins; ties go to the front input.
struct ZPickRule<F>(PhantomData<F>);

impl<F: DepthFragment> CccRule for ZPickRule<F> {
    const LAYERED: bool = false;

    fn composite_pixel(
        f: &mut RunCursor<'_>,
        b: &mut RunCursor<'_>,
        rw: &mut RunWriter<'_>,
    ) -> FloeResult<()> {
        let ff = F::read(f.reader())?;
        let bf = F::read(b.reader())?;
        f.note_composited(1, 1);
        b.note_composited(1, 1);
        rw.begin_active_pixel()?;
        let winner = if ff.depth() <= bf.depth() { ff } else { bf };
        winner.write(rw.writer())
    }
}

/// Fragments that support the *over* operator directly.
trait OverFragment: Fragment {
    fn over(front: Self, back: Self) -> Self;
}

impl OverFragment for RgbaU8 {
    fn over(front: Self, back: Self) -> Self {
        Self {
            color: over_rgba_u8(front.color, back.color),
        }
    }
}

impl OverFragment for RgbaF32 {
    fn over(front: Self, back: Self) -> Self {
        Self {
            color: over_rgba_f32(front.color, back.color),
        }
    }
}

/// Flat blend: apply *over* immediately.
struct OverRule<F>(PhantomData<F>);

impl<F: OverFragment> CccRule for OverRule<F> {
    const LAYERED: bool = false;

    fn composite_pixel(
        f: &mut RunCursor<'_>,
        b: &mut RunCursor<'_>,
        rw: &mut RunWriter<'_>,
    ) -> FloeResult<()> {
        let ff = F::read(f.reader())?;
        let bf = F::read(b.reader())?;
        f.note_composited(1, 1);
        b.note_composited(1, 1);
        rw.begin_active_pixel()?;
        F::over(ff, bf).write(rw.writer())
    }
}

/// Layered blend: merge the two depth-sorted fragment lists; ties keep the
/// front fragment first. The actual blending happens at decompression.
struct MergeRule<F>(PhantomData<F>);

impl<F: DepthFragment> CccRule for MergeRule<F> {
    const LAYERED: bool = true;

    fn composite_pixel(
        f: &mut RunCursor<'_>,
        b: &mut RunCursor<'_>,
        rw: &mut RunWriter<'_>,
    ) -> FloeResult<()> {
        let front_count = f.reader().take_u32()? as usize;
        let back_count = b.reader().take_u32()? as usize;
        rw.begin_active_pixel()?;
        rw.writer().put_u32((front_count + back_count) as u32)?;

        let mut front_left = front_count;
        let mut back_left = back_count;
        let mut front_frag = take_next::<F>(f, &mut front_left)?;
        let mut back_frag = take_next::<F>(b, &mut back_left)?;
        loop {
            match (front_frag, back_frag) {
                (None, None) => break,
                (Some(frag), None) => {
                    frag.write(rw.writer())?;
                    front_frag = take_next::<F>(f, &mut front_left)?;
                }
                (None, Some(frag)) => {
                    frag.write(rw.writer())?;
                    back_frag = take_next::<F>(b, &mut back_left)?;
                }
                (Some(ff), Some(bf)) => {
                    if ff.depth() <= bf.depth() {
                        ff.write(rw.writer())?;
                        front_frag = take_next::<F>(f, &mut front_left)?;
                    } else {
                        bf.write(rw.writer())?;
                        back_frag = take_next::<F>(b, &mut back_left)?;
                    }
                }
            }
        }
        rw.add_fragments(front_count + back_count);
        f.note_composited(1, front_count);
        b.note_composited(1, back_count);
        Ok(())
    }
}

fn take_next<F: Fragment>(
    cursor: &mut RunCursor<'_>,
    left: &mut usize,
) -> FloeResult<Option<F>> {
    if *left == 0 {
        return Ok(None);
    }
    *left -= 1;
    F::read(cursor.reader()).map(Some)
}

fn ccc_run<R: CccRule>(
    front: &SparseImage,
    back: &SparseImage,
    dest: &mut SparseImage,
) -> FloeResult<()> {
    let total = front.pixel_count();
    let mut f = RunCursor::new(front);
    let mut b = RunCursor::new(back);
    let mut rw = RunWriter::new(ByteWriter::new(dest.payload_mut()), R::LAYERED);

    while f.consumed() < total && b.consumed() < total {
        f.top_up()?;
        b.top_up()?;

        let both_inactive = f.inactive().min(b.inactive());
        if both_inactive > 0 {
            rw.add_inactive(both_inactive)?;
            f.consume_inactive(both_inactive);
            b.consume_inactive(both_inactive);
        }

        if f.inactive() > 0 && b.active() > 0 {
            let n = f.inactive().min(b.active());
            let (bytes, frags) = b.take_active(n)?;
            rw.copy_active(bytes, n, frags)?;
            f.consume_inactive(n);
        }

        if b.inactive() > 0 && f.active() > 0 {
            let n = b.inactive().min(f.active());
            let (bytes, frags) = f.take_active(n)?;
            rw.copy_active(bytes, n, frags)?;
            b.consume_inactive(n);
        }

        if f.inactive() == 0 && b.inactive() == 0 {
            let n = f.active().min(b.active());
            for _ in 0..n {
                R::composite_pixel(&mut f, &mut b, &mut rw)?;
            }
        }
    }

    let len = rw.finish()?;
    dest.finish_payload(len)?;
    let clean = |c: &RunCursor<'_>| c.consumed() == total && !c.has_pending() && c.at_end();
    if !clean(&f) || !clean(&b) {
        return Err(FloeError::invalid_value("corrupt compressed image"));
    }
    Ok(())
}
