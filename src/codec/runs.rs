//! Run-level cursors over sparse payloads.
//!
//! `RunCursor` walks an existing stream run by run; `RunWriter` forms runs on
//! the output side. Both keep the counts-first invariants of the format: a
//! run is a stretch of inactive pixels followed by a stretch of active
//! pixels, runs are closed when activity flips back to inactive, and a
//! stream ending on inactive pixels gets a terminal run with a zero active
//! count so run totals always cover the whole image.

use crate::foundation::bytes::{ByteReader, ByteWriter};
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::sparse::SparseImage;

/// Count the bytes and fragments spanned by the next `pixels` active pixels
/// of a layered stream, without consuming them.
///
/// Fragment totals are only recorded per whole run, so a partial active run
/// must be measured by iterating pixel headers. This is the one place random
/// access into a layered stream is not O(1).
pub(crate) fn scan_fragments(
    r: &ByteReader<'_>,
    pixels: usize,
    fragment_size: usize,
) -> FloeResult<(usize, usize)> {
    let mut probe = r.clone();
    let start = probe.pos();
    let mut frags = 0usize;
    for _ in 0..pixels {
        let k = probe.take_u32()? as usize;
        probe.skip(k * fragment_size)?;
        frags += k;
    }
    Ok((probe.pos() - start, frags))
}

/// Read cursor over a sparse payload, tracking how much of the current run
/// is still pending.
pub(crate) struct RunCursor<'a> {
    r: ByteReader<'a>,
    layered: bool,
    fragment_size: usize,
    total_pixels: usize,
    consumed: usize,
    inactive: usize,
    active: usize,
    frags: usize,
}

impl<'a> RunCursor<'a> {
    pub(crate) fn new(image: &'a SparseImage) -> Self {
        let layout = image.layout();
        Self {
            r: ByteReader::new(image.payload()),
            layered: layout.layered,
            fragment_size: layout.fragment_size(),
            total_pixels: image.pixel_count(),
            consumed: 0,
            inactive: 0,
            active: 0,
            frags: 0,
        }
    }

    pub(crate) fn inactive(&self) -> usize {
        self.inactive
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn consumed(&self) -> usize {
        self.consumed
    }

    /// Pull in the next run. Callers ensure the current run is exhausted.
    pub(crate) fn load_run(&mut self) -> FloeResult<()> {
        self.inactive = self.r.take_u32()? as usize;
        self.active = self.r.take_u32()? as usize;
        if self.layered {
            self.frags = self.r.take_u32()? as usize;
        }
        Ok(())
    }

    /// Accumulate runs until active pixels are pending or the remaining
    /// stream is fully covered by queued inactive pixels.
    pub(crate) fn top_up(&mut self) -> FloeResult<()> {
        while self.active == 0 && self.consumed + self.inactive < self.total_pixels {
            let inactive = self.r.take_u32()? as usize;
            self.active = self.r.take_u32()? as usize;
            if self.layered {
                self.frags = self.r.take_u32()? as usize;
            }
            self.inactive += inactive;
        }
        Ok(())
    }

    pub(crate) fn consume_inactive(&mut self, n: usize) {
        self.inactive -= n;
        self.consumed += n;
    }

    /// Consume `n` active pixels, returning their raw bytes and fragment
    /// count. `n` must not exceed the pending active count.
    pub(crate) fn take_active(&mut self, n: usize) -> FloeResult<(&'a [u8], usize)> {
        let (bytes, frags) = if self.layered {
            if n == self.active {
                (n * 4 + self.frags * self.fragment_size, self.frags)
            } else {
                scan_fragments(&self.r, n, self.fragment_size)?
            }
        } else {
            (n * self.fragment_size, n)
        };
        let data = self.r.take_bytes(bytes)?;
        self.active -= n;
        if self.layered {
            self.frags -= frags;
        }
        self.consumed += n;
        Ok((data, frags))
    }

    /// The underlying reader, for per-pixel composite reads. Pair with
    /// [`RunCursor::note_composited`].
    pub(crate) fn reader(&mut self) -> &mut ByteReader<'a> {
        &mut self.r
    }

    /// Whether part of a run is still queued.
    pub(crate) fn has_pending(&self) -> bool {
        self.inactive != 0 || self.active != 0
    }

    /// Whether every payload byte has been consumed.
    pub(crate) fn at_end(&self) -> bool {
        self.r.remaining() == 0
    }

    /// Account for pixels whose bytes were consumed through
    /// [`RunCursor::reader`].
    pub(crate) fn note_composited(&mut self, pixels: usize, frags: usize) {
        self.active -= pixels;
        if self.layered {
            self.frags -= frags;
        }
        self.consumed += pixels;
    }
}

/// Write cursor that forms runs.
pub(crate) struct RunWriter<'a> {
    w: ByteWriter<'a>,
    layered: bool,
    run_pos: Option<usize>,
    inactive: usize,
    active: usize,
    frags: usize,
}

impl<'a> RunWriter<'a> {
    pub(crate) fn new(w: ByteWriter<'a>, layered: bool) -> Self {
        Self {
            w,
            layered,
            run_pos: None,
            inactive: 0,
            active: 0,
            frags: 0,
        }
    }

    fn run_header_size(&self) -> usize {
        if self.layered { 12 } else { 8 }
    }

    fn close_run(&mut self) -> FloeResult<()> {
        let pos = match self.run_pos.take() {
            Some(pos) => pos,
            None => return Ok(()),
        };
        self.w.patch_u32_at(pos, count_u32(self.inactive)?)?;
        self.w.patch_u32_at(pos + 4, count_u32(self.active)?)?;
        if self.layered {
            self.w.patch_u32_at(pos + 8, count_u32(self.frags)?)?;
        }
        self.inactive = 0;
        self.active = 0;
        self.frags = 0;
        Ok(())
    }

    /// Queue `n` inactive pixels, closing the current run if it already has
    /// active pixels.
    pub(crate) fn add_inactive(&mut self, n: usize) -> FloeResult<()> {
        if n == 0 {
            return Ok(());
        }
        if self.run_pos.is_some() {
            self.close_run()?;
        }
        self.inactive += n;
        Ok(())
    }

    /// Begin one active pixel; its payload follows via
    /// [`RunWriter::writer`].
    pub(crate) fn begin_active_pixel(&mut self) -> FloeResult<()> {
        if self.run_pos.is_none() {
            self.run_pos = Some(self.w.reserve(self.run_header_size())?);
        }
        self.active += 1;
        Ok(())
    }

    /// Account fragments stored for the current run (layered streams).
    pub(crate) fn add_fragments(&mut self, n: usize) {
        self.frags += n;
    }

    /// Append pre-encoded active pixel data, extending the in-progress run.
    pub(crate) fn copy_active(
        &mut self,
        bytes: &[u8],
        pixels: usize,
        frags: usize,
    ) -> FloeResult<()> {
        if pixels == 0 {
            return Ok(());
        }
        if self.run_pos.is_none() {
            self.run_pos = Some(self.w.reserve(self.run_header_size())?);
        }
        self.active += pixels;
        if self.layered {
            self.frags += frags;
        }
        self.w.put_bytes(bytes)
    }

    /// Raw access to the payload writer for active pixel data.
    pub(crate) fn writer(&mut self) -> &mut ByteWriter<'a> {
        &mut self.w
    }

    /// Close the last run, flushing trailing inactive pixels into a terminal
    /// run with a zero active count. Returns the payload length in bytes.
    pub(crate) fn finish(mut self) -> FloeResult<usize> {
        if self.run_pos.is_some() {
            self.close_run()?;
        } else if self.inactive > 0 {
            self.w.put_u32(count_u32(self.inactive)?)?;
            self.w.put_u32(0)?;
            if self.layered {
                self.w.put_u32(0)?;
            }
        }
        Ok(self.w.pos())
    }
}

fn count_u32(n: usize) -> FloeResult<u32> {
    n.try_into()
        .map_err(|_| FloeError::sanity_check("run count exceeds u32"))
}
