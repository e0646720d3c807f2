//! The binary-swap compositing engine.
//!
//! Over a group of `G` ranks, binary swap leaves every member holding one
//! contiguous piece of the composited whole plus that piece's pixel offset.
//! The largest power-of-two prefix of the group (the lower group) runs
//! `log2 P` swap rounds; the remaining ranks (the upper group) first reduce
//! among themselves and telescope their result into the lower group, then
//! report the null image. A folding variant pre-pairs ranks instead of
//! telescoping.
//!
//! The front/back discipline for the non-commutative blend operator: data
//! that originates on the lower-indexed side of the group takes the front
//! role in every merge. In a swap round the rank keeping the lower half is
//! the lower-indexed partner, so its kept half is front; otherwise the
//! incoming half is. Telescope and fold absorbs composite the receiver
//! (earlier in group order) as front.

use crate::codec::composite::composite_in;
use crate::codec::scan::{bit_reverse, interlace_into_buffer, interlace_offset, split_alloc, split_into_buffers};
use crate::comm::{Communicator, MessageTag};
use crate::compose::pool::{BufferId, ScratchPool};
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::sparse::SparseImage;

/// Largest power of two less than or equal to `x`.
fn largest_power_of_two(x: usize) -> usize {
    let mut pow2 = 1;
    while pow2 <= x {
        pow2 <<= 1;
    }
    pow2 >> 1
}

/// Binary-swap engine over a borrowed communicator and scratch pool.
///
/// An engine instance is not reentrant: it owns its pool exclusively for the
/// duration of a reduction.
pub struct BinarySwap<'a, C: Communicator> {
    comm: &'a C,
    pool: &'a mut ScratchPool,
    interlace_images: bool,
}

impl<'a, C: Communicator> BinarySwap<'a, C> {
    /// Create an engine. `interlace_images` enables the pixel permutation
    /// that balances active pixels across swap partitions.
    pub fn new(comm: &'a C, pool: &'a mut ScratchPool, interlace_images: bool) -> Self {
        Self {
            comm,
            pool,
            interlace_images,
        }
    }

    /// Run binary swap with telescoping over `group` (communicator ranks in
    /// compose order). Returns this rank's piece and its pixel offset; ranks
    /// outside the power-of-two prefix return the null image.
    pub fn compose(
        &mut self,
        group: &[usize],
        input: SparseImage,
    ) -> FloeResult<(SparseImage, usize)> {
        tracing::debug!(group_size = group.len(), "binary-swap compose");
        let mut working = input;
        let mut piece_offset = 0;
        self.compose_no_combine(group, None, &mut working, &mut piece_offset)?;
        Ok((working, piece_offset))
    }

    /// Run binary swap with folding over `group`: the first `2·E` ranks pair
    /// up and the odd member of each pair folds its whole image into the
    /// even member, then drops out with the null image.
    pub fn folding_compose(
        &mut self,
        group: &[usize],
        input: SparseImage,
    ) -> FloeResult<(SparseImage, usize)> {
        tracing::debug!(group_size = group.len(), "binary-swap folding compose");
        let group_rank = self.find_rank(group)?;
        let pow2size = largest_power_of_two(group.len());
        let extra = group.len() - pow2size;

        if group.len() < 2 {
            return Ok((input, 0));
        }

        let total_pixels = input.pixel_count();
        let use_interlace = pow2size > 2 && self.interlace_images;
        let mut working = if use_interlace {
            let buffer = self.pool.take(BufferId::Working1);
            let interlaced = interlace_into_buffer(&input, pow2size, buffer)?;
            self.pool.put_back(BufferId::Working2, input.into_buffer());
            interlaced
        } else {
            input
        };

        // Fold the group into its largest power-of-two subset.
        let mut pow2group = Vec::with_capacity(pow2size);
        let mut whole_index = 0;
        let mut pow2_index = 0;
        while pow2_index < extra {
            pow2group.push(group[whole_index]);
            if group_rank == whole_index {
                let mut incoming = self.pool.take(BufferId::Incoming);
                self.comm
                    .recv(&mut incoming, MessageTag::Fold, group[whole_index + 1])?;
                let in_image = SparseImage::unpackage_from_receive(incoming)?;
                let dest = self.pool.take(BufferId::Working2);
                let composed = composite_in(dest, &working, &in_image)?;
                let old = std::mem::replace(&mut working, composed);
                self.pool.put_back(BufferId::Working1, old.into_buffer());
                self.pool.put_back(BufferId::Incoming, in_image.into_buffer());
            } else if group_rank == whole_index + 1 {
                self.comm.send(
                    working.package_for_send(),
                    MessageTag::Fold,
                    group[whole_index],
                )?;
                return Ok((SparseImage::null(), 0));
            }
            whole_index += 2;
            pow2_index += 1;
        }
        if group.len() - whole_index != pow2size - pow2_index {
            return Err(FloeError::sanity_check("miscounted indices while folding"));
        }
        pow2group.extend_from_slice(&group[whole_index..]);

        let mut piece_offset = 0;
        self.compose_pow2(&pow2group, pow2size, &mut working, &mut piece_offset)?;

        if use_interlace {
            let pow2rank = self.find_rank(&pow2group)?;
            piece_offset =
                interlace_offset(bit_reverse(pow2rank, pow2size), pow2size, total_pixels);
        }
        Ok((working, piece_offset))
    }

    fn find_rank(&self, group: &[usize]) -> FloeResult<usize> {
        let rank = self.comm.rank();
        group.iter().position(|&member| member == rank).ok_or_else(|| {
            FloeError::invalid_value("calling rank is not a member of the compose group")
        })
    }

    /// Binary swap without final collection: the image ends up partitioned,
    /// with each lower-group rank holding the piece at the bit reversal of
    /// its group rank.
    fn compose_no_combine(
        &mut self,
        group: &[usize],
        largest_group_size: Option<usize>,
        working: &mut SparseImage,
        piece_offset: &mut usize,
    ) -> FloeResult<()> {
        let group_rank = self.find_rank(group)?;
        let pow2size = largest_power_of_two(group.len());
        let extra = group.len() - pow2size;
        let extra_pow2size = largest_power_of_two(extra);
        let largest = largest_group_size.unwrap_or(pow2size);

        if group_rank >= pow2size {
            // Part of the extra ranks: recurse, then telescope inward.
            let upper = &group[pow2size..];
            self.compose_no_combine(upper, Some(largest), working, piece_offset)?;
            if group_rank - pow2size < extra_pow2size {
                self.send_from_upper_group(
                    &group[..pow2size],
                    &group[pow2size..pow2size + extra_pow2size],
                    largest,
                    working,
                )?;
            }
            // Report no image.
            working.set_dimensions(0, 0)?;
            *piece_offset = 0;
        } else {
            let total_pixels = working.pixel_count();
            let use_interlace = largest > 2 && self.interlace_images;
            if use_interlace {
                let buffer = self.pool.take(BufferId::Working2);
                let interlaced = interlace_into_buffer(&*working, largest, buffer)?;
                let old = std::mem::replace(working, interlaced);
                self.pool.put_back(BufferId::Working1, old.into_buffer());
            }

            self.compose_pow2(&group[..pow2size], largest, working, piece_offset)?;

            self.receive_from_upper_group(
                &group[..pow2size],
                &group[pow2size..pow2size + extra_pow2size],
                working,
            )?;

            if use_interlace {
                // The swap ran in the permuted domain; report the logical
                // offset of this rank's deinterlaced partition. Ignored by
                // enclosing recursion levels.
                let global_partition = bit_reverse(group_rank, largest);
                *piece_offset = interlace_offset(global_partition, largest, total_pixels);
            }
        }
        Ok(())
    }

    /// The `log2 P` swap rounds over a power-of-two group.
    fn compose_pow2(
        &mut self,
        group: &[usize],
        largest_group_size: usize,
        working: &mut SparseImage,
        piece_offset: &mut usize,
    ) -> FloeResult<()> {
        *piece_offset = 0;
        if group.len() < 2 {
            return Ok(());
        }
        let group_rank = self.find_rank(group)?;

        // At round i, swap with the rank differing in bit i of the group
        // rank.
        let mut bitmask = 1;
        while bitmask < group.len() {
            let eventual = largest_group_size / bitmask;
            let buffers = vec![
                self.pool.take(BufferId::Working2),
                self.pool.take(BufferId::SplitPiece),
            ];
            let (pieces, offsets) = split_into_buffers(working, *piece_offset, eventual, buffers)?;
            let mut pieces = pieces.into_iter();
            let (lower_piece, upper_piece) = match (pieces.next(), pieces.next()) {
                (Some(lower), Some(upper)) => (lower, upper),
                _ => return Err(FloeError::sanity_check("image split lost a partition")),
            };

            let pair = group_rank ^ bitmask;
            let in_on_top = group_rank > pair;
            let (keep, send) = if in_on_top {
                *piece_offset = offsets[1];
                (upper_piece, lower_piece)
            } else {
                *piece_offset = offsets[0];
                (lower_piece, upper_piece)
            };

            tracing::debug!(
                round = bitmask,
                partner = group[pair],
                send_bytes = send.actual_byte_size(),
                "swapping image halves"
            );
            let mut incoming = self.pool.take(BufferId::Incoming);
            self.comm.sendrecv(
                send.package_for_send(),
                MessageTag::SwapImages,
                group[pair],
                &mut incoming,
                MessageTag::SwapImages,
                group[pair],
            )?;
            let in_image = SparseImage::unpackage_from_receive(incoming)?;

            // The old working image is dead; its buffer becomes the
            // composite destination.
            let old_working = std::mem::replace(working, SparseImage::null());
            let composed = if in_on_top {
                composite_in(old_working.into_buffer(), &in_image, &keep)?
            } else {
                composite_in(old_working.into_buffer(), &keep, &in_image)?
            };
            *working = composed;

            self.pool.put_back(BufferId::Working2, keep.into_buffer());
            self.pool.put_back(BufferId::SplitPiece, send.into_buffer());
            self.pool.put_back(BufferId::Incoming, in_image.into_buffer());

            bitmask <<= 1;
        }
        Ok(())
    }

    /// Upper-group side of telescoping: split the reduced image into one
    /// piece per covered lower rank and send each to the lower rank holding
    /// the same logical region.
    fn send_from_upper_group(
        &mut self,
        lower_group: &[usize],
        upper_group: &[usize],
        largest_group_size: usize,
        working: &SparseImage,
    ) -> FloeResult<()> {
        let num_pieces = lower_group.len() / upper_group.len();
        let eventual_num_pieces = largest_group_size / upper_group.len();
        let upper_rank = self.find_rank(upper_group)?;

        let (pieces, _offsets) = split_alloc(working, 0, num_pieces, eventual_num_pieces)?;

        // The lower rank owning piece p is the bit reversal of p, scaled by
        // the upper group size and offset by this rank's position.
        for (piece_index, piece) in pieces.iter().enumerate() {
            let dest = bit_reverse(piece_index, num_pieces) * upper_group.len() + upper_rank;
            tracing::debug!(piece = piece_index, dest = lower_group[dest], "telescoping piece");
            self.comm.send(
                piece.package_for_send(),
                MessageTag::Telescope,
                lower_group[dest],
            )?;
        }
        Ok(())
    }

    /// Lower-group side of telescoping: absorb the piece covering this
    /// rank's region. The sender is found by clearing the upper bits of the
    /// lower group rank.
    fn receive_from_upper_group(
        &mut self,
        lower_group: &[usize],
        upper_group: &[usize],
        working: &mut SparseImage,
    ) -> FloeResult<()> {
        if upper_group.is_empty() {
            return Ok(());
        }
        let lower_rank = self.find_rank(lower_group)?;
        let src = lower_rank & (upper_group.len() - 1);
        tracing::debug!(src = upper_group[src], "absorbing telescoped piece");

        let mut incoming = self.pool.take(BufferId::Incoming);
        self.comm
            .recv(&mut incoming, MessageTag::Telescope, upper_group[src])?;
        let in_image = SparseImage::unpackage_from_receive(incoming)?;

        let dest = self.pool.take(BufferId::Working2);
        let composed = composite_in(dest, &*working, &in_image)?;
        let old = std::mem::replace(working, composed);
        self.pool.put_back(BufferId::Working1, old.into_buffer());
        self.pool.put_back(BufferId::Incoming, in_image.into_buffer());
        Ok(())
    }
}
