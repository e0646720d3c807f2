//! Stream surgery: seek into a sparse payload, carve out pixel ranges, and
//! permute pixels for load balancing.
//!
//! Pixel ranges follow one partition rule throughout the crate: of `k`
//! partitions over `N` pixels, the first `N mod k` partitions hold
//! `⌊N/k⌋ + 1` pixels and the rest hold `⌊N/k⌋`. The rule nests cleanly
//! under repeated halving, which is what keeps binary-swap piece offsets and
//! interlace offsets consistent with each other.

use crate::codec::runs::{RunCursor, RunWriter};
use crate::foundation::bytes::ByteWriter;
use crate::foundation::error::{FloeError, FloeResult};
use crate::image::sparse::{SPARSE_HEADER_SIZE, SparseImage};

/// Reverse the low bits of `x` within a power-of-two `size`.
pub fn bit_reverse(x: usize, size: usize) -> usize {
    let mut result = 0;
    let mut input = x;
    let mut placeholder = 1;
    while placeholder < size {
        result <<= 1;
        result |= input & 1;
        input >>= 1;
        placeholder <<= 1;
    }
    result
}

/// Pixel offset where partition `index` of `k` begins in an `n`-pixel image
/// (clamped to `n`).
pub fn interlace_offset(index: usize, k: usize, n: usize) -> usize {
    if index >= k {
        return n;
    }
    index * (n / k) + index.min(n % k)
}

fn partition_span(index: usize, k: usize, n: usize) -> usize {
    interlace_offset(index + 1, k, n) - interlace_offset(index, k, n)
}

/// Advance `cursor` by exactly `count` logical pixels, optionally copying
/// them into `out`.
///
/// The cursor's intra-run position is preserved, and a copy extends any run
/// already in progress at the destination when the run class matches.
pub(crate) fn scan_pixels(
    cursor: &mut RunCursor<'_>,
    count: usize,
    mut out: Option<&mut RunWriter<'_>>,
) -> FloeResult<()> {
    let mut left = count;
    while left > 0 {
        if cursor.inactive() == 0 && cursor.active() == 0 {
            cursor.load_run()?;
        }

        let inactive = cursor.inactive().min(left);
        if inactive > 0 {
            if let Some(out) = out.as_deref_mut() {
                out.add_inactive(inactive)?;
            }
            cursor.consume_inactive(inactive);
            left -= inactive;
        }

        let active = cursor.active().min(left);
        if active > 0 {
            let (bytes, frags) = cursor.take_active(active)?;
            if let Some(out) = out.as_deref_mut() {
                out.copy_active(bytes, active, frags)?;
            }
            left -= active;
        }
    }
    Ok(())
}

/// Partition a sparse image into `num_partitions` sub-images over disjoint
/// pixel ranges, returning the pieces and their absolute pixel offsets
/// (`input_offset` plus each piece's start).
///
/// `eventual_num_partitions` is the granularity the image will ultimately be
/// split to; partition boundaries land on eventual-partition boundaries so
/// later splits of the pieces stay consistent. It must be a multiple of
/// `num_partitions`.
pub fn split_alloc(
    image: &SparseImage,
    input_offset: usize,
    num_partitions: usize,
    eventual_num_partitions: usize,
) -> FloeResult<(Vec<SparseImage>, Vec<usize>)> {
    split_into_buffers(
        image,
        input_offset,
        eventual_num_partitions,
        vec![Vec::new(); num_partitions],
    )
}

/// Like [`split_alloc`], drawing each piece's allocation from `buffers`.
pub fn split_into_buffers(
    image: &SparseImage,
    input_offset: usize,
    eventual_num_partitions: usize,
    buffers: Vec<Vec<u8>>,
) -> FloeResult<(Vec<SparseImage>, Vec<usize>)> {
    let num_partitions = buffers.len();
    if num_partitions == 0
        || eventual_num_partitions == 0
        || !eventual_num_partitions.is_multiple_of(num_partitions)
    {
        return Err(FloeError::invalid_value(
            "eventual partition count must be a multiple of the partition count",
        ));
    }
    let per = eventual_num_partitions / num_partitions;
    let total = image.pixel_count();
    let layout = image.layout();
    let payload_bound = image.actual_byte_size() - SPARSE_HEADER_SIZE;

    let mut cursor = RunCursor::new(image);
    let mut images = Vec::with_capacity(num_partitions);
    let mut offsets = Vec::with_capacity(num_partitions);
    let mut start = 0;
    for (partition, buffer) in buffers.into_iter().enumerate() {
        let end = interlace_offset((partition + 1) * per, eventual_num_partitions, total);
        let count = end - start;
        let capacity = SPARSE_HEADER_SIZE
            + (count / 2 + 2) * layout.run_header_size()
            + payload_bound;
        let mut piece = SparseImage::with_capacity_in(buffer, layout, count, 1, capacity)?;
        {
            let mut rw = RunWriter::new(ByteWriter::new(piece.payload_mut()), layout.layered);
            scan_pixels(&mut cursor, count, Some(&mut rw))?;
            let len = rw.finish()?;
            piece.finish_payload(len)?;
        }
        images.push(piece);
        offsets.push(input_offset + start);
        start = end;
    }
    Ok((images, offsets))
}

/// Permute pixels so that a later `split_alloc` over
/// `eventual_num_partitions` partitions sees roughly equal active-pixel
/// counts: pixel `i` lands in partition `i mod k` at intra-partition
/// position `i / k`.
pub fn interlace_alloc(
    image: &SparseImage,
    eventual_num_partitions: usize,
) -> FloeResult<SparseImage> {
    interlace_into_buffer(image, eventual_num_partitions, Vec::new())
}

/// Like [`interlace_alloc`], reusing `buffer` for the output.
pub fn interlace_into_buffer(
    image: &SparseImage,
    eventual_num_partitions: usize,
    buffer: Vec<u8>,
) -> FloeResult<SparseImage> {
    let k = eventual_num_partitions;
    if k == 0 {
        return Err(FloeError::invalid_value(
            "cannot interlace into zero partitions",
        ));
    }
    let total = image.pixel_count();
    let layout = image.layout();
    let capacity = SPARSE_HEADER_SIZE
        + (total / 2 + 2) * layout.run_header_size()
        + (image.actual_byte_size() - SPARSE_HEADER_SIZE);
    let mut dest =
        SparseImage::with_capacity_in(buffer, layout, image.width(), image.height(), capacity)?;
    {
        let mut rw = RunWriter::new(ByteWriter::new(dest.payload_mut()), layout.layered);
        for group in 0..k {
            let span = partition_span(group, k, total);
            if span == 0 {
                continue;
            }
            let mut cursor = RunCursor::new(image);
            scan_pixels(&mut cursor, group, None)?;
            for position in 0..span {
                scan_pixels(&mut cursor, 1, Some(&mut rw))?;
                if position + 1 < span {
                    scan_pixels(&mut cursor, k - 1, None)?;
                }
            }
        }
        let len = rw.finish()?;
        dest.finish_payload(len)?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compress::{CompressOptions, compress};
    use crate::codec::decompress::{Background, decompress};
    use crate::image::dense::DenseImage;
    use crate::image::format::{ColorFormat, CompositeMode, DepthFormat};

    fn ramp_image(pixels: usize) -> DenseImage {
        let mut image =
            DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::F32, pixels, 1).unwrap();
        for x in 0..pixels {
            // Leave every third pixel as background.
            if x % 3 != 1 {
                image
                    .set_rgba_u8(x, 0, 0, [x as u8, 0, 255 - x as u8, 255])
                    .unwrap();
                image.set_depth(x, 0, 0, x as f32 / pixels as f32).unwrap();
            }
        }
        image
    }

    #[test]
    fn bit_reverse_within_a_power_of_two() {
        assert_eq!(bit_reverse(0, 8), 0);
        assert_eq!(bit_reverse(1, 8), 4);
        assert_eq!(bit_reverse(3, 8), 6);
        assert_eq!(bit_reverse(6, 8), 3);
        assert_eq!(bit_reverse(1, 2), 1);
        assert_eq!(bit_reverse(0, 1), 0);
    }

    #[test]
    fn partition_offsets_spread_the_remainder_first() {
        // 10 pixels over 4 partitions: sizes 3, 3, 2, 2.
        assert_eq!(interlace_offset(0, 4, 10), 0);
        assert_eq!(interlace_offset(1, 4, 10), 3);
        assert_eq!(interlace_offset(2, 4, 10), 6);
        assert_eq!(interlace_offset(3, 4, 10), 8);
        assert_eq!(interlace_offset(4, 4, 10), 10);
        assert_eq!(interlace_offset(9, 4, 10), 10);
    }

    #[test]
    fn split_pieces_decompress_to_the_matching_ranges() {
        let image = ramp_image(10);
        let sparse = compress(
            &image,
            CompositeMode::ZBuffer,
            &CompressOptions::default(),
        )
        .unwrap();
        let (pieces, offsets) = split_alloc(&sparse, 0, 4, 4).unwrap();
        assert_eq!(offsets, vec![0, 3, 6, 8]);

        let whole = decompress(&sparse, Background::Transparent).unwrap();
        for (piece, &offset) in pieces.iter().zip(&offsets) {
            let dense = decompress(piece, Background::Transparent).unwrap();
            let count = piece.pixel_count();
            assert_eq!(
                dense.color_rgba_u8().unwrap(),
                &whole.color_rgba_u8().unwrap()[offset * 4..(offset + count) * 4]
            );
            assert_eq!(
                dense.depth().unwrap(),
                &whole.depth().unwrap()[offset..offset + count]
            );
        }
    }

    #[test]
    fn split_respects_eventual_partition_boundaries() {
        let image = ramp_image(13);
        let sparse = compress(
            &image,
            CompositeMode::ZBuffer,
            &CompressOptions::default(),
        )
        .unwrap();
        // Splitting in two with an eventual count of 8 must land on the
        // 8-partition boundary: sizes 2,2,2,2,2,1,1,1 -> 8 and 5.
        let (pieces, offsets) = split_alloc(&sparse, 0, 2, 8).unwrap();
        assert_eq!(offsets, vec![0, 8]);
        assert_eq!(pieces[0].pixel_count(), 8);
        assert_eq!(pieces[1].pixel_count(), 5);
    }

    #[test]
    fn split_layered_pieces_round_trip() {
        // A layered image whose active run straddles the split boundary, so
        // the scan has to count fragments pixel by pixel.
        let mut image =
            DenseImage::allocate_layered(ColorFormat::RgbaU8, DepthFormat::F32, 6, 1, 2).unwrap();
        for x in 1..5usize {
            image.set_rgba_u8(x, 0, 0, [x as u8, 0, 0, 255]).unwrap();
            image.set_depth(x, 0, 0, 0.2).unwrap();
            if x % 2 == 0 {
                image.set_rgba_u8(x, 0, 1, [0, x as u8, 0, 128]).unwrap();
                image.set_depth(x, 0, 1, 0.7).unwrap();
            }
        }
        let sparse = compress(&image, CompositeMode::Blend, &CompressOptions::default()).unwrap();
        assert!(sparse.is_layered());

        let (pieces, offsets) = split_alloc(&sparse, 0, 2, 2).unwrap();
        assert_eq!(offsets, vec![0, 3]);

        let whole = decompress(&sparse, Background::Transparent).unwrap();
        for (piece, &offset) in pieces.iter().zip(&offsets) {
            let dense = decompress(piece, Background::Transparent).unwrap();
            for j in 0..piece.pixel_count() {
                assert_eq!(
                    dense.rgba_u8_at(j, 0, 0).unwrap(),
                    whole.rgba_u8_at(offset + j, 0, 0).unwrap()
                );
            }
        }
    }

    #[test]
    fn interlace_permutes_pixels_by_group() {
        let pixels = 10;
        let k = 4;
        let image = ramp_image(pixels);
        let sparse = compress(
            &image,
            CompositeMode::ZBuffer,
            &CompressOptions::default(),
        )
        .unwrap();
        let interlaced = interlace_alloc(&sparse, k).unwrap();
        assert_eq!(interlaced.pixel_count(), pixels);

        let plain = decompress(&sparse, Background::Transparent).unwrap();
        let permuted = decompress(&interlaced, Background::Transparent).unwrap();
        for i in 0..pixels {
            let dest = interlace_offset(i % k, k, pixels) + i / k;
            assert_eq!(
                permuted.rgba_u8_at(dest, 0, 0).unwrap(),
                plain.rgba_u8_at(i, 0, 0).unwrap()
            );
            assert_eq!(
                permuted.depth_at(dest, 0, 0).unwrap(),
                plain.depth_at(i, 0, 0).unwrap()
            );
        }
    }

    #[test]
    fn interlace_then_split_balances_and_round_trips() {
        let pixels = 12;
        let k = 4;
        let image = ramp_image(pixels);
        let sparse = compress(
            &image,
            CompositeMode::ZBuffer,
            &CompressOptions::default(),
        )
        .unwrap();
        let interlaced = interlace_alloc(&sparse, k).unwrap();
        let (pieces, offsets) = split_alloc(&interlaced, 0, k, k).unwrap();

        assert_eq!(offsets, vec![0, 3, 6, 9]);
        let plain = decompress(&sparse, Background::Transparent).unwrap();
        for (group, piece) in pieces.iter().enumerate() {
            let dense = decompress(piece, Background::Transparent).unwrap();
            for position in 0..piece.pixel_count() {
                // De-interlacing partition `group` maps position j back to
                // pixel j*k + group of the original image.
                let source = position * k + group;
                assert_eq!(
                    dense.rgba_u8_at(position, 0, 0).unwrap(),
                    plain.rgba_u8_at(source, 0, 0).unwrap()
                );
            }
        }
    }
}
