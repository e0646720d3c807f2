//! Round-trip and invariant properties of the sparse image codec.

use floe::{
    Background, ColorFormat, CompositeMode, CompressOptions, DenseImage, DepthFormat,
    SPARSE_HEADER_SIZE, composite, compress, decompress, max_buffer_size,
};

/// A 8x3 z-buffer test pattern with scattered foreground pixels.
fn z_pattern() -> DenseImage {
    let mut image = DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::F32, 8, 3).unwrap();
    for (x, y, color, depth) in [
        (0usize, 0usize, [255, 0, 0, 255], 0.1f32),
        (1, 0, [0, 255, 0, 255], 0.2),
        (5, 0, [0, 0, 255, 255], 0.3),
        (2, 1, [128, 128, 0, 255], 0.5),
        (3, 1, [0, 128, 128, 255], 0.6),
        (4, 1, [128, 0, 128, 255], 0.7),
        (7, 2, [64, 64, 64, 255], 0.9),
    ] {
        image.set_rgba_u8(x, y, 0, color).unwrap();
        image.set_depth(x, y, 0, depth).unwrap();
    }
    image
}

#[test]
fn p1_zbuffer_rgba_u8_round_trip() {
    let image = z_pattern();
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let back = decompress(&sparse, Background::Transparent).unwrap();
    assert_eq!(back.color_rgba_u8().unwrap(), image.color_rgba_u8().unwrap());
    assert_eq!(back.depth().unwrap(), image.depth().unwrap());
}

#[test]
fn p1_zbuffer_rgba_f32_round_trip() {
    let mut image = DenseImage::allocate(ColorFormat::RgbaF32, DepthFormat::F32, 5, 2).unwrap();
    for x in [0usize, 2, 3] {
        image
            .set_rgba_f32(x, 1, 0, [x as f32 * 0.25, 0.5, 0.125, 1.0])
            .unwrap();
        image.set_depth(x, 1, 0, 0.25 + x as f32 * 0.1).unwrap();
    }
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let back = decompress(&sparse, Background::Transparent).unwrap();
    assert_eq!(
        back.color_rgba_f32().unwrap(),
        image.color_rgba_f32().unwrap()
    );
    assert_eq!(back.depth().unwrap(), image.depth().unwrap());
}

#[test]
fn p1_depth_only_round_trip() {
    let mut image = DenseImage::allocate(ColorFormat::None, DepthFormat::F32, 6, 1).unwrap();
    image.set_depth(1, 0, 0, 0.5).unwrap();
    image.set_depth(2, 0, 0, 0.75).unwrap();
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let back = decompress(&sparse, Background::Transparent).unwrap();
    assert_eq!(back.depth().unwrap(), image.depth().unwrap());
}

#[test]
fn p1_blend_round_trips() {
    let mut u8_image = DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::None, 4, 1).unwrap();
    u8_image.set_rgba_u8(1, 0, 0, [100, 50, 25, 200]).unwrap();
    u8_image.set_rgba_u8(2, 0, 0, [10, 20, 30, 40]).unwrap();
    let sparse = compress(&u8_image, CompositeMode::Blend, &CompressOptions::default()).unwrap();
    let back = decompress(&sparse, Background::Transparent).unwrap();
    assert_eq!(
        back.color_rgba_u8().unwrap(),
        u8_image.color_rgba_u8().unwrap()
    );

    let mut f32_image =
        DenseImage::allocate(ColorFormat::RgbaF32, DepthFormat::None, 4, 1).unwrap();
    f32_image
        .set_rgba_f32(3, 0, 0, [0.25, 0.5, 0.75, 0.5])
        .unwrap();
    let sparse = compress(&f32_image, CompositeMode::Blend, &CompressOptions::default()).unwrap();
    let back = decompress(&sparse, Background::Transparent).unwrap();
    assert_eq!(
        back.color_rgba_f32().unwrap(),
        f32_image.color_rgba_f32().unwrap()
    );
}

#[test]
fn p2_recompression_reproduces_the_stream() {
    let image = z_pattern();
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let dense = decompress(&sparse, Background::Transparent).unwrap();
    let again = compress(&dense, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    assert_eq!(again.payload(), sparse.payload());
    assert_eq!(again.actual_byte_size(), sparse.actual_byte_size());
}

#[test]
fn p9_actual_size_never_exceeds_the_worst_case() {
    // Alternating active/inactive is the worst case for run overhead.
    let mut image = DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::F32, 16, 1).unwrap();
    for x in (0..16).step_by(2) {
        image.set_rgba_u8(x, 0, 0, [1, 2, 3, 255]).unwrap();
        image.set_depth(x, 0, 0, 0.5).unwrap();
    }
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let bound = max_buffer_size(ColorFormat::RgbaU8, DepthFormat::F32, false, 16, 1, 1).unwrap();
    assert!(sparse.actual_byte_size() <= bound);

    // Fully active is the worst case for payload.
    let mut full = DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::F32, 16, 1).unwrap();
    for x in 0..16 {
        full.set_rgba_u8(x, 0, 0, [1, 2, 3, 255]).unwrap();
        full.set_depth(x, 0, 0, 0.5).unwrap();
    }
    let sparse = compress(&full, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    assert!(sparse.actual_byte_size() <= bound);
    assert_eq!(
        sparse.actual_byte_size(),
        SPARSE_HEADER_SIZE + 8 + 16 * 8
    );
}

#[test]
fn p7_run_totals_cover_the_image() {
    let image = z_pattern();
    let sparse = compress(&image, CompositeMode::ZBuffer, &CompressOptions::default()).unwrap();
    let payload = sparse.payload();
    let mut pos = 0;
    let mut pixels = 0usize;
    while pos < payload.len() {
        let inactive = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
        let active = u32::from_le_bytes(payload[pos + 4..pos + 8].try_into().unwrap()) as usize;
        pixels += inactive + active;
        pos += 8 + active * 8;
    }
    assert_eq!(pixels, sparse.pixel_count());
}

fn layered_1x1(frags: &[([u8; 4], f32)]) -> floe::SparseImage {
    let mut image = DenseImage::allocate_layered(
        ColorFormat::RgbaU8,
        DepthFormat::F32,
        1,
        1,
        frags.len().max(1),
    )
    .unwrap();
    for (layer, &(color, depth)) in frags.iter().enumerate() {
        image.set_rgba_u8(0, 0, layer, color).unwrap();
        image.set_depth(0, 0, layer, depth).unwrap();
    }
    compress(&image, CompositeMode::Blend, &CompressOptions::default()).unwrap()
}

#[test]
fn p5_layered_merge_is_order_preserving_not_commutative() {
    // Distinct depths: both orders merge to the same depth-sorted list.
    let front = layered_1x1(&[([100, 0, 0, 200], 0.2)]);
    let back = layered_1x1(&[([0, 100, 0, 200], 0.4)]);
    let fb = composite(&front, &back).unwrap();
    let bf = composite(&back, &front).unwrap();
    assert_eq!(fb.payload(), bf.payload());

    // Equal depths: the front input's fragment stays first, so swapping the
    // inputs reorders the list (and changes the blended result).
    let front = layered_1x1(&[([100, 0, 0, 200], 0.5)]);
    let back = layered_1x1(&[([0, 100, 0, 200], 0.5)]);
    let fb = composite(&front, &back).unwrap();
    let bf = composite(&back, &front).unwrap();
    assert_ne!(fb.payload(), bf.payload());

    let d_fb = decompress(&fb, Background::Transparent).unwrap();
    let d_bf = decompress(&bf, Background::Transparent).unwrap();
    assert_ne!(
        d_fb.rgba_u8_at(0, 0, 0).unwrap(),
        d_bf.rgba_u8_at(0, 0, 0).unwrap()
    );
}

#[test]
fn p8_layered_fragment_totals_are_consistent() {
    let mut image =
        DenseImage::allocate_layered(ColorFormat::RgbaU8, DepthFormat::F32, 3, 1, 3).unwrap();
    // Pixel 0: 2 fragments, pixel 1: background, pixel 2: 1 fragment.
    image.set_rgba_u8(0, 0, 0, [1, 0, 0, 255]).unwrap();
    image.set_depth(0, 0, 0, 0.1).unwrap();
    image.set_rgba_u8(0, 0, 1, [2, 0, 0, 128]).unwrap();
    image.set_depth(0, 0, 1, 0.2).unwrap();
    image.set_rgba_u8(2, 0, 0, [3, 0, 0, 64]).unwrap();
    image.set_depth(2, 0, 0, 0.3).unwrap();

    let sparse = compress(&image, CompositeMode::Blend, &CompressOptions::default()).unwrap();
    let payload = sparse.payload();

    // Walk runs, checking per-pixel layer counts against run fragment
    // totals.
    let mut pos = 0;
    let mut pixels = 0usize;
    let mut total_frags = 0usize;
    while pos < payload.len() {
        let inactive = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
        let active = u32::from_le_bytes(payload[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let run_frags = u32::from_le_bytes(payload[pos + 8..pos + 12].try_into().unwrap()) as usize;
        pos += 12;
        let mut seen = 0usize;
        for _ in 0..active {
            let count = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4 + count * 8;
            seen += count;
        }
        assert_eq!(seen, run_frags);
        pixels += inactive + active;
        total_frags += run_frags;
    }
    assert_eq!(pixels, 3);
    assert_eq!(total_frags, 3);
}
