//! End-to-end runs through the `Compositor` facade.

use std::thread;

use floe::{
    Background, ColorFormat, CompositeMode, Compositor, Config, DenseImage, DepthFormat,
    FloeError, LocalCommunicator, SingleImageStrategy,
};

#[test]
fn compress_rejects_mismatched_formats() {
    let compositor = Compositor::new(Config {
        interlace_images: false,
        ..Config::default()
    })
    .unwrap();
    let image = DenseImage::allocate(ColorFormat::RgbaF32, DepthFormat::F32, 2, 2).unwrap();
    assert!(matches!(
        compositor.compress(&image),
        Err(FloeError::InvalidValue(_))
    ));
}

#[test]
fn zbuffer_session_over_two_ranks() {
    let width = 4;
    let config = Config {
        interlace_images: false,
        ..Config::default()
    };
    let comms = LocalCommunicator::group(2);
    let handles: Vec<_> = comms
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let config = config.clone();
            thread::spawn(move || {
                let mut compositor = Compositor::new(config).unwrap();
                let mut image =
                    DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::F32, width, 1).unwrap();
                // Each rank draws the whole row; rank 0 is nearer on the
                // left half, rank 1 on the right.
                for x in 0..width {
                    let near = (x < width / 2) == (rank == 0);
                    image
                        .set_rgba_u8(x, 0, 0, [rank as u8 * 100 + 50, x as u8, 0, 255])
                        .unwrap();
                    image
                        .set_depth(x, 0, 0, if near { 0.2 } else { 0.8 })
                        .unwrap();
                }
                let sparse = compositor.compress(&image).unwrap();
                let (piece, offset) = compositor.binary_swap(&comm, sparse).unwrap();
                let dense = compositor
                    .decompress(&piece, Background::Transparent)
                    .unwrap();
                (dense.color_rgba_u8().unwrap().to_vec(), offset)
            })
        })
        .collect();
    let results: Vec<(Vec<u8>, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results[0].1, 0);
    assert_eq!(results[1].1, 2);
    // Left half: rank 0's near fragments. Right half: rank 1's.
    assert_eq!(&results[0].0[0..4], &[50, 0, 0, 255]);
    assert_eq!(&results[0].0[4..8], &[50, 1, 0, 255]);
    assert_eq!(&results[1].0[0..4], &[150, 2, 0, 255]);
    assert_eq!(&results[1].0[4..8], &[150, 3, 0, 255]);
}

#[test]
fn blend_folding_session_over_three_ranks() {
    let width = 6;
    let config = Config {
        color_format: ColorFormat::RgbaU8,
        depth_format: DepthFormat::None,
        composite_mode: CompositeMode::Blend,
        single_image_strategy: SingleImageStrategy::BinarySwapFolding,
        interlace_images: false,
        ..Config::default()
    };
    let comms = LocalCommunicator::group(3);
    let handles: Vec<_> = comms
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let config = config.clone();
            thread::spawn(move || {
                let mut compositor = Compositor::new(config).unwrap();
                let mut image =
                    DenseImage::allocate(ColorFormat::RgbaU8, DepthFormat::None, width, 1)
                        .unwrap();
                for x in 0..width {
                    image
                        .set_rgba_u8(x, 0, 0, [40 * rank as u8 + 40, 10, 0, 120])
                        .unwrap();
                }
                let sparse = compositor.compress(&image).unwrap();
                let (piece, offset) = compositor.binary_swap(&comm, sparse).unwrap();
                if piece.is_null() {
                    (None, offset)
                } else {
                    let dense = compositor
                        .decompress(&piece, Background::Transparent)
                        .unwrap();
                    (Some(dense.color_rgba_u8().unwrap().to_vec()), offset)
                }
            })
        })
        .collect();
    let results: Vec<(Option<Vec<u8>>, usize)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Rank 1 folded into rank 0 and dropped out.
    assert!(results[1].0.is_none());
    assert!(results[0].0.is_some());
    assert!(results[2].0.is_some());
    assert_eq!(results[0].1, 0);
    assert_eq!(results[2].1, width / 2);

    // Every surviving pixel blends rank 0 over rank 1 over rank 2.
    let expected = {
        let over = |front: [u8; 4], back: [u8; 4]| {
            let inv = 255u16 - u16::from(front[3]);
            let mut out = [0u8; 4];
            for i in 0..4 {
                out[i] = front[i]
                    .saturating_add((((u32::from(back[i]) * u32::from(inv)) + 127) / 255) as u8);
            }
            out
        };
        over(over([40, 10, 0, 120], [80, 10, 0, 120]), [120, 10, 0, 120])
    };
    for piece in [&results[0].0, &results[2].0] {
        let colors = piece.as_ref().unwrap();
        assert_eq!(&colors[0..4], &expected);
    }
}
