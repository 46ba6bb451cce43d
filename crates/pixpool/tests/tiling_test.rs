//! Large image processing through pooled tiles

use pixpool::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

const ARGB: PixelFormat = PixelFormat::Argb8888;

fn gradient(width: u32, height: u32, format: PixelFormat) -> PixelBuffer {
    let mut buf = PixelBuffer::new_direct(width, height, format).unwrap();
    for y in 0..height {
        for (x, byte) in buf.row_mut(y).iter_mut().enumerate() {
            *byte = ((x as u32 * 3 + y * 5) % 256) as u8;
        }
    }
    buf
}

fn tiled_pool(base_tile: u32, overlap: u32) -> PixPool {
    let tiling = TilingConfig::default().base_tile(base_tile).overlap(overlap);
    PixPool::new(PoolConfig::default().tiling(tiling))
}

#[test]
fn test_4k_tiled_merge() {
    let pool = tiled_pool(512, 2);
    let source = gradient(3840, 2160, ARGB);
    assert!(pool.processor().needs_tiling(3840, 2160, ARGB));

    let tiles = AtomicUsize::new(0);
    let out = pool
        .process_large(&source, |tile, buf| {
            tiles.fetch_add(1, Ordering::Relaxed);
            assert_eq!(buf.width(), tile.extended_width());
            buf.fill(0x80);
            Ok(())
        })
        .unwrap();

    let count = tiles.load(Ordering::Relaxed);
    assert!((2..=64).contains(&count), "{count} tiles");
    assert_eq!((out.width(), out.height()), (3840, 2160));
    assert!(out.as_bytes().iter().all(|&b| b == 0x80));
}

#[test]
fn test_4k_report() {
    let pool = tiled_pool(512, 2);
    let source = gradient(3840, 2160, ARGB);
    let (out, report) = pool
        .processor()
        .process_with_report(&source, |_, _| Ok(()), None)
        .unwrap();

    assert_eq!(report.path, ProcessPath::Tiled);
    assert!(!report.degraded);
    assert!(report.tile_count <= consts::MAX_TILES);
    assert_eq!(out.as_bytes(), source.as_bytes());
}

#[test]
fn test_identity_transform_is_seamless() {
    let tiling = TilingConfig::default()
        .base_tile(128)
        .overlap(16)
        .max_extent(256);
    let pool = PixPool::new(PoolConfig::default().tiling(tiling));

    for format in [PixelFormat::Rgb565, PixelFormat::Argb8888, PixelFormat::RgbaF16] {
        let source = gradient(700, 333, format);
        let out = pool.process_large(&source, |_, _| Ok(())).unwrap();
        assert_eq!(out.as_bytes(), source.as_bytes(), "{format}");
        pool.release(out);
    }
}

#[test]
fn test_small_image_processed_directly() {
    let pool = PixPool::default();
    let source = gradient(640, 480, ARGB);
    let calls = AtomicUsize::new(0);
    let out = pool
        .process_large(&source, |tile, _| {
            calls.fetch_add(1, Ordering::Relaxed);
            assert_eq!((tile.width, tile.height), (640, 480));
            Ok(())
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(out.as_bytes(), source.as_bytes());
}

#[test]
fn test_cancellation_releases_leases() {
    let tiling = TilingConfig::default()
        .base_tile(64)
        .overlap(8)
        .max_extent(128)
        .concurrency(2);
    let pool = PixPool::new(PoolConfig::default().tiling(tiling));
    let source = gradient(512, 512, ARGB);
    let token = CancellationToken::new();

    let err = pool
        .process_large_with_cancel(
            &source,
            |tile, _| {
                if tile.row == 2 {
                    token.cancel();
                }
                Ok(())
            },
            &token,
        )
        .unwrap_err();
    assert_eq!(err, PoolError::Cancelled);

    let m = pool.metrics();
    assert_eq!(m.tile.requests(), m.tile.releases + m.tile.evictions);
    assert_eq!(m.primary.requests(), m.primary.releases + m.primary.evictions);
}

#[test]
fn test_can_process_size() {
    let pool = PixPool::default();
    assert!(pool.can_process_size(1920, 1080));
    assert!(pool.can_process_size(3840, 2160));
    assert!(!pool.can_process_size(0, 0));
    assert!(!pool.can_process_size(100_000, 100_000));
}

#[test]
fn test_layout_refused_when_too_coarse() {
    let tiling = TilingConfig::default().max_extent(256);
    let pool = PixPool::new(PoolConfig::default().tiling(tiling));
    let err = pool
        .processor()
        .calculate_tile_layout(8192, 8192, 128, 8)
        .unwrap_err();
    assert!(matches!(err, PoolError::SizeLimitExceeded { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_identity_merge_matches_source(
        width in 1u32..400,
        height in 1u32..400,
        overlap in 0u32..24,
    ) {
        let tiling = TilingConfig::default()
            .base_tile(64)
            .overlap(overlap)
            .max_extent(128);
        let pool = PixPool::new(PoolConfig::default().tiling(tiling));
        let source = gradient(width, height, ARGB);
        let out = pool.process_large(&source, |_, _| Ok(())).unwrap();
        prop_assert_eq!(out.as_bytes(), source.as_bytes());
    }
}
