//! Benchmarks for tile layout and tiled processing
//!
//! Run with: cargo bench --bench tiling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pixpool::{PixPool, PoolConfig, TilingConfig};
use pixpool_core::{PixelBuffer, PixelFormat};
use pixpool_tiling::calculate_tile_layout;

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tile Layout");

    for (width, height) in [(3840u32, 2160u32), (7680, 4320)] {
        group.bench_with_input(
            BenchmarkId::new("layout", format!("{width}x{height}")),
            &(width, height),
            |b, &(w, h)| {
                b.iter(|| calculate_tile_layout(black_box(w), black_box(h), 512, 32).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tiled Processing");
    group.sample_size(10);

    let mut source = PixelBuffer::new_direct(3840, 2160, PixelFormat::Argb8888).unwrap();
    source.fill(0x55);

    for overlap in [2u32, 32] {
        let tiling = TilingConfig::default().base_tile(512).overlap(overlap);
        let pool = PixPool::new(PoolConfig::default().tiling(tiling));

        group.bench_with_input(BenchmarkId::new("4k_invert", overlap), &overlap, |b, _| {
            b.iter(|| {
                let out = pool
                    .process_large(&source, |_, tile| {
                        for byte in tile.as_bytes_mut() {
                            *byte = !*byte;
                        }
                        Ok(())
                    })
                    .unwrap();
                pool.release(black_box(out));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_layout, bench_process);
criterion_main!(benches);
