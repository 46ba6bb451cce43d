//! Benchmarks for acquire/release cycles
//!
//! Run with: cargo bench --bench pool

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pixpool::{PixPool, PoolConfig};
use pixpool_core::{PixelBuffer, PixelFormat, PoolKind};
use pixpool_pool::ResourcePool;
use std::sync::Arc;
use std::thread;

const SIZES: [(u32, u32); 3] = [(256, 256), (1280, 720), (1920, 1080)];

fn bench_pooled_vs_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("Acquire Release");

    for (width, height) in SIZES {
        let id = format!("{width}x{height}");
        let pool = ResourcePool::new(PoolKind::Primary, 3, 256 << 20);

        group.bench_with_input(BenchmarkId::new("pooled", &id), &(width, height), |b, &(w, h)| {
            b.iter(|| {
                let buf = pool.acquire(w, h, PixelFormat::Argb8888).unwrap();
                pool.release(black_box(buf));
            });
        });

        group.bench_with_input(BenchmarkId::new("direct", &id), &(width, height), |b, &(w, h)| {
            b.iter(|| {
                let buf = PixelBuffer::new_direct(w, h, PixelFormat::Argb8888).unwrap();
                black_box(buf);
            });
        });
    }

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("Contended Pool");
    group.sample_size(20);

    for threads in [2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::new("threads", threads), &threads, |b, &n| {
            let pool = Arc::new(PixPool::new(PoolConfig::default().max_per_key(8)));
            b.iter(|| {
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let pool = Arc::clone(&pool);
                        thread::spawn(move || {
                            for _ in 0..100 {
                                let buf = pool.acquire(128, 128, PixelFormat::Argb8888).unwrap();
                                pool.release(buf);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pooled_vs_direct, bench_contended);
criterion_main!(benches);
