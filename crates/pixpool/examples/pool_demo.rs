//! # Pool Demo
//!
//! Walks through a typical pipeline session: warm-up, steady-state reuse,
//! a tiled 4K frame, a memory warning and shutdown.
//!
//! ```bash
//! RUST_LOG=debug cargo run -p pixpool --example pool_demo
//! ```

use anyhow::{Context, Result};
use pixpool::{
    PixPool, PixelFormat, PlatformSignal, PoolConfig, PreallocSize, TilingConfig,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = PoolConfig::default()
        .preallocate(PreallocSize::new(1280, 720, PixelFormat::Argb8888, 2))
        .preallocate(PreallocSize::new(512, 512, PixelFormat::Argb8888, 3).tile())
        .tiling(TilingConfig::default().base_tile(512).overlap(16));
    let pool = PixPool::new(config);
    let tuner = pool.spawn_tuner(Duration::from_millis(200));

    // ==================== STEADY STATE ====================
    for frame in 0..50u32 {
        let mut buf = pool
            .acquire(1280, 720, PixelFormat::Argb8888)
            .with_context(|| format!("frame {frame}"))?;
        buf.fill((frame % 256) as u8);
        pool.release(buf);
    }
    info!(hit_rate = pool.metrics().hit_rate(), "steady state done");

    // ==================== TILED 4K FRAME ====================
    let mut source = pool.acquire(3840, 2160, PixelFormat::Argb8888)?;
    source.fill(0x40);
    let out = pool.process_large(&source, |_, tile| {
        for byte in tile.as_bytes_mut() {
            *byte = byte.saturating_mul(2);
        }
        Ok(())
    })?;
    info!(
        width = out.width(),
        height = out.height(),
        first = out.as_bytes()[0],
        "4K frame processed"
    );
    pool.release(source);
    pool.release(out);

    // ==================== MEMORY WARNING ====================
    let report = pool.on_platform_signal(PlatformSignal::RunningCritical);
    info!(level = ?report.level, evicted = report.evicted, "memory warning handled");

    pool.log_stats();
    tuner.stop();
    pool.shutdown();
    Ok(())
}
