//! # pixpool
//!
//! Reusable pixel buffers for image pipelines that transform many images of
//! repeating sizes, plus tiled processing for images too large to handle in
//! one piece.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pixpool::{PixPool, PixelFormat, PoolConfig, PressureLevel};
//!
//! let pool = PixPool::new(PoolConfig::default());
//!
//! let buffer = pool.acquire(1280, 720, PixelFormat::Argb8888).unwrap();
//! // ... run the model on `buffer` ...
//! pool.release(buffer);
//!
//! // Memory warnings from the platform shrink the idle buffers
//! pool.on_memory_pressure(PressureLevel::Moderate);
//! println!("hit rate: {:.2}", pool.metrics().hit_rate());
//! ```
//!
//! ## Architecture
//!
//! - [`PoolManager`] owns a primary pool for whole images and a tile pool
//! - [`ResourcePool`] buckets idle buffers by exact width, height and format
//! - [`MemoryTrimmer`] maps pressure levels to shrink and clear actions
//! - [`LargeResourceProcessor`] tiles oversized images and blends the seams

use std::sync::Arc;
use tracing::info;

pub use pixpool_core::{
    consts, BufferOrigin, Dimensions, PixelBuffer, PixelFormat, PoolConfig, PoolError, PoolId,
    PoolKey, PoolKind, PoolResult, PreallocSize, Sample, TilingConfig, TuningConfig,
};
pub use pixpool_pool::{
    BufferAllocator, BufferSink, KeyStats, ManagerMetrics, MemoryTrimmer, PlatformSignal,
    PoolManager, PoolMetricsSnapshot, PooledBuffer, PressureLevel, ResourcePool, SystemAllocator,
    TrimReport, TunerHandle, TuningAction, TuningDecision,
};
pub use pixpool_tiling::{
    CancellationToken, FixedExtent, LargeResourceProcessor, MaxExtent, ProcessPath,
    ProcessReport, TileInfo, TileLayout,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer pooling context for one pipeline
///
/// Wires a [`PoolManager`] to a [`LargeResourceProcessor`]. Cloning is
/// cheap and every clone shares the same pools.
#[derive(Clone)]
pub struct PixPool {
    manager: Arc<PoolManager>,
    processor: Arc<LargeResourceProcessor>,
}

impl PixPool {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_manager(Arc::new(PoolManager::new(config)))
    }

    /// Wrap an existing manager, e.g. one built with a custom allocator
    pub fn with_manager(manager: Arc<PoolManager>) -> Self {
        let tiling = manager.config().tiling.clone();
        let processor = LargeResourceProcessor::new(Arc::clone(&manager), tiling);
        info!(version = VERSION, pooling = manager.is_pooling(), "pixpool ready");
        Self {
            manager,
            processor: Arc::new(processor),
        }
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    pub fn processor(&self) -> &LargeResourceProcessor {
        &self.processor
    }

    /// Buffer for a whole image from the primary pool
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> PoolResult<PixelBuffer> {
        self.manager.acquire_primary(width, height, format)
    }

    pub fn acquire_tile(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PixelBuffer> {
        self.manager.acquire_tile(width, height, format)
    }

    /// Primary buffer that releases itself when dropped
    pub fn acquire_scoped(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PooledBuffer<'_>> {
        self.manager
            .acquire_scoped(PoolKind::Primary, width, height, format)
    }

    /// Hand a buffer back; `None` is a no-op
    pub fn release(&self, buffer: impl Into<Option<PixelBuffer>>) {
        self.manager.release(buffer);
    }

    pub fn preallocate(&self, sizes: &[PreallocSize]) -> usize {
        self.manager.preallocate(sizes)
    }

    pub fn on_memory_pressure(&self, level: PressureLevel) -> TrimReport {
        self.manager.on_memory_pressure(level)
    }

    pub fn on_platform_signal(&self, signal: PlatformSignal) -> TrimReport {
        self.manager.on_platform_signal(signal)
    }

    pub fn metrics(&self) -> ManagerMetrics {
        self.manager.metrics()
    }

    /// Transform `source`, tiling it if it exceeds the processing limits
    pub fn process_large<F>(&self, source: &PixelBuffer, transform: F) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        self.processor.process(source, transform)
    }

    /// [`process_large`](Self::process_large) with cancellation
    pub fn process_large_with_cancel<F>(
        &self,
        source: &PixelBuffer,
        transform: F,
        token: &CancellationToken,
    ) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        self.processor.process_with_cancel(source, transform, token)
    }

    /// True if an image of this size in the default format can be processed
    pub fn can_process_size(&self, width: u32, height: u32) -> bool {
        self.processor
            .can_process_size(width, height, PixelFormat::default())
    }

    pub fn auto_tune(&self) -> Vec<(PoolKind, TuningDecision)> {
        self.manager.auto_tune()
    }

    /// Run auto-tuning in the background until the handle is dropped
    pub fn spawn_tuner(&self, interval: std::time::Duration) -> TunerHandle {
        self.manager.spawn_tuner(interval)
    }

    pub fn log_stats(&self) {
        self.manager.log_stats();
    }

    /// Drop idle buffers and switch to direct allocation
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

impl Default for PixPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_clones_share_pools() {
        let pool = PixPool::default();
        let other = pool.clone();
        pool.release(pool.acquire(32, 32, PixelFormat::Argb8888).unwrap());
        assert_eq!(other.metrics().current_pool_size(), 1);
    }

    #[test]
    fn test_release_none() {
        let pool = PixPool::default();
        pool.release(None);
        assert_eq!(pool.metrics().releases(), 0);
    }
}
