//! Two-pool manager: the single entry point for buffer traffic
//!
//! Whole-image and tile-sized traffic live in separate pools so neither can
//! starve the other's buckets. The manager also owns preallocation, the
//! auto-tuning loop, the memory pressure hook and the one-shot OOM recovery.

use crate::allocator::{BufferAllocator, SystemAllocator};
use crate::metrics::{ManagerMetrics, PoolMetricsSnapshot};
use crate::pool::{BufferSink, PooledBuffer, ResourcePool};
use crate::trimmer::{MemoryTrimmer, PlatformSignal, PressureLevel, TrimReport};
use crate::tuning::{tune, TuningDecision, TuningInput};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use pixpool_core::{
    consts, BufferOrigin, PixelBuffer, PixelFormat, PoolConfig, PoolError, PoolKind, PoolResult,
    PreallocSize,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default, Clone, Copy)]
struct TuningState {
    last: PoolMetricsSnapshot,
    previous_hit_rate: Option<f64>,
}

/// Coordinator owning the primary and tile pools
///
/// Created once with [`PoolManager::new`] and shared behind an `Arc`. After
/// [`PoolManager::shutdown`], or when the configuration disables pooling,
/// every acquire allocates directly and every release drops the buffer.
pub struct PoolManager {
    config: PoolConfig,
    primary: ResourcePool,
    tile: ResourcePool,
    trimmer: MemoryTrimmer,
    pooling: AtomicBool,
    tuning: Mutex<[TuningState; 2]>,
    created: Instant,
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_allocator(config, Arc::new(SystemAllocator))
    }

    /// Create a manager whose pools allocate through `allocator`
    ///
    /// An invalid configuration does not fail: pooling is turned off and the
    /// manager falls back to direct allocation.
    pub fn with_allocator(config: PoolConfig, allocator: Arc<dyn BufferAllocator>) -> Self {
        let mut pooling = config.enabled;
        if let Err(e) = config.validate() {
            warn!(error = %e, "invalid pool configuration, falling back to direct allocation");
            pooling = false;
        }

        let max_per_key = config.max_per_key.max(1);
        let primary = ResourcePool::with_allocator(
            PoolKind::Primary,
            max_per_key,
            config.pool_bytes(PoolKind::Primary),
            Arc::clone(&allocator),
        );
        let tile = ResourcePool::with_allocator(
            PoolKind::Tile,
            max_per_key,
            config.pool_bytes(PoolKind::Tile),
            allocator,
        );

        let manager = Self {
            trimmer: MemoryTrimmer::new(config.trim_on_pressure),
            primary,
            tile,
            pooling: AtomicBool::new(pooling),
            tuning: Mutex::new([TuningState::default(); 2]),
            created: Instant::now(),
            config,
        };

        if pooling {
            if !manager.config.preallocate.is_empty() {
                let sizes = manager.config.preallocate.clone();
                manager.preallocate(&sizes);
            }
            info!(
                max_mb = manager.config.max_pool_bytes as f64 / consts::MIB as f64,
                max_per_key,
                "pool manager initialized"
            );
        } else {
            info!("pool manager running without pooling");
        }
        manager
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// False when disabled by configuration or after shutdown
    pub fn is_pooling(&self) -> bool {
        self.pooling.load(Ordering::Acquire)
    }

    pub fn pool(&self, kind: PoolKind) -> &ResourcePool {
        match kind {
            PoolKind::Primary => &self.primary,
            PoolKind::Tile => &self.tile,
        }
    }

    pub fn primary(&self) -> &ResourcePool {
        &self.primary
    }

    pub fn tile(&self) -> &ResourcePool {
        &self.tile
    }

    pub fn trimmer(&self) -> &MemoryTrimmer {
        &self.trimmer
    }

    /// Acquire from the pool of `kind`
    ///
    /// If allocation fails on a miss, both pools are cleared once and the
    /// acquire is retried; a second failure is returned to the caller.
    pub fn acquire(
        &self,
        kind: PoolKind,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PixelBuffer> {
        if !self.is_pooling() {
            return PixelBuffer::new_direct(width, height, format);
        }

        let pool = self.pool(kind);
        match pool.acquire(width, height, format) {
            Err(PoolError::OutOfMemory { requested }) => {
                warn!(
                    pool = kind.name(),
                    requested, "allocation failed, clearing pools and retrying once"
                );
                self.clear();
                pool.acquire(width, height, format)
            }
            result => result,
        }
    }

    pub fn acquire_primary(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PixelBuffer> {
        self.acquire(PoolKind::Primary, width, height, format)
    }

    pub fn acquire_tile(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PixelBuffer> {
        self.acquire(PoolKind::Tile, width, height, format)
    }

    /// Acquire a lease that releases back through this manager on drop
    pub fn acquire_scoped(
        &self,
        kind: PoolKind,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PooledBuffer<'_>> {
        let buffer = self.acquire(kind, width, height, format)?;
        Ok(PooledBuffer::new(self, buffer))
    }

    /// Return a buffer to whichever pool allocated it
    ///
    /// `None`, invalid buffers, directly allocated buffers and buffers from
    /// another manager are dropped without touching any bucket.
    pub fn release(&self, buffer: impl Into<Option<PixelBuffer>>) {
        let Some(buffer) = buffer.into() else {
            trace!("ignored release of empty buffer");
            return;
        };
        match self.owner_of(&buffer) {
            Some(kind) => self.release_to(kind, buffer),
            None => trace!(key = %buffer.key(), "dropped unpooled buffer"),
        }
    }

    pub fn release_primary(&self, buffer: impl Into<Option<PixelBuffer>>) {
        if let Some(buffer) = buffer.into() {
            self.release_to(PoolKind::Primary, buffer);
        }
    }

    pub fn release_tile(&self, buffer: impl Into<Option<PixelBuffer>>) {
        if let Some(buffer) = buffer.into() {
            self.release_to(PoolKind::Tile, buffer);
        }
    }

    /// Eagerly create idle buffers for known-common sizes
    ///
    /// A failing entry is logged and skipped. Returns the number of buffers
    /// created.
    pub fn preallocate(&self, sizes: &[PreallocSize]) -> usize {
        if !self.is_pooling() {
            return 0;
        }

        let mut total = 0;
        for size in sizes {
            match self.pool(size.kind).preallocate(size.key(), size.count) {
                Ok(added) => total += added,
                Err(e) => warn!(
                    key = %size.key(),
                    pool = size.kind.name(),
                    error = %e,
                    "preallocation failed"
                ),
            }
        }
        info!(total, "preallocation complete");
        total
    }

    /// Run one auto-tuning step on both pools and apply the decisions
    pub fn auto_tune(&self) -> Vec<(PoolKind, TuningDecision)> {
        let mut states = self.tuning.lock();
        [PoolKind::Primary, PoolKind::Tile]
            .into_iter()
            .zip(states.iter_mut())
            .map(|(kind, state)| {
                let pool = self.pool(kind);
                let snapshot = pool.metrics();
                let window = snapshot.delta_since(&state.last);
                let input = TuningInput {
                    max_per_key: pool.max_per_key(),
                    ceiling: self.config.max_per_key_ceiling,
                    max_bytes: pool.max_bytes(),
                    previous_hit_rate: state.previous_hit_rate,
                    keys: pool.key_stats(),
                };

                let decision = tune(&window, &input, &self.config.tuning);
                pool.set_max_per_key(decision.max_per_key);
                for &(key, capacity) in &decision.key_capacities {
                    pool.set_key_capacity(key, capacity);
                }
                debug!(
                    pool = kind.name(),
                    action = ?decision.action,
                    hit_rate = decision.hit_rate,
                    reason = decision.reason,
                    "auto-tune"
                );

                state.last = snapshot;
                if window.requests() >= self.config.tuning.min_samples {
                    state.previous_hit_rate = Some(window.hit_rate());
                }
                (kind, decision)
            })
            .collect()
    }

    /// Run [`PoolManager::auto_tune`] every `interval` on a background thread
    ///
    /// The thread stops when the handle is stopped or dropped, or once the
    /// manager itself is gone.
    pub fn spawn_tuner(self: &Arc<Self>, interval: Duration) -> TunerHandle {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let manager: Weak<PoolManager> = Arc::downgrade(self);
        let thread = thread::Builder::new()
            .name("pixpool-tuner".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match manager.upgrade() {
                        Some(manager) => {
                            manager.auto_tune();
                        }
                        None => break,
                    },
                    _ => break,
                }
            });

        match thread {
            Ok(thread) => TunerHandle {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
            Err(e) => {
                warn!(error = %e, "failed to spawn tuner thread");
                TunerHandle {
                    stop: None,
                    thread: None,
                }
            }
        }
    }

    /// Apply the memory pressure policy to both pools
    pub fn on_memory_pressure(&self, level: PressureLevel) -> TrimReport {
        if !self.is_pooling() {
            return TrimReport {
                level,
                evicted: 0,
                applied: false,
            };
        }
        self.trimmer.apply(level, &[&self.primary, &self.tile])
    }

    /// Translate a platform notification and apply it
    pub fn on_platform_signal(&self, signal: PlatformSignal) -> TrimReport {
        debug!(?signal, "platform memory signal");
        self.on_memory_pressure(signal.pressure_level())
    }

    /// Evict least recently used buckets across both pools
    pub fn evict_lru(&self, target: usize) -> usize {
        self.trimmer.evict_lru(&[&self.primary, &self.tile], target)
    }

    /// Drop all idle buffers in both pools
    pub fn clear(&self) {
        self.primary.clear();
        self.tile.clear();
    }

    /// Point-in-time metrics of both pools plus totals
    pub fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics::new(self.primary.metrics(), self.tile.metrics())
    }

    pub fn uptime(&self) -> Duration {
        self.created.elapsed()
    }

    /// Log a summary of both pools at info level
    pub fn log_stats(&self) {
        if !self.is_pooling() {
            info!("buffer pooling is disabled");
            return;
        }
        let m = self.metrics();
        for (name, s) in [("primary", m.primary), ("tile", m.tile)] {
            info!(
                pool = name,
                hit_rate = %format!("{:.1}%", s.hit_rate() * 100.0),
                hits = s.hits,
                misses = s.misses,
                allocations = s.allocations,
                releases = s.releases,
                evictions = s.evictions,
                allocated_mb = s.allocated_bytes as f64 / consts::MIB as f64,
                evicted_mb = s.evicted_bytes as f64 / consts::MIB as f64,
                idle = s.current_pool_size,
                idle_mb = s.estimated_bytes as f64 / consts::MIB as f64,
                "pool stats"
            );
        }
        info!(
            uptime_s = self.uptime().as_secs(),
            trims = self.trimmer.trim_count(),
            "pool manager stats"
        );
    }

    /// Release everything and switch to direct allocation
    ///
    /// Later calls keep working; they simply bypass the pools.
    pub fn shutdown(&self) {
        if self.pooling.swap(false, Ordering::AcqRel) {
            self.clear();
            info!("pool manager shut down");
        }
    }

    fn owner_of(&self, buffer: &PixelBuffer) -> Option<PoolKind> {
        match buffer.origin() {
            BufferOrigin::Pool(id) if id == self.primary.id() => Some(PoolKind::Primary),
            BufferOrigin::Pool(id) if id == self.tile.id() => Some(PoolKind::Tile),
            _ => None,
        }
    }

    fn release_to(&self, kind: PoolKind, buffer: PixelBuffer) {
        if !self.is_pooling() {
            return;
        }
        match self.owner_of(&buffer) {
            Some(owner) if owner == kind => self.pool(kind).release(buffer),
            Some(owner) => {
                debug!(
                    key = %buffer.key(),
                    from = kind.name(),
                    to = owner.name(),
                    "cross-pool release redirected"
                );
                self.pool(owner).release(buffer);
            }
            None => trace!(key = %buffer.key(), "rejected release of foreign buffer"),
        }
    }
}

impl BufferSink for PoolManager {
    fn release(&self, buffer: PixelBuffer) {
        PoolManager::release(self, buffer);
    }
}

/// Handle to the background auto-tuning thread
pub struct TunerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TunerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the tuner and wait for its thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TunerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
