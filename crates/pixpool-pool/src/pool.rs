//! Resource pool: acquire/release over exact-key buckets

use crate::allocator::{BufferAllocator, SystemAllocator};
use crate::bucket::{Bucket, BucketStore};
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot};
use pixpool_core::{
    consts, BufferOrigin, PixelBuffer, PixelFormat, PoolError, PoolId, PoolKey, PoolKind,
    PoolResult,
};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Anything a checked-out buffer can be handed back to
pub trait BufferSink: Send + Sync {
    fn release(&self, buffer: PixelBuffer);
}

/// Per-key usage figures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStats {
    pub key: PoolKey,
    pub idle: usize,
    pub capacity: usize,
    pub requests: u64,
    pub last_access: u64,
}

/// Thread-safe pool of idle pixel buffers bucketed by exact key
///
/// `acquire` never blocks: it pops the head of the key's bucket or allocates
/// a fresh buffer. `release` never blocks either: the buffer is queued if the
/// bucket and the byte budget have room and dropped (evicted) otherwise.
pub struct ResourcePool {
    id: PoolId,
    kind: PoolKind,
    store: BucketStore,
    metrics: PoolMetrics,
    max_per_key: AtomicUsize,
    max_bytes: AtomicUsize,
    allocator: Arc<dyn BufferAllocator>,
    clock: AtomicU64,
}

impl ResourcePool {
    /// Create a pool using the system allocator
    pub fn new(kind: PoolKind, max_per_key: usize, max_bytes: usize) -> Self {
        Self::with_allocator(kind, max_per_key, max_bytes, Arc::new(SystemAllocator))
    }

    pub fn with_allocator(
        kind: PoolKind,
        max_per_key: usize,
        max_bytes: usize,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Self {
        let id = PoolId::next();
        debug!(
            pool = kind.name(),
            id = id.as_u64(),
            max_per_key,
            max_mb = max_bytes as f64 / consts::MIB as f64,
            "resource pool created"
        );
        Self {
            id,
            kind,
            store: BucketStore::new(),
            metrics: PoolMetrics::new(),
            max_per_key: AtomicUsize::new(max_per_key.max(1)),
            max_bytes: AtomicUsize::new(max_bytes),
            allocator,
            clock: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// True if `buffer` was allocated by this pool
    pub fn owns(&self, buffer: &PixelBuffer) -> bool {
        buffer.origin() == BufferOrigin::Pool(self.id)
    }

    /// Get a buffer of exactly `width x height` in `format`
    ///
    /// Reuses the longest-idle buffer of that key when one is available,
    /// otherwise allocates. Allocation failure is returned as
    /// `PoolError::OutOfMemory` without any retry.
    pub fn acquire(&self, width: u32, height: u32, format: PixelFormat) -> PoolResult<PixelBuffer> {
        if width == 0 || height == 0 {
            return Err(PoolError::InvalidDimensions { width, height });
        }

        let key = PoolKey::new(width, height, format);
        // A miss on an unknown key leaves the store alone; release creates the bucket
        if let Some(bucket) = self.store.get(&key) {
            bucket.touch(self.tick());
            if let Some(mut buffer) = bucket.pop() {
                self.metrics.remove_idle(key.byte_size());
                if buffer.is_valid() && buffer.key() == key {
                    self.metrics.record_hit();
                    buffer.fill(0);
                    trace!(pool = self.kind.name(), %key, "reused buffer");
                    return Ok(buffer);
                }
                // An unusable head is discarded and the acquire becomes a miss
                self.metrics.record_eviction(key.byte_size());
                trace!(pool = self.kind.name(), %key, "discarded invalid idle buffer");
            }
        }

        self.metrics.record_miss();
        let buffer = self.allocate(key)?;
        trace!(pool = self.kind.name(), %key, "allocated new buffer");
        Ok(buffer)
    }

    /// Acquire a buffer that returns itself to this pool when dropped
    pub fn acquire_scoped(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> PoolResult<PooledBuffer<'_>> {
        let buffer = self.acquire(width, height, format)?;
        Ok(PooledBuffer::new(self, buffer))
    }

    /// Return a buffer for reuse
    ///
    /// Invalid buffers are ignored. The bucket is chosen from the buffer's
    /// own key. A full bucket or an exhausted byte budget evicts the buffer.
    pub fn release(&self, buffer: PixelBuffer) {
        if !buffer.is_valid() {
            trace!(pool = self.kind.name(), "ignored release of invalid buffer");
            return;
        }

        let key = buffer.key();
        let bucket = self.store.get_or_create(key);
        bucket.mark_access(self.tick());
        if self.try_store(&bucket, buffer) {
            self.metrics.record_release();
            trace!(pool = self.kind.name(), %key, idle = bucket.idle_count(), "released buffer");
        } else {
            self.metrics.record_eviction(key.byte_size());
            trace!(pool = self.kind.name(), %key, "bucket full, evicted buffer");
        }
    }

    /// Eagerly create `count` idle buffers of `key`
    ///
    /// Bypasses hit/miss accounting. Stops early when the bucket is full.
    /// Returns how many buffers were added.
    pub fn preallocate(&self, key: PoolKey, count: usize) -> PoolResult<usize> {
        if key.width == 0 || key.height == 0 {
            return Err(PoolError::InvalidDimensions {
                width: key.width,
                height: key.height,
            });
        }

        let bucket = self.store.get_or_create(key);
        let mut added = 0;
        for _ in 0..count {
            if bucket.idle_count() >= bucket.capacity(self.max_per_key()) {
                break;
            }
            let buffer = self.allocate(key)?;
            if !self.try_store(&bucket, buffer) {
                break;
            }
            added += 1;
        }
        debug!(pool = self.kind.name(), %key, added, "preallocated buffers");
        Ok(added)
    }

    /// Drop every idle buffer, forget the emptied keys and reset the counters
    ///
    /// Checked-out buffers are unaffected and may still be released later.
    pub fn clear(&self) {
        let mut freed = 0usize;
        let mut bytes = 0usize;
        for bucket in self.store.buckets() {
            while let Some(buffer) = bucket.pop() {
                self.metrics.remove_idle(buffer.key().byte_size());
                bytes += buffer.key().byte_size();
                freed += 1;
            }
            bucket.reset_requests();
        }
        let pruned = self.store.prune();
        self.metrics.reset_counters();
        debug!(
            pool = self.kind.name(),
            freed,
            pruned,
            freed_mb = bytes as f64 / consts::MIB as f64,
            "pool cleared"
        );
    }

    /// Evict about `fraction` of the idle buffers in every bucket, oldest first
    ///
    /// The per-bucket count is `floor(idle * fraction)`. A fraction of 1.0 or
    /// more drains every bucket but keeps the counters. Buckets left empty are
    /// dropped along with their per-key capacity. Returns the number of
    /// evicted buffers.
    pub fn shrink(&self, fraction: f32) -> usize {
        if fraction <= 0.0 {
            return 0;
        }
        let fraction = fraction.min(1.0);

        let mut evicted = 0;
        for bucket in self.store.buckets() {
            let target = (bucket.idle_count() as f32 * fraction).floor() as usize;
            evicted += self.evict_from(&bucket, target);
        }
        let pruned = self.store.prune();
        self.metrics.record_trim();
        debug!(pool = self.kind.name(), fraction, evicted, pruned, "pool shrunk");
        evicted
    }

    /// Drain one bucket; returns the number of evicted buffers
    pub fn evict_key(&self, key: &PoolKey) -> usize {
        match self.store.get(key) {
            Some(bucket) => self.evict_from(&bucket, usize::MAX),
            None => 0,
        }
    }

    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.store.get(key).map_or(0, |b| b.idle_count())
    }

    /// Requests seen for `key` since the last clear
    pub fn request_count(&self, key: &PoolKey) -> u64 {
        self.store.get(key).map_or(0, |b| b.request_count())
    }

    /// Keys currently tracked by the store
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Idle count of every known key
    pub fn bucket_stats(&self) -> Vec<(PoolKey, usize)> {
        self.store
            .buckets()
            .iter()
            .map(|b| (b.key(), b.idle_count()))
            .collect()
    }

    /// Usage figures of every known key
    pub fn key_stats(&self) -> Vec<KeyStats> {
        self.store
            .buckets()
            .iter()
            .map(|b| KeyStats {
                key: b.key(),
                idle: b.idle_count(),
                capacity: b.capacity(self.max_per_key()),
                requests: b.request_count(),
                last_access: b.last_access(),
            })
            .collect()
    }

    pub fn max_per_key(&self) -> usize {
        self.max_per_key.load(Ordering::Relaxed)
    }

    /// Change the per-key capacity; existing surplus drains through eviction
    pub fn set_max_per_key(&self, max_per_key: usize) {
        self.max_per_key.store(max_per_key.max(1), Ordering::Relaxed);
    }

    /// Capacity currently applied to `key`
    pub fn key_capacity(&self, key: &PoolKey) -> usize {
        self.store
            .get(key)
            .map_or(self.max_per_key(), |b| b.capacity(self.max_per_key()))
    }

    /// Override the capacity of one key
    pub fn set_key_capacity(&self, key: PoolKey, capacity: usize) {
        self.store.get_or_create(key).set_capacity(capacity.max(1));
    }

    /// Drop every per-key override
    pub fn reset_key_capacities(&self) {
        for bucket in self.store.buckets() {
            bucket.set_capacity(0);
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes.load(Ordering::Relaxed)
    }

    pub fn set_max_bytes(&self, max_bytes: usize) {
        self.max_bytes.store(max_bytes, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn allocate(&self, key: PoolKey) -> PoolResult<PixelBuffer> {
        let data = self.allocator.allocate(key)?;
        self.metrics.record_allocation(key.byte_size());
        PixelBuffer::from_vec(key, data, BufferOrigin::Pool(self.id))
    }

    fn try_store(&self, bucket: &Bucket, buffer: PixelBuffer) -> bool {
        let bytes = buffer.key().byte_size();
        if !bucket.try_reserve(bucket.capacity(self.max_per_key())) {
            return false;
        }
        if !self.metrics.try_reserve_bytes(bytes, self.max_bytes()) {
            bucket.cancel_reservation();
            return false;
        }
        self.metrics.add_idle();
        bucket.push_reserved(buffer.adopt(BufferOrigin::Pool(self.id)));
        true
    }

    fn evict_from(&self, bucket: &Bucket, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some(buffer) = bucket.pop() else { break };
            let bytes = buffer.key().byte_size();
            self.metrics.remove_idle(bytes);
            self.metrics.record_eviction(bytes);
            evicted += 1;
        }
        evicted
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl BufferSink for ResourcePool {
    fn release(&self, buffer: PixelBuffer) {
        ResourcePool::release(self, buffer);
    }
}

/// RAII lease that hands its buffer back to the sink on drop
///
/// Keeps checked-out buffers from leaking when processing unwinds through an
/// error, a cancellation or a panic.
pub struct PooledBuffer<'a> {
    sink: &'a dyn BufferSink,
    buffer: Option<PixelBuffer>,
}

impl<'a> PooledBuffer<'a> {
    pub fn new(sink: &'a dyn BufferSink, buffer: PixelBuffer) -> Self {
        Self {
            sink,
            buffer: Some(buffer),
        }
    }

    /// Detach the buffer; it will no longer be returned automatically
    pub fn into_inner(mut self) -> PixelBuffer {
        match self.buffer.take() {
            Some(buffer) => buffer,
            None => unreachable!("lease buffer taken twice"),
        }
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = PixelBuffer;

    fn deref(&self) -> &Self::Target {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("lease used after detach"),
        }
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("lease used after detach"),
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.sink.release(buffer);
        }
    }
}
