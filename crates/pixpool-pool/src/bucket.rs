//! Exact-key idle queues
//!
//! A [`BucketStore`] maps each [`PoolKey`] to a [`Bucket`]: a lock-free FIFO
//! of idle buffers plus an idle counter used to reserve capacity. Buckets are
//! created when a buffer of their key is first stored. [`BucketStore::prune`]
//! drops empty buckets under the write lock, skipping any bucket another
//! thread still holds, so nobody can push into a detached queue.

use crossbeam::queue::SegQueue;
use parking_lot::RwLock;
use pixpool_core::{PixelBuffer, PoolKey};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Idle buffers for one exact key, oldest first
pub struct Bucket {
    key: PoolKey,
    queue: SegQueue<PixelBuffer>,
    // Reserved slots; always >= queue length, never above capacity
    idle: AtomicUsize,
    // Per-key capacity set by auto-tuning; 0 means the pool default
    capacity: AtomicUsize,
    requests: AtomicU64,
    last_access: AtomicU64,
}

impl Bucket {
    fn new(key: PoolKey) -> Self {
        Self {
            key,
            queue: SegQueue::new(),
            idle: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            last_access: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    /// Idle buffers currently held (including slots being filled)
    pub fn idle_count(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    /// Capacity of this bucket given the pool-wide default
    pub fn capacity(&self, default: usize) -> usize {
        match self.capacity.load(Ordering::Relaxed) {
            0 => default,
            n => n,
        }
    }

    /// Pin this bucket's capacity; 0 falls back to the pool default
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Reserve one slot if fewer than `capacity` are taken
    pub fn try_reserve(&self, capacity: usize) -> bool {
        self.idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Give back a slot reserved with [`Bucket::try_reserve`] but not filled
    pub fn cancel_reservation(&self) {
        self.idle.fetch_sub(1, Ordering::AcqRel);
    }

    /// Fill a reserved slot
    pub fn push_reserved(&self, buffer: PixelBuffer) {
        debug_assert_eq!(buffer.key(), self.key);
        self.queue.push(buffer);
    }

    /// Pop the longest-idle buffer
    pub fn pop(&self) -> Option<PixelBuffer> {
        let buffer = self.queue.pop()?;
        self.idle.fetch_sub(1, Ordering::AcqRel);
        Some(buffer)
    }

    /// Record a request for this key at logical time `tick`
    pub fn touch(&self, tick: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.mark_access(tick);
    }

    /// Move the last access time forward without counting a request
    pub fn mark_access(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_requests(&self) {
        self.requests.store(0, Ordering::Relaxed);
    }
}

/// Map from key to bucket
#[derive(Default)]
pub struct BucketStore {
    buckets: RwLock<FxHashMap<PoolKey, Arc<Bucket>>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PoolKey) -> Option<Arc<Bucket>> {
        self.buckets.read().get(key).cloned()
    }

    pub fn get_or_create(&self, key: PoolKey) -> Arc<Bucket> {
        if let Some(bucket) = self.get(&key) {
            return bucket;
        }
        self.buckets
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Bucket::new(key)))
            .clone()
    }

    /// Remove buckets with no idle buffers that nobody else holds
    ///
    /// Lookups clone the `Arc` under the read lock, so a bucket referenced
    /// only by the map cannot be picked up while the write lock is held.
    /// Returns the number of buckets removed.
    pub fn prune(&self) -> usize {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.idle_count() > 0 || Arc::strong_count(bucket) > 1);
        before - buckets.len()
    }

    /// Snapshot of all buckets; iteration happens outside the lock
    pub fn buckets(&self) -> Vec<Arc<Bucket>> {
        self.buckets.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixpool_core::{BufferOrigin, PixelFormat};

    fn buffer(key: PoolKey) -> PixelBuffer {
        PixelBuffer::from_vec(key, vec![0; key.byte_size()], BufferOrigin::Direct).unwrap()
    }

    #[test]
    fn test_reserve_respects_capacity() {
        let bucket = Bucket::new(PoolKey::new(4, 4, PixelFormat::Alpha8));
        assert!(bucket.try_reserve(2));
        assert!(bucket.try_reserve(2));
        assert!(!bucket.try_reserve(2));
        bucket.cancel_reservation();
        assert_eq!(bucket.idle_count(), 1);
    }

    #[test]
    fn test_fifo_order() {
        let key = PoolKey::new(2, 2, PixelFormat::Alpha8);
        let bucket = Bucket::new(key);
        let first = buffer(key);
        let first_id = first.storage_id();
        for b in [first, buffer(key)] {
            assert!(bucket.try_reserve(8));
            bucket.push_reserved(b);
        }
        assert_eq!(bucket.pop().unwrap().storage_id(), first_id);
        assert_eq!(bucket.idle_count(), 1);
    }

    #[test]
    fn test_store_reuses_bucket() {
        let store = BucketStore::new();
        let key = PoolKey::new(8, 8, PixelFormat::Argb8888);
        let a = store.get_or_create(key);
        let b = store.get_or_create(key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert!(store.get(&PoolKey::new(8, 9, PixelFormat::Argb8888)).is_none());
    }

    #[test]
    fn test_prune_keeps_busy_buckets() {
        let store = BucketStore::new();
        let idle_key = PoolKey::new(2, 2, PixelFormat::Alpha8);
        let held_key = PoolKey::new(3, 3, PixelFormat::Alpha8);
        let empty_key = PoolKey::new(4, 4, PixelFormat::Alpha8);

        let idle = store.get_or_create(idle_key);
        assert!(idle.try_reserve(4));
        idle.push_reserved(buffer(idle_key));
        drop(idle);
        let held = store.get_or_create(held_key);
        store.get_or_create(empty_key);

        assert_eq!(store.prune(), 1);
        assert!(store.get(&empty_key).is_none());
        assert!(store.get(&idle_key).is_some());
        assert!(store.get(&held_key).is_some());

        drop(held);
        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 1);
    }
}
