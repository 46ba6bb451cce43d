//! Pool statistics
//!
//! Counters are updated with relaxed atomics from any thread; a snapshot is an
//! eventually-consistent point-in-time copy, which is enough for observability
//! and for the auto-tuner.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    allocations: AtomicU64,
    releases: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    trims: AtomicU64,
    allocated_bytes: AtomicU64,
    evicted_bytes: AtomicU64,
    // Gauges tracking idle state
    current_pool_size: AtomicU64,
    estimated_bytes: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation(&self, bytes: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.allocated_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, bytes: usize) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_trim(&self) {
        self.trims.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve idle bytes against `budget`; fails without side effects
    pub(crate) fn try_reserve_bytes(&self, bytes: usize, budget: usize) -> bool {
        let bytes = bytes as u64;
        self.estimated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur + bytes <= budget as u64).then_some(cur + bytes)
            })
            .is_ok()
    }

    /// A buffer is about to become idle; its bytes were already reserved.
    /// Must run before the buffer is visible in a bucket.
    pub(crate) fn add_idle(&self) {
        self.current_pool_size.fetch_add(1, Ordering::Relaxed);
    }

    /// A buffer left the idle set
    pub(crate) fn remove_idle(&self, bytes: usize) {
        self.current_pool_size.fetch_sub(1, Ordering::Relaxed);
        self.estimated_bytes
            .fetch_sub(bytes as u64, Ordering::AcqRel);
    }

    /// Zero the monotone counters; gauges keep tracking live state
    pub(crate) fn reset_counters(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.trims.store(0, Ordering::Relaxed);
        self.allocated_bytes.store(0, Ordering::Relaxed);
        self.evicted_bytes.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            current_pool_size: self.current_pool_size.load(Ordering::Relaxed),
            estimated_bytes: self.estimated_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetricsSnapshot {
    pub allocations: u64,
    pub releases: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub trims: u64,
    /// Bytes of every buffer this pool allocated
    pub allocated_bytes: u64,
    /// Bytes of every buffer dropped instead of kept idle
    pub evicted_bytes: u64,
    /// Idle buffers across all buckets
    pub current_pool_size: u64,
    /// Bytes held by idle buffers
    pub estimated_bytes: u64,
}

impl PoolMetricsSnapshot {
    pub fn requests(&self) -> u64 {
        self.hits + self.misses
    }

    /// `hits / (hits + misses)`, 0.0 before the first request
    pub fn hit_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Counter deltas since `earlier`; gauges are taken from `self`
    ///
    /// Saturates at zero so a clear in between yields a fresh window.
    pub fn delta_since(&self, earlier: &PoolMetricsSnapshot) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            releases: self.releases.saturating_sub(earlier.releases),
            hits: self.hits.saturating_sub(earlier.hits),
            misses: self.misses.saturating_sub(earlier.misses),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            trims: self.trims.saturating_sub(earlier.trims),
            allocated_bytes: self.allocated_bytes.saturating_sub(earlier.allocated_bytes),
            evicted_bytes: self.evicted_bytes.saturating_sub(earlier.evicted_bytes),
            current_pool_size: self.current_pool_size,
            estimated_bytes: self.estimated_bytes,
        }
    }

    /// Field-wise sum, used for manager totals
    pub fn combine(&self, other: &PoolMetricsSnapshot) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            allocations: self.allocations + other.allocations,
            releases: self.releases + other.releases,
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            evictions: self.evictions + other.evictions,
            trims: self.trims + other.trims,
            allocated_bytes: self.allocated_bytes + other.allocated_bytes,
            evicted_bytes: self.evicted_bytes + other.evicted_bytes,
            current_pool_size: self.current_pool_size + other.current_pool_size,
            estimated_bytes: self.estimated_bytes + other.estimated_bytes,
        }
    }
}

/// Aggregated snapshot of both managed pools
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerMetrics {
    pub primary: PoolMetricsSnapshot,
    pub tile: PoolMetricsSnapshot,
    pub total: PoolMetricsSnapshot,
}

impl ManagerMetrics {
    pub fn new(primary: PoolMetricsSnapshot, tile: PoolMetricsSnapshot) -> Self {
        Self {
            primary,
            tile,
            total: primary.combine(&tile),
        }
    }

    pub fn hits(&self) -> u64 {
        self.total.hits
    }

    pub fn misses(&self) -> u64 {
        self.total.misses
    }

    pub fn hit_rate(&self) -> f64 {
        self.total.hit_rate()
    }

    pub fn current_pool_size(&self) -> u64 {
        self.total.current_pool_size
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.total.estimated_bytes
    }

    pub fn allocations(&self) -> u64 {
        self.total.allocations
    }

    pub fn releases(&self) -> u64 {
        self.total.releases
    }

    pub fn evictions(&self) -> u64 {
        self.total.evictions
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.total.allocated_bytes
    }

    pub fn evicted_bytes(&self) -> u64 {
        self.total.evicted_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(PoolMetrics::new().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = PoolMetrics::new();
        for _ in 0..3 {
            metrics.record_hit();
        }
        metrics.record_miss();
        assert!((metrics.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_byte_budget() {
        let metrics = PoolMetrics::new();
        assert!(metrics.try_reserve_bytes(60, 100));
        assert!(!metrics.try_reserve_bytes(60, 100));
        metrics.add_idle();
        metrics.remove_idle(60);
        assert_eq!(metrics.snapshot().estimated_bytes, 0);
        assert_eq!(metrics.snapshot().current_pool_size, 0);
    }

    #[test]
    fn test_byte_totals_follow_counters() {
        let metrics = PoolMetrics::new();
        metrics.record_allocation(64);
        metrics.record_allocation(16);
        metrics.record_eviction(64);
        let before = metrics.snapshot();
        assert_eq!(before.allocated_bytes, 80);
        assert_eq!(before.evicted_bytes, 64);

        metrics.record_eviction(16);
        let delta = metrics.snapshot().delta_since(&before);
        assert_eq!(delta.evictions, 1);
        assert_eq!(delta.evicted_bytes, 16);
        assert_eq!(delta.allocated_bytes, 0);

        metrics.reset_counters();
        assert_eq!(metrics.snapshot().evicted_bytes, 0);
    }

    #[test]
    fn test_manager_totals() {
        let a = PoolMetricsSnapshot {
            hits: 2,
            misses: 2,
            ..Default::default()
        };
        let b = PoolMetricsSnapshot {
            hits: 4,
            ..Default::default()
        };
        let m = ManagerMetrics::new(a, b);
        assert_eq!(m.hits(), 6);
        assert!((m.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
