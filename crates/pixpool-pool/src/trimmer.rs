//! Memory pressure policy
//!
//! | Level    | Action                      |
//! |----------|-----------------------------|
//! | Light    | shrink 25% of every bucket  |
//! | Moderate | shrink 50% of every bucket  |
//! | Critical | shrink 75%, oldest first    |
//! | Complete | clear every pool            |
//!
//! Pressure may be delivered on any thread while acquires and releases are in
//! flight. Every action goes through the pools' own lock-free bucket
//! operations, so the trimmer holds no lock of its own.

use crate::pool::ResourcePool;
use pixpool_core::{consts, PoolKey};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Severity of a memory pressure event, ordered by aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PressureLevel {
    Light,
    Moderate,
    Critical,
    Complete,
}

impl PressureLevel {
    /// Fraction of idle buffers evicted at this level
    pub fn trim_fraction(&self) -> f32 {
        match self {
            PressureLevel::Light => consts::TRIM_LIGHT,
            PressureLevel::Moderate => consts::TRIM_MODERATE,
            PressureLevel::Critical => consts::TRIM_CRITICAL,
            PressureLevel::Complete => 1.0,
        }
    }
}

/// Raw notifications a host platform may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    /// The process lost foreground visibility
    Backgrounded,
    /// UI is no longer shown
    UiHidden,
    /// Running in the foreground, memory getting tight
    RunningModerate,
    RunningLow,
    RunningCritical,
    /// Cached in the background list
    Background,
    Moderate,
    /// About to be killed if memory is not freed
    Complete,
    /// Legacy low-memory callback
    LowMemory,
}

impl PlatformSignal {
    pub fn pressure_level(&self) -> PressureLevel {
        match self {
            // Visibility loss is an early indicator whatever memory looks like
            PlatformSignal::Backgrounded | PlatformSignal::UiHidden => PressureLevel::Light,
            PlatformSignal::RunningModerate | PlatformSignal::RunningLow => PressureLevel::Light,
            PlatformSignal::Background | PlatformSignal::Moderate => PressureLevel::Moderate,
            PlatformSignal::RunningCritical => PressureLevel::Critical,
            PlatformSignal::Complete | PlatformSignal::LowMemory => PressureLevel::Complete,
        }
    }
}

/// What a trim did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimReport {
    pub level: PressureLevel,
    /// Idle buffers dropped across all pools
    pub evicted: usize,
    /// False when trimming on pressure is disabled
    pub applied: bool,
}

/// Translates pressure levels into pool shrink/clear actions
#[derive(Debug)]
pub struct MemoryTrimmer {
    enabled: bool,
    trim_count: AtomicU64,
    lru_evictions: AtomicU64,
}

impl MemoryTrimmer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            trim_count: AtomicU64::new(0),
            lru_evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Apply the policy for `level` to every pool
    pub fn apply(&self, level: PressureLevel, pools: &[&ResourcePool]) -> TrimReport {
        if !self.enabled {
            debug!(?level, "memory pressure ignored, trimming disabled");
            return TrimReport {
                level,
                evicted: 0,
                applied: false,
            };
        }

        self.trim_count.fetch_add(1, Ordering::Relaxed);
        let evicted = match level {
            PressureLevel::Complete => {
                warn!("complete memory pressure, clearing pools");
                pools
                    .iter()
                    .map(|pool| {
                        let idle = pool.metrics().current_pool_size as usize;
                        pool.clear();
                        idle
                    })
                    .sum()
            }
            _ => {
                let fraction = level.trim_fraction();
                pools.iter().map(|pool| pool.shrink(fraction)).sum()
            }
        };

        info!(?level, evicted, "memory pressure handled");
        TrimReport {
            level,
            evicted,
            applied: true,
        }
    }

    /// Evict whole buckets, least recently requested first, until at least
    /// `target` idle buffers are gone. Returns the number evicted.
    ///
    /// Access ticks are per pool, so ordering across pools is approximate.
    pub fn evict_lru(&self, pools: &[&ResourcePool], target: usize) -> usize {
        if target == 0 {
            return 0;
        }

        let mut candidates: Vec<(usize, PoolKey, u64)> = pools
            .iter()
            .enumerate()
            .flat_map(|(i, pool)| {
                pool.key_stats()
                    .into_iter()
                    .filter(|s| s.idle > 0)
                    .map(move |s| (i, s.key, s.last_access))
            })
            .collect();
        candidates.sort_by_key(|&(_, _, last_access)| last_access);

        let mut evicted = 0;
        for (i, key, _) in candidates {
            if evicted >= target {
                break;
            }
            evicted += pools[i].evict_key(&key);
        }

        self.lru_evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(target, evicted, "LRU eviction");
        evicted
    }

    /// Pressure events acted upon
    pub fn trim_count(&self) -> u64 {
        self.trim_count.load(Ordering::Relaxed)
    }

    pub fn lru_evictions(&self) -> u64 {
        self.lru_evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixpool_core::{PixelFormat, PoolKind};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn filled_pool(keys: &[u32], per_key: usize) -> ResourcePool {
        let pool = ResourcePool::new(PoolKind::Primary, per_key, 256 * consts::MIB);
        for &w in keys {
            let buffers: Vec<_> = (0..per_key)
                .map(|_| pool.acquire(w, w, PixelFormat::Argb8888).unwrap())
                .collect();
            for buf in buffers {
                pool.release(buf);
            }
        }
        pool
    }

    #[test]
    fn test_level_ordering() {
        assert!(PressureLevel::Light < PressureLevel::Moderate);
        assert!(PressureLevel::Critical < PressureLevel::Complete);
    }

    #[test]
    fn test_background_maps_to_light() {
        assert_eq!(
            PlatformSignal::Backgrounded.pressure_level(),
            PressureLevel::Light
        );
        assert_eq!(
            PlatformSignal::LowMemory.pressure_level(),
            PressureLevel::Complete
        );
    }

    #[test]
    fn test_levels_shrink_proportionally() {
        let trimmer = MemoryTrimmer::new(true);
        let pool = filled_pool(&[8], 8);
        let report = trimmer.apply(PressureLevel::Light, &[&pool]);
        assert_eq!(report.evicted, 2);
        let report = trimmer.apply(PressureLevel::Moderate, &[&pool]);
        assert_eq!(report.evicted, 3);
        let report = trimmer.apply(PressureLevel::Critical, &[&pool]);
        assert_eq!(report.evicted, 2);
        assert_eq!(pool.metrics().current_pool_size, 1);
        assert_eq!(trimmer.trim_count(), 3);
    }

    #[test]
    fn test_complete_clears() {
        let trimmer = MemoryTrimmer::new(true);
        let pool = filled_pool(&[8, 16], 3);
        let report = trimmer.apply(PressureLevel::Complete, &[&pool]);
        assert_eq!(report.evicted, 6);
        assert_eq!(pool.metrics().current_pool_size, 0);
    }

    #[test]
    fn test_disabled_trimmer_does_nothing() {
        let trimmer = MemoryTrimmer::new(false);
        let pool = filled_pool(&[8], 3);
        let report = trimmer.apply(PressureLevel::Complete, &[&pool]);
        assert!(!report.applied);
        assert_eq!(pool.metrics().current_pool_size, 3);
    }

    #[test]
    fn test_pressure_during_traffic_keeps_gauges_consistent() {
        const WORKERS: usize = 6;
        const ROUNDS: usize = 300;
        const WIDTHS: [u32; 3] = [8, 16, 24];

        let pool = Arc::new(ResourcePool::new(PoolKind::Primary, 3, 256 * consts::MIB));
        let trimmer = Arc::new(MemoryTrimmer::new(true));
        let done = Arc::new(AtomicBool::new(false));

        let pressure = {
            let pool = Arc::clone(&pool);
            let trimmer = Arc::clone(&trimmer);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let levels = [
                    PressureLevel::Light,
                    PressureLevel::Moderate,
                    PressureLevel::Critical,
                    PressureLevel::Complete,
                ];
                let mut i = 0;
                loop {
                    trimmer.apply(levels[i % levels.len()], &[&*pool]);
                    i += 1;
                    if done.load(Ordering::Acquire) {
                        break i;
                    }
                    thread::yield_now();
                }
            })
        };

        let workers: Vec<_> = (0..WORKERS)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for round in 0..ROUNDS {
                        let w = WIDTHS[(t + round) % WIDTHS.len()];
                        let a = pool.acquire(w, w, PixelFormat::Argb8888).unwrap();
                        let b = pool.acquire(w, 4, PixelFormat::Alpha8).unwrap();
                        pool.release(a);
                        pool.release(b);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(pressure.join().unwrap() > 0);

        let stats = pool.key_stats();
        let idle: usize = stats.iter().map(|s| s.idle).sum();
        let bytes: usize = stats.iter().map(|s| s.idle * s.key.byte_size()).sum();
        for s in &stats {
            assert!(s.idle <= s.capacity, "{} holds {} idle", s.key, s.idle);
        }
        let m = pool.metrics();
        assert_eq!(m.current_pool_size as usize, idle);
        assert_eq!(m.estimated_bytes as usize, bytes);
    }

    #[test]
    fn test_evict_lru_oldest_key_first() {
        let trimmer = MemoryTrimmer::new(true);
        let pool = filled_pool(&[8, 16, 32], 2);
        // Touch 8x8 again so it becomes most recent
        let buf = pool.acquire(8, 8, PixelFormat::Argb8888).unwrap();
        pool.release(buf);

        let evicted = trimmer.evict_lru(&[&pool], 2);
        assert_eq!(evicted, 2);
        assert_eq!(pool.idle_count(&PoolKey::new(16, 16, PixelFormat::Argb8888)), 0);
        assert_eq!(pool.idle_count(&PoolKey::new(8, 8, PixelFormat::Argb8888)), 2);
        assert_eq!(pool.idle_count(&PoolKey::new(32, 32, PixelFormat::Argb8888)), 2);
    }
}
