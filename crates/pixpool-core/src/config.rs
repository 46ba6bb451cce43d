//! Pool configuration
//!
//! The values are read once at startup by whoever embeds the pool; loading
//! them from a file is left to the caller (enable the `serde` feature to
//! deserialize a [`PoolConfig`] directly).

use crate::{consts, PixelFormat, PoolError, PoolKey, PoolResult};

/// Which of the managed pools a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolKind {
    /// Whole-image buffers
    #[default]
    Primary,
    /// Tile-sized buffers used by large-image processing
    Tile,
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Primary => "primary",
            PoolKind::Tile => "tile",
        }
    }
}

/// A size to warm up at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PreallocSize {
    pub width: u32,
    pub height: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub format: PixelFormat,
    pub count: usize,
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: PoolKind,
}

impl PreallocSize {
    pub fn new(width: u32, height: u32, format: PixelFormat, count: usize) -> Self {
        Self {
            width,
            height,
            format,
            count,
            kind: PoolKind::Primary,
        }
    }

    pub fn tile(mut self) -> Self {
        self.kind = PoolKind::Tile;
        self
    }

    pub fn key(&self) -> PoolKey {
        PoolKey::new(self.width, self.height, self.format)
    }
}

/// Tiling parameters for large-image processing
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TilingConfig {
    /// Preferred tile edge before memory-driven shrinking
    pub base_tile: u32,
    /// Overlap between neighbouring tiles, in pixels
    pub overlap: u32,
    /// Memory-safety ceiling for one processing operation
    pub memory_ceiling_bytes: usize,
    /// Tiles expected in flight at once; 0 means the rayon pool size
    pub concurrency: usize,
    /// Largest single-buffer edge the platform handles
    pub max_extent: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            base_tile: consts::DEFAULT_BASE_TILE,
            overlap: consts::DEFAULT_TILE_OVERLAP,
            memory_ceiling_bytes: consts::DEFAULT_MEMORY_CEILING,
            concurrency: 0,
            max_extent: consts::DEFAULT_MAX_EXTENT,
        }
    }
}

impl TilingConfig {
    pub fn base_tile(mut self, base_tile: u32) -> Self {
        self.base_tile = base_tile;
        self
    }

    pub fn overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling_bytes = bytes;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn max_extent(mut self, max_extent: u32) -> Self {
        self.max_extent = max_extent;
        self
    }
}

/// Auto-tuning feedback loop parameters
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct TuningConfig {
    pub target_hit_rate: f64,
    /// Requests required before the hit rate is trusted
    pub min_samples: u64,
    /// Capacity added per tuning step
    pub growth_step: usize,
    /// Fraction of `max_pool_bytes` above which capacity is reduced
    pub memory_budget_fraction: f64,
    /// How many of the most-requested keys are reported per decision
    pub hot_keys: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            target_hit_rate: consts::DEFAULT_TARGET_HIT_RATE,
            min_samples: consts::DEFAULT_TUNING_MIN_SAMPLES,
            growth_step: 1,
            memory_budget_fraction: 0.9,
            hot_keys: 4,
        }
    }
}

/// Top-level pool configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PoolConfig {
    /// When false every acquire allocates directly
    pub enabled: bool,
    /// Byte budget for idle buffers across both pools
    pub max_pool_bytes: usize,
    /// Idle buffers kept per exact key
    pub max_per_key: usize,
    /// Upper bound auto-tuning may raise `max_per_key` to
    pub max_per_key_ceiling: usize,
    /// Fraction of `max_pool_bytes` reserved for the tile pool
    pub tile_pool_share: f32,
    /// Sizes warmed up at startup
    pub preallocate: Vec<PreallocSize>,
    /// Whether memory pressure signals shrink the pools
    pub trim_on_pressure: bool,
    pub tiling: TilingConfig,
    pub tuning: TuningConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_pool_bytes: consts::DEFAULT_MAX_POOL_BYTES,
            max_per_key: consts::DEFAULT_MAX_PER_KEY,
            max_per_key_ceiling: consts::DEFAULT_MAX_PER_KEY_CEILING,
            tile_pool_share: consts::DEFAULT_TILE_POOL_SHARE,
            preallocate: Vec::new(),
            trim_on_pressure: true,
            tiling: TilingConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with pooling turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn max_pool_bytes(mut self, bytes: usize) -> Self {
        self.max_pool_bytes = bytes;
        self
    }

    pub fn max_per_key(mut self, max_per_key: usize) -> Self {
        self.max_per_key = max_per_key;
        self.max_per_key_ceiling = self.max_per_key_ceiling.max(max_per_key);
        self
    }

    pub fn max_per_key_ceiling(mut self, ceiling: usize) -> Self {
        self.max_per_key_ceiling = ceiling;
        self
    }

    pub fn tile_pool_share(mut self, share: f32) -> Self {
        self.tile_pool_share = share;
        self
    }

    pub fn preallocate(mut self, size: PreallocSize) -> Self {
        self.preallocate.push(size);
        self
    }

    pub fn trim_on_pressure(mut self, trim: bool) -> Self {
        self.trim_on_pressure = trim;
        self
    }

    pub fn tiling(mut self, tiling: TilingConfig) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn tuning(mut self, tuning: TuningConfig) -> Self {
        self.tuning = tuning;
        self
    }

    /// Byte budget of one pool kind
    pub fn pool_bytes(&self, kind: PoolKind) -> usize {
        let tile = (self.max_pool_bytes as f64 * self.tile_pool_share as f64) as usize;
        match kind {
            PoolKind::Primary => self.max_pool_bytes - tile.min(self.max_pool_bytes),
            PoolKind::Tile => tile.min(self.max_pool_bytes),
        }
    }

    /// Reject configurations the pool cannot honour
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_per_key == 0 {
            return Err(PoolError::ConfigurationError(
                "max_per_key must be at least 1".to_string(),
            ));
        }
        if self.max_per_key_ceiling < self.max_per_key {
            return Err(PoolError::ConfigurationError(format!(
                "max_per_key_ceiling {} is below max_per_key {}",
                self.max_per_key_ceiling, self.max_per_key
            )));
        }
        if !(0.0..=1.0).contains(&self.tile_pool_share) {
            return Err(PoolError::ConfigurationError(format!(
                "tile_pool_share {} outside 0..=1",
                self.tile_pool_share
            )));
        }
        if self.tiling.base_tile == 0 || self.tiling.max_extent == 0 {
            return Err(PoolError::ConfigurationError(
                "tile sizes must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tuning.target_hit_rate) {
            return Err(PoolError::ConfigurationError(format!(
                "target_hit_rate {} outside 0..=1",
                self.tuning.target_hit_rate
            )));
        }
        Ok(())
    }
}
