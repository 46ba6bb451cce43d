//! Constants used throughout the pooling and tiling implementation

/// One mebibyte
pub const MIB: usize = 1024 * 1024;

/// Default byte budget for idle buffers across all pools
pub const DEFAULT_MAX_POOL_BYTES: usize = 64 * MIB;

/// Default number of idle buffers kept per exact key
pub const DEFAULT_MAX_PER_KEY: usize = 3;

/// Hard ceiling for per-key capacity when auto-tuning grows buckets
pub const DEFAULT_MAX_PER_KEY_CEILING: usize = 16;

/// Share of the byte budget given to the tile pool
pub const DEFAULT_TILE_POOL_SHARE: f32 = 0.25;

/// Maximum number of tiles for a single large-image operation
pub const MAX_TILES: usize = 64;

/// Smallest tile edge; below this tiling overhead dominates
pub const MIN_TILE_SIZE: u32 = 64;

/// Default tile edge before memory-driven shrinking
pub const DEFAULT_BASE_TILE: u32 = 512;

/// Default overlap between neighbouring tiles, in pixels
pub const DEFAULT_TILE_OVERLAP: u32 = 32;

/// Fallback maximum single-buffer extent when the platform reports nothing
pub const DEFAULT_MAX_EXTENT: u32 = 2048;

/// Default memory-safety ceiling for a single processing operation
pub const DEFAULT_MEMORY_CEILING: usize = 256 * MIB;

/// Per-tile memory multiplier: input tile, output tile, working copy
pub const TILE_MEMORY_FACTOR: usize = 3;

/// Hit rate the auto-tuner aims for
pub const DEFAULT_TARGET_HIT_RATE: f64 = 0.80;

/// Requests needed before the auto-tuner trusts the hit rate
pub const DEFAULT_TUNING_MIN_SAMPLES: u64 = 10;

/// Shrink fractions for the memory pressure tiers
pub const TRIM_LIGHT: f32 = 0.25;
pub const TRIM_MODERATE: f32 = 0.50;
pub const TRIM_CRITICAL: f32 = 0.75;
