//! Size-bucketed pixel buffer pools
//!
//! This crate implements the pooling engine: exact-key buckets of idle
//! buffers, the [`ResourcePool`] acquire/release cycle with hit/miss/eviction
//! metrics, the two-pool [`PoolManager`] façade with preallocation and
//! auto-tuning, and the [`MemoryTrimmer`] memory pressure policy.

pub mod allocator;
pub mod bucket;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod trimmer;
pub mod tuning;

pub use allocator::*;
pub use bucket::{Bucket, BucketStore};
pub use manager::*;
pub use metrics::*;
pub use pool::*;
pub use trimmer::*;
pub use tuning::*;
