//! Storage allocation behind pool misses

use pixpool_core::{try_alloc_zeroed, PoolKey, PoolResult};

/// Source of fresh buffer storage on a pool miss
///
/// The returned vector must be zeroed and exactly `key.byte_size()` long.
/// Implementations report exhaustion as `PoolError::OutOfMemory`; the pool
/// never retries on its own.
pub trait BufferAllocator: Send + Sync {
    fn allocate(&self, key: PoolKey) -> PoolResult<Vec<u8>>;
}

/// Allocates from the global allocator without aborting on failure
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl BufferAllocator for SystemAllocator {
    fn allocate(&self, key: PoolKey) -> PoolResult<Vec<u8>> {
        try_alloc_zeroed(key.byte_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixpool_core::PixelFormat;

    #[test]
    fn test_system_allocator_exact_size() {
        let key = PoolKey::new(16, 9, PixelFormat::Argb8888);
        let data = SystemAllocator.allocate(key).unwrap();
        assert_eq!(data.len(), key.byte_size());
        assert!(data.iter().all(|&b| b == 0));
    }
}
