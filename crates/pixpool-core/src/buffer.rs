//! Owned pixel buffers handed out by pools

use crate::{Dimensions, PixelFormat, PoolError, PoolKey, PoolResult};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a pool instance, stamped on every buffer it allocates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    /// Allocate a process-unique pool id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PoolId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Where a buffer's storage came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOrigin {
    /// Allocated by the pool with this id; may be returned to it
    Pool(PoolId),
    /// Allocated outside of any pool (pooling disabled or shut down)
    Direct,
}

/// A mutable pixel surface of exactly `width * height * bytes_per_pixel` bytes
///
/// Ownership is exclusive: a pool hands the buffer out by value on acquire and
/// takes it back by value on release. Once [`PixelBuffer::invalidate`] has been
/// called the buffer can never re-enter a pool.
#[derive(Debug)]
pub struct PixelBuffer {
    key: PoolKey,
    data: Vec<u8>,
    origin: BufferOrigin,
    invalid: bool,
}

impl PixelBuffer {
    /// Wrap already-allocated storage
    ///
    /// Fails if the storage length does not match the key.
    pub fn from_vec(key: PoolKey, data: Vec<u8>, origin: BufferOrigin) -> PoolResult<Self> {
        if key.width == 0 || key.height == 0 {
            return Err(PoolError::InvalidDimensions {
                width: key.width,
                height: key.height,
            });
        }
        if data.len() != key.byte_size() {
            return Err(PoolError::BufferTooSmall {
                expected: key.byte_size(),
                actual: data.len(),
            });
        }

        Ok(Self {
            key,
            data,
            origin,
            invalid: false,
        })
    }

    /// Allocate a zeroed, unpooled buffer
    pub fn new_direct(width: u32, height: u32, format: PixelFormat) -> PoolResult<Self> {
        let key = PoolKey::new(width, height, format);
        let data = try_alloc_zeroed(key.byte_size())?;
        Self::from_vec(key, data, BufferOrigin::Direct)
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn width(&self) -> u32 {
        self.key.width
    }

    pub fn height(&self) -> u32 {
        self.key.height
    }

    pub fn format(&self) -> PixelFormat {
        self.key.format
    }

    pub fn dimensions(&self) -> Dimensions {
        self.key.dimensions()
    }

    pub fn origin(&self) -> BufferOrigin {
        self.origin
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn stride(&self) -> usize {
        self.key.stride()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes of row `y`
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &mut self.data[start..start + stride]
    }

    /// Bytes of the pixel at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.key.format.bytes_per_pixel();
        let start = y as usize * self.stride() + x as usize * bpp;
        &self.data[start..start + bpp]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let bpp = self.key.format.bytes_per_pixel();
        let start = y as usize * self.stride() + x as usize * bpp;
        &mut self.data[start..start + bpp]
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Permanently exclude this buffer from reuse and drop its storage
    pub fn invalidate(&mut self) {
        self.invalid = true;
        self.data = Vec::new();
    }

    /// A buffer is reusable only while it is not invalidated and its storage
    /// still matches its key exactly.
    pub fn is_valid(&self) -> bool {
        !self.invalid && self.data.len() == self.key.byte_size()
    }

    /// Identity of the underlying storage, stable across pool round trips
    pub fn storage_id(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Re-stamp the origin of a buffer; used when a pool adopts storage
    pub fn adopt(mut self, origin: BufferOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Fallibly allocate a zeroed byte vector
///
/// Uses `try_reserve_exact` so allocator failure surfaces as
/// [`PoolError::OutOfMemory`] instead of aborting the process.
pub fn try_alloc_zeroed(len: usize) -> PoolResult<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| PoolError::OutOfMemory { requested: len })?;
    data.resize(len, 0);
    Ok(data)
}
