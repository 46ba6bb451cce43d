//! Error types for pool and tiling operations

use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can escape the pooling subsystem
///
/// Invalid or foreign buffers handed back to a pool never show up here: they
/// are absorbed by the pool. Only real exhaustion and caller mistakes that
/// cannot be tolerated are surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("No tile layout for {width}x{height} fits within {tiles} tiles")]
    SizeLimitExceeded { width: u32, height: u32, tiles: usize },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
}

impl PoolError {
    /// True for errors that the single built-in recovery attempt may fix
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, PoolError::OutOfMemory { .. })
    }
}
