//! Core types for the pixpool buffer pooling workspace
//!
//! This crate provides the fundamental data structures shared by the pool,
//! tiling and façade crates: pixel formats, pool keys, the owned pixel buffer,
//! configuration and error types.

pub mod buffer;
pub mod config;
pub mod consts;
pub mod error;
pub mod types;

pub use buffer::*;
pub use config::*;
pub use error::{PoolError, PoolResult};
pub use types::*;
