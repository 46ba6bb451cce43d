//! Tiled processing of oversized pixel buffers
//!
//! Images larger than the processing limit are split into a grid of
//! overlapping tiles. Each tile is transformed on its own pooled buffer and
//! merged back with a linear cross-fade across the overlap so no seams show.
//!
//! Grid layout:
//! - Core regions partition the image exactly
//! - Each side with a neighbour gains an overlap margin
//! - At most [`MAX_TILES`](pixpool_core::consts::MAX_TILES) tiles per image

pub mod blend;
pub mod layout;
pub mod processor;

pub use blend::{extract_tile, merge_tile};
pub use layout::*;
pub use processor::*;
