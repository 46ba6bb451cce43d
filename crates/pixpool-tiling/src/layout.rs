//! Tile grid layout and tile size selection
//!
//! Core regions use a fixed grid of `tile_size` pixels; only the last column
//! and row may be narrower. Margins extend a tile into its neighbours' cores
//! so the merge step can cross-fade across seams.

use pixpool_core::{consts, PixelFormat, PoolError, PoolResult};

/// Placement of one tile within the source extent
///
/// `x`, `y`, `width` and `height` describe the core region. The tile buffer
/// covers the core plus the four overlap margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub overlap_left: u32,
    pub overlap_top: u32,
    pub overlap_right: u32,
    pub overlap_bottom: u32,
    /// Grid column
    pub column: u32,
    /// Grid row
    pub row: u32,
}

impl TileInfo {
    /// A single tile covering a whole `width x height` image
    pub fn whole(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
            overlap_left: 0,
            overlap_top: 0,
            overlap_right: 0,
            overlap_bottom: 0,
            column: 0,
            row: 0,
        }
    }

    pub fn extended_x(&self) -> u32 {
        self.x - self.overlap_left
    }

    pub fn extended_y(&self) -> u32 {
        self.y - self.overlap_top
    }

    pub fn extended_width(&self) -> u32 {
        self.overlap_left + self.width + self.overlap_right
    }

    pub fn extended_height(&self) -> u32 {
        self.overlap_top + self.height + self.overlap_bottom
    }

    /// Bytes of a tile buffer for this tile in `format`
    pub fn buffer_bytes(&self, format: PixelFormat) -> usize {
        self.extended_width() as usize * self.extended_height() as usize * format.bytes_per_pixel()
    }
}

/// Grid of tiles covering one image, in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    pub width: u32,
    pub height: u32,
    /// Core size of every tile except the last column and row
    pub tile_size: u32,
    /// Overlap after clamping to half the tile size
    pub overlap: u32,
    pub columns: u32,
    pub rows: u32,
    tiles: Vec<TileInfo>,
}

impl TileLayout {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[TileInfo] {
        &self.tiles
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileInfo> {
        self.tiles.iter()
    }

    /// Tiles grouped by grid row, top to bottom
    pub fn rows(&self) -> impl Iterator<Item = &[TileInfo]> {
        self.tiles.chunks(self.columns.max(1) as usize)
    }
}

/// Number of tiles needed to cover `size` pixels
pub fn num_tiles(size: u32, tile_size: u32) -> u32 {
    size.div_ceil(tile_size.max(1))
}

/// Working memory one tile of `tile_size` needs: input, output and scratch
pub fn tile_memory_bytes(tile_size: u32, format: PixelFormat) -> usize {
    let side = tile_size as usize;
    side * side * format.bytes_per_pixel() * consts::TILE_MEMORY_FACTOR
}

/// Pick a tile size whose concurrent working set fits `memory_ceiling`
///
/// Starts from `base_tile` capped by `max_extent` and by the image's longer
/// side, then halves until `concurrency` tiles fit or `MIN_TILE_SIZE` is
/// reached. A `base_tile` below the minimum is returned unchanged.
pub fn optimal_tile_size(
    width: u32,
    height: u32,
    base_tile: u32,
    format: PixelFormat,
    max_extent: u32,
    memory_ceiling: usize,
    concurrency: usize,
) -> u32 {
    let base_tile = base_tile.max(1);
    if base_tile <= consts::MIN_TILE_SIZE {
        return base_tile;
    }

    let longest = width.max(height).max(consts::MIN_TILE_SIZE);
    let mut tile = base_tile.min(max_extent.max(consts::MIN_TILE_SIZE)).min(longest);
    let concurrency = concurrency.max(1);
    while tile > consts::MIN_TILE_SIZE
        && tile_memory_bytes(tile, format).saturating_mul(concurrency) > memory_ceiling
    {
        tile = (tile / 2).max(consts::MIN_TILE_SIZE);
    }
    tile
}

/// Partition `width x height` into overlapping tiles
///
/// The overlap is clamped to half the tile size. When the grid would exceed
/// `MAX_TILES`, the tile size grows by a quarter (at least one pixel) until it
/// fits.
pub fn calculate_tile_layout(
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
) -> PoolResult<TileLayout> {
    if width == 0 || height == 0 {
        return Err(PoolError::InvalidDimensions { width, height });
    }

    let mut tile_size = tile_size.max(1);
    while num_tiles(width, tile_size) as u64 * num_tiles(height, tile_size) as u64
        > consts::MAX_TILES as u64
    {
        tile_size = (tile_size + tile_size / 4).max(tile_size + 1);
    }

    let overlap = overlap.min(tile_size / 2);
    let columns = num_tiles(width, tile_size);
    let rows = num_tiles(height, tile_size);
    let core = |index: u32, extent: u32| {
        let start = index * tile_size;
        (start, tile_size.min(extent - start))
    };

    let mut tiles = Vec::with_capacity((columns * rows) as usize);
    for row in 0..rows {
        let (y, tile_h) = core(row, height);
        for column in 0..columns {
            let (x, tile_w) = core(column, width);
            let overlap_right = if column + 1 < columns {
                overlap.min(core(column + 1, width).1)
            } else {
                0
            };
            let overlap_bottom = if row + 1 < rows {
                overlap.min(core(row + 1, height).1)
            } else {
                0
            };
            tiles.push(TileInfo {
                x,
                y,
                width: tile_w,
                height: tile_h,
                // Every core left of or above this one is a full tile
                overlap_left: if column > 0 { overlap } else { 0 },
                overlap_top: if row > 0 { overlap } else { 0 },
                overlap_right,
                overlap_bottom,
                column,
                row,
            });
        }
    }

    Ok(TileLayout {
        width,
        height,
        tile_size,
        overlap,
        columns,
        rows,
        tiles,
    })
}
