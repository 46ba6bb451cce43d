//! Driver for processing images too large to handle in one piece
//!
//! Runs INIT → SIZE_CHECK → (DIRECT | TILED) → COMPLETE. An out-of-memory
//! failure moves to DEGRADE, which clears both pools, halves the tile size
//! and runs TILED once more.

use crate::blend::{extract_tile, merge_tile};
use crate::layout::{
    calculate_tile_layout, optimal_tile_size, tile_memory_bytes, TileInfo, TileLayout,
};
use pixpool_core::{
    consts, PixelBuffer, PixelFormat, PoolError, PoolKind, PoolResult, TilingConfig,
};
use pixpool_pool::{PoolManager, PooledBuffer};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, trace, warn};

/// Source of the largest extent the processing backend accepts
pub trait MaxExtent: Send + Sync {
    fn max_extent(&self) -> u32;
}

/// A constant extent limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedExtent(pub u32);

impl Default for FixedExtent {
    fn default() -> Self {
        Self(consts::DEFAULT_MAX_EXTENT)
    }
}

impl MaxExtent for FixedExtent {
    fn max_extent(&self) -> u32 {
        self.0
    }
}

/// Shared flag for aborting a running operation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Init,
    SizeCheck,
    Direct,
    Tiled,
    Degrade,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPath {
    /// Whole image in one call
    Direct,
    Tiled,
}

/// Summary of one processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub path: ProcessPath,
    /// Core tile size used by the successful attempt
    pub tile_size: u32,
    pub tile_count: usize,
    /// True if an out-of-memory failure forced a retry with smaller tiles
    pub degraded: bool,
}

/// Splits oversized images into tiles and merges the transformed result
///
/// All buffers come from the shared [`PoolManager`]: the output from the
/// primary pool and every tile from the tile pool.
pub struct LargeResourceProcessor {
    manager: Arc<PoolManager>,
    config: TilingConfig,
    extent_source: Box<dyn MaxExtent>,
    extent: OnceLock<u32>,
    thread_pool: Option<rayon::ThreadPool>,
}

impl LargeResourceProcessor {
    pub fn new(manager: Arc<PoolManager>, config: TilingConfig) -> Self {
        let extent = FixedExtent(config.max_extent);
        Self::with_extent(manager, config, extent)
    }

    /// Use `extent_source` for the extent limit; it is queried once
    pub fn with_extent(
        manager: Arc<PoolManager>,
        config: TilingConfig,
        extent_source: impl MaxExtent + 'static,
    ) -> Self {
        let thread_pool = match config.concurrency {
            0 => None,
            n => match rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("pixpool-tile-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "failed to build tile thread pool, using global pool");
                    None
                }
            },
        };

        Self {
            manager,
            config,
            extent_source: Box::new(extent_source),
            extent: OnceLock::new(),
            thread_pool,
        }
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    /// Largest width or height processed without tiling
    pub fn max_extent(&self) -> u32 {
        *self
            .extent
            .get_or_init(|| self.extent_source.max_extent().max(1))
    }

    /// Number of tiles transformed at the same time
    pub fn concurrency(&self) -> usize {
        match &self.thread_pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// True if the image exceeds the extent limit or the memory ceiling
    pub fn needs_tiling(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        let extent = self.max_extent();
        let bytes = width as usize * height as usize * format.bytes_per_pixel();
        width > extent || height > extent || bytes > self.config.memory_ceiling_bytes
    }

    /// True if the image can be processed directly or with a viable layout
    pub fn can_process_size(&self, width: u32, height: u32, format: PixelFormat) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if !self.needs_tiling(width, height, format) {
            return true;
        }
        let tile_size = self.calculate_optimal_tile_size(width, height, self.config.base_tile, format);
        match self.calculate_tile_layout(width, height, tile_size, self.config.overlap) {
            Ok(layout) => {
                layout.len() <= consts::MAX_TILES
                    && tile_memory_bytes(layout.tile_size, format) <= self.config.memory_ceiling_bytes
            }
            Err(_) => false,
        }
    }

    /// Tile size whose concurrent working set fits the memory ceiling
    pub fn calculate_optimal_tile_size(
        &self,
        width: u32,
        height: u32,
        base_tile: u32,
        format: PixelFormat,
    ) -> u32 {
        optimal_tile_size(
            width,
            height,
            base_tile,
            format,
            self.max_extent(),
            self.config.memory_ceiling_bytes,
            self.concurrency(),
        )
    }

    /// Tile layout whose tiles still fit the extent limit
    pub fn calculate_tile_layout(
        &self,
        width: u32,
        height: u32,
        tile_size: u32,
        overlap: u32,
    ) -> PoolResult<TileLayout> {
        let layout = calculate_tile_layout(width, height, tile_size, overlap)?;
        let extent = self.max_extent();
        if layout
            .iter()
            .any(|t| t.extended_width() > extent || t.extended_height() > extent)
        {
            return Err(PoolError::SizeLimitExceeded {
                width,
                height,
                tiles: layout.len(),
            });
        }
        Ok(layout)
    }

    /// Transform `source` through `tile_fn`, tiling if it is too large
    ///
    /// `tile_fn` transforms a buffer in place; for tiled runs it receives the
    /// tile's extended region. The result comes from the primary pool.
    pub fn process<F>(&self, source: &PixelBuffer, tile_fn: F) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        self.run(source, &tile_fn, None).map(|(buffer, _)| buffer)
    }

    /// Like [`process`](Self::process) but checks `token` before every tile
    pub fn process_with_cancel<F>(
        &self,
        source: &PixelBuffer,
        tile_fn: F,
        token: &CancellationToken,
    ) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        self.run(source, &tile_fn, Some(token))
            .map(|(buffer, _)| buffer)
    }

    /// Like [`process`](Self::process) but also reports how the run went
    pub fn process_with_report<F>(
        &self,
        source: &PixelBuffer,
        tile_fn: F,
        token: Option<&CancellationToken>,
    ) -> PoolResult<(PixelBuffer, ProcessReport)>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        self.run(source, &tile_fn, token)
    }

    /// Nearest-neighbour downscale of `buffer` to at most `target_bytes`
    ///
    /// Keeps the aspect ratio. The original buffer is released to the pool
    /// and the result acquired from the primary pool. Buffers already within
    /// the target are returned unchanged.
    pub fn downscale_for_memory(
        &self,
        buffer: PixelBuffer,
        target_bytes: usize,
    ) -> PoolResult<PixelBuffer> {
        if buffer.byte_size() <= target_bytes {
            return Ok(buffer);
        }
        let format = buffer.format();
        let bpp = format.bytes_per_pixel();
        if target_bytes < bpp {
            return Err(PoolError::OutOfMemory {
                requested: target_bytes,
            });
        }

        let (src_w, src_h) = (buffer.width(), buffer.height());
        let scale = (target_bytes as f64 / buffer.byte_size() as f64).sqrt();
        let mut width = ((src_w as f64 * scale) as u32).clamp(1, src_w);
        let mut height = ((src_h as f64 * scale) as u32).clamp(1, src_h);
        while width as usize * height as usize * bpp > target_bytes {
            if width >= height && width > 1 {
                width -= 1;
            } else {
                height -= 1;
            }
        }

        let mut out = self.manager.acquire_primary(width, height, format)?;
        for y in 0..height {
            let sy = (y as u64 * src_h as u64 / height as u64) as u32;
            let src_row = buffer.row(sy);
            let dst_row = out.row_mut(y);
            for x in 0..width as usize {
                let sx = x * src_w as usize / width as usize;
                dst_row[x * bpp..(x + 1) * bpp].copy_from_slice(&src_row[sx * bpp..(sx + 1) * bpp]);
            }
        }
        info!(
            from = %buffer.key(),
            to = %out.key(),
            "downscaled buffer to fit memory"
        );
        self.manager.release(buffer);
        Ok(out)
    }

    fn run<F>(
        &self,
        source: &PixelBuffer,
        tile_fn: &F,
        token: Option<&CancellationToken>,
    ) -> PoolResult<(PixelBuffer, ProcessReport)>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        trace_state(ProcessState::Init);
        if !source.is_valid() {
            return Err(PoolError::BufferTooSmall {
                expected: source.key().byte_size(),
                actual: source.as_bytes().len(),
            });
        }
        let (width, height, format) = (source.width(), source.height(), source.format());

        trace_state(ProcessState::SizeCheck);
        let mut tile_size = self.calculate_optimal_tile_size(width, height, self.config.base_tile, format);
        let mut degraded = false;

        if !self.needs_tiling(width, height, format) {
            trace_state(ProcessState::Direct);
            match self.run_direct(source, tile_fn, token) {
                Ok(out) => {
                    trace_state(ProcessState::Complete);
                    let report = ProcessReport {
                        path: ProcessPath::Direct,
                        tile_size: width.max(height),
                        tile_count: 1,
                        degraded,
                    };
                    return Ok((out, report));
                }
                Err(e) if e.is_out_of_memory() => {
                    self.degrade(&e);
                    degraded = true;
                }
                Err(e) => return Err(e),
            }
        }

        // Tile size and error of a tiled attempt that ran out of memory
        let mut failed: Option<(u32, PoolError)> = None;
        loop {
            let layout = self.calculate_tile_layout(width, height, tile_size, self.config.overlap)?;
            if let Some((failed_size, error)) = failed.take() {
                // Coarsening can undo the halving; the same layout would fail again
                if layout.tile_size >= failed_size {
                    warn!(
                        failed_size,
                        tile_size = layout.tile_size,
                        "no smaller tile layout available"
                    );
                    return Err(error);
                }
            }
            trace_state(ProcessState::Tiled);
            debug!(
                %width,
                %height,
                tile_size = layout.tile_size,
                tiles = layout.len(),
                overlap = layout.overlap,
                "processing tiled"
            );

            match self.run_tiled(source, &layout, tile_fn, token) {
                Ok(out) => {
                    trace_state(ProcessState::Complete);
                    let report = ProcessReport {
                        path: ProcessPath::Tiled,
                        tile_size: layout.tile_size,
                        tile_count: layout.len(),
                        degraded,
                    };
                    return Ok((out, report));
                }
                Err(e) if e.is_out_of_memory() && !degraded => {
                    self.degrade(&e);
                    degraded = true;
                    tile_size = (layout.tile_size / 2).max(consts::MIN_TILE_SIZE);
                    failed = Some((layout.tile_size, e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn degrade(&self, error: &PoolError) {
        trace_state(ProcessState::Degrade);
        warn!(%error, "out of memory while processing, retrying with smaller tiles");
        self.manager.clear();
    }

    fn run_direct<F>(
        &self,
        source: &PixelBuffer,
        tile_fn: &F,
        token: Option<&CancellationToken>,
    ) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        check_cancelled(token)?;
        let (width, height) = (source.width(), source.height());
        let mut out =
            self.manager
                .acquire_scoped(PoolKind::Primary, width, height, source.format())?;
        out.as_bytes_mut().copy_from_slice(source.as_bytes());
        let tile = TileInfo::whole(width, height);
        tile_fn(&tile, &mut *out)?;
        ensure_intact(&out, &tile)?;
        Ok(out.into_inner())
    }

    fn run_tiled<F>(
        &self,
        source: &PixelBuffer,
        layout: &TileLayout,
        tile_fn: &F,
        token: Option<&CancellationToken>,
    ) -> PoolResult<PixelBuffer>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        let format = source.format();
        let mut out = self
            .manager
            .acquire_scoped(PoolKind::Primary, layout.width, layout.height, format)?;

        for row in layout.rows() {
            check_cancelled(token)?;
            // A row is transformed in parallel, then merged left to right so
            // every tile blends against finished left and top neighbours
            let tiles = self.transform_row(source, row, tile_fn, token)?;
            for (tile, buffer) in row.iter().zip(&tiles) {
                merge_tile(&mut out, tile, buffer);
            }
            trace!(row = row.first().map_or(0, |t| t.row), "row merged");
        }
        Ok(out.into_inner())
    }

    fn transform_row<F>(
        &self,
        source: &PixelBuffer,
        row: &[TileInfo],
        tile_fn: &F,
        token: Option<&CancellationToken>,
    ) -> PoolResult<Vec<PooledBuffer<'_>>>
    where
        F: Fn(&TileInfo, &mut PixelBuffer) -> PoolResult<()> + Sync,
    {
        let manager: &PoolManager = &self.manager;
        let work = || {
            row.par_iter()
                .map(|tile| {
                    check_cancelled(token)?;
                    let mut buffer = manager.acquire_scoped(
                        PoolKind::Tile,
                        tile.extended_width(),
                        tile.extended_height(),
                        source.format(),
                    )?;
                    extract_tile(source, tile, &mut buffer);
                    tile_fn(tile, &mut *buffer)?;
                    ensure_intact(&buffer, tile)?;
                    Ok(buffer)
                })
                .collect::<PoolResult<Vec<_>>>()
        };
        match &self.thread_pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }
}

fn trace_state(state: ProcessState) {
    trace!(?state, "large resource processor");
}

fn check_cancelled(token: Option<&CancellationToken>) -> PoolResult<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(PoolError::Cancelled),
        _ => Ok(()),
    }
}

/// The transform must leave the buffer valid and unchanged in size
fn ensure_intact(buffer: &PixelBuffer, tile: &TileInfo) -> PoolResult<()> {
    if !buffer.is_valid()
        || buffer.width() != tile.extended_width()
        || buffer.height() != tile.extended_height()
    {
        return Err(PoolError::Transform(format!(
            "tile ({}, {}) buffer invalidated by transform",
            tile.column, tile.row
        )));
    }
    Ok(())
}
