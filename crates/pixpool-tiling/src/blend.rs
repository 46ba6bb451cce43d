//! Copying tiles out of the source and merging them back with seam blending

use crate::layout::TileInfo;
use pixpool_core::PixelBuffer;

/// Copy the extended region of `tile` from `source` into `dst`
///
/// `dst` must be exactly the tile's extended size in the source format.
pub fn extract_tile(source: &PixelBuffer, tile: &TileInfo, dst: &mut PixelBuffer) {
    let bpp = source.format().bytes_per_pixel();
    let start = tile.extended_x() as usize * bpp;
    let end = start + tile.extended_width() as usize * bpp;
    for row in 0..tile.extended_height() {
        let src = &source.row(tile.extended_y() + row)[start..end];
        dst.row_mut(row).copy_from_slice(src);
    }
}

/// Merge a transformed tile into `output`
///
/// The whole extended extent is written. Along a left or top seam the tile
/// is cross-faded with what the neighbour already wrote: alpha rises
/// linearly from 0 at the outer margin edge to 1 the same distance inside
/// the core. Right and bottom margins are written opaque and get blended
/// by the neighbour merged after this tile.
pub fn merge_tile(output: &mut PixelBuffer, tile: &TileInfo, src: &PixelBuffer) {
    let format = output.format();
    let bpp = format.bytes_per_pixel();
    let ramp_x = tile.overlap_left + tile.overlap_left.min(tile.width);
    let ramp_y = tile.overlap_top + tile.overlap_top.min(tile.height);
    let start = tile.extended_x() as usize * bpp;
    let end = start + tile.extended_width() as usize * bpp;

    for row in 0..tile.extended_height() {
        let alpha_y = ramp(row, ramp_y);
        let dst_row = &mut output.row_mut(tile.extended_y() + row)[start..end];
        let src_row = src.row(row);

        if alpha_y >= 1.0 && ramp_x == 0 {
            dst_row.copy_from_slice(src_row);
            continue;
        }
        for (col, (d, s)) in dst_row
            .chunks_exact_mut(bpp)
            .zip(src_row.chunks_exact(bpp))
            .enumerate()
        {
            let alpha = ramp(col as u32, ramp_x).min(alpha_y);
            format.blend_pixel(d, s, alpha);
        }
    }
}

/// Linear ramp from 0 at `pos == 0` to 1 at `pos >= len`
fn ramp(pos: u32, len: u32) -> f32 {
    if pos >= len {
        1.0
    } else {
        pos as f32 / len as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::calculate_tile_layout;
    use pixpool_core::PixelFormat;

    fn gradient(width: u32, height: u32, format: PixelFormat) -> PixelBuffer {
        let mut buf = PixelBuffer::new_direct(width, height, format).unwrap();
        for (i, byte) in buf.as_bytes_mut().iter_mut().enumerate() {
            *byte = (i * 7 % 251) as u8;
        }
        buf
    }

    fn tile_buffer(tile: &TileInfo, format: PixelFormat) -> PixelBuffer {
        PixelBuffer::new_direct(tile.extended_width(), tile.extended_height(), format).unwrap()
    }

    #[test]
    fn test_ramp() {
        assert_eq!(ramp(0, 0), 1.0);
        assert_eq!(ramp(0, 4), 0.0);
        assert_eq!(ramp(2, 4), 0.5);
        assert_eq!(ramp(9, 4), 1.0);
    }

    #[test]
    fn test_extract_copies_extended_region() {
        let source = gradient(64, 64, PixelFormat::Argb8888);
        let layout = calculate_tile_layout(64, 64, 32, 4).unwrap();
        let tile = layout.tiles()[3];
        let mut dst = tile_buffer(&tile, PixelFormat::Argb8888);
        extract_tile(&source, &tile, &mut dst);

        assert_eq!(tile.extended_x(), 28);
        assert_eq!(dst.pixel(0, 0), source.pixel(28, 28));
        assert_eq!(dst.pixel(35, 35), source.pixel(63, 63));
    }

    #[test]
    fn test_identity_merge_is_lossless() {
        for format in [
            PixelFormat::Alpha8,
            PixelFormat::Rgb565,
            PixelFormat::Argb4444,
            PixelFormat::Argb8888,
            PixelFormat::RgbaF16,
        ] {
            let source = gradient(100, 70, format);
            let mut output = PixelBuffer::new_direct(100, 70, format).unwrap();
            let layout = calculate_tile_layout(100, 70, 32, 6).unwrap();
            for tile in layout.iter() {
                let mut buf = tile_buffer(tile, format);
                extract_tile(&source, tile, &mut buf);
                merge_tile(&mut output, tile, &buf);
            }
            assert_eq!(output.as_bytes(), source.as_bytes(), "{format}");
        }
    }

    #[test]
    fn test_seam_is_cross_faded() {
        let format = PixelFormat::Alpha8;
        let mut output = PixelBuffer::new_direct(64, 8, format).unwrap();
        let layout = calculate_tile_layout(64, 8, 32, 8).unwrap();
        let [left, right] = [layout.tiles()[0], layout.tiles()[1]];

        let mut dark = tile_buffer(&left, format);
        dark.fill(0);
        merge_tile(&mut output, &left, &dark);
        let mut light = tile_buffer(&right, format);
        light.fill(200);
        merge_tile(&mut output, &right, &light);

        let row = output.row(0);
        // Ramp spans x = 24..40 with the midpoint on the seam
        assert_eq!(row[23], 0);
        assert_eq!(row[24], 0);
        assert_eq!(row[32], 100);
        assert_eq!(row[40], 200);
        assert!(row[24..40].windows(2).all(|w| w[0] <= w[1]));
    }
}
