//! Core types: pixel formats, dimensions and pool keys

use half::f16;
use std::fmt;

/// Pixel storage layout of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelFormat {
    /// Single 8-bit alpha channel
    Alpha8,
    /// Packed 16-bit RGB, 5/6/5 bits, little endian
    Rgb565,
    /// Packed 16-bit ARGB, 4 bits per channel, little endian
    Argb4444,
    /// Four 8-bit channels
    #[default]
    Argb8888,
    /// Four half-precision float channels
    RgbaF16,
}

impl PixelFormat {
    /// Returns the size in bytes of one pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Alpha8 => 1,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Argb4444 => 2,
            PixelFormat::Argb8888 => 4,
            PixelFormat::RgbaF16 => 8,
        }
    }

    /// Number of logical channels per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Alpha8 => 1,
            PixelFormat::Rgb565 => 3,
            PixelFormat::Argb4444 | PixelFormat::Argb8888 | PixelFormat::RgbaF16 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Alpha8 => "ALPHA_8",
            PixelFormat::Rgb565 => "RGB_565",
            PixelFormat::Argb4444 => "ARGB_4444",
            PixelFormat::Argb8888 => "ARGB_8888",
            PixelFormat::RgbaF16 => "RGBA_F16",
        }
    }

    /// Cross-fade one pixel: `dst = dst * (1 - alpha) + src * alpha`
    ///
    /// Both slices must be exactly `bytes_per_pixel()` long. Packed formats are
    /// unpacked so every channel is interpolated on its own.
    pub fn blend_pixel(&self, dst: &mut [u8], src: &[u8], alpha: f32) {
        if alpha >= 1.0 {
            dst.copy_from_slice(src);
            return;
        }
        if alpha <= 0.0 || dst == src {
            return;
        }

        match self {
            PixelFormat::Alpha8 | PixelFormat::Argb8888 => {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d = lerp_sample(*d, *s, alpha);
                }
            }
            PixelFormat::Rgb565 => {
                let d = u16::from_le_bytes([dst[0], dst[1]]);
                let s = u16::from_le_bytes([src[0], src[1]]);
                let r = lerp_field(d >> 11, s >> 11, 0x1F, alpha);
                let g = lerp_field((d >> 5) & 0x3F, (s >> 5) & 0x3F, 0x3F, alpha);
                let b = lerp_field(d & 0x1F, s & 0x1F, 0x1F, alpha);
                dst.copy_from_slice(&((r << 11) | (g << 5) | b).to_le_bytes());
            }
            PixelFormat::Argb4444 => {
                let d = u16::from_le_bytes([dst[0], dst[1]]);
                let s = u16::from_le_bytes([src[0], src[1]]);
                let mut out = 0u16;
                for shift in [12u16, 8, 4, 0] {
                    let v = lerp_field((d >> shift) & 0xF, (s >> shift) & 0xF, 0xF, alpha);
                    out |= v << shift;
                }
                dst.copy_from_slice(&out.to_le_bytes());
            }
            PixelFormat::RgbaF16 => {
                for (d, s) in dst.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                    let dv = f16::from_le_bytes([d[0], d[1]]).to_f32();
                    let sv = f16::from_le_bytes([s[0], s[1]]).to_f32();
                    let v = lerp_sample(dv, sv, alpha);
                    d.copy_from_slice(&f16::from_f32(v).to_le_bytes());
                }
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn lerp_sample<S: Sample>(dst: S, src: S, alpha: f32) -> S {
    S::from_f32(dst.to_f32() * (1.0 - alpha) + src.to_f32() * alpha)
}

fn lerp_field(dst: u16, src: u16, max: u16, alpha: f32) -> u16 {
    let v = dst as f32 * (1.0 - alpha) + src as f32 * alpha;
    (v.round() as u16).min(max)
}

/// Image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Identity of a bucket: exact width, height and pixel format
///
/// Two keys are equal only if all three fields match; there is no tolerance
/// for near-equal sizes since reuse requires the exact byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PoolKey {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Size in bytes of a buffer with this key
    pub fn byte_size(&self) -> usize {
        self.dimensions().pixel_count() * self.format.bytes_per_pixel()
    }

    /// Bytes in one row of pixels
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}_{}", self.width, self.height, self.format)
    }
}

/// Channel sample type that can be interpolated in normalized space
pub trait Sample: Copy {
    fn to_f32(self) -> f32;
    fn from_f32(value: f32) -> Self;
}

impl Sample for u8 {
    fn to_f32(self) -> f32 {
        self as f32 / 255.0
    }

    fn from_f32(value: f32) -> Self {
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

impl Sample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(value: f32) -> Self {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Alpha8.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::Rgb565.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Argb8888.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::RgbaF16.bytes_per_pixel(), 8);
    }

    #[test]
    fn test_key_equality_is_exact() {
        let a = PoolKey::new(1280, 720, PixelFormat::Argb8888);
        assert_eq!(a, PoolKey::new(1280, 720, PixelFormat::Argb8888));
        assert_ne!(a, PoolKey::new(1280, 721, PixelFormat::Argb8888));
        assert_ne!(a, PoolKey::new(1280, 720, PixelFormat::Rgb565));
        assert_eq!(a.byte_size(), 1280 * 720 * 4);
        assert_eq!(a.to_string(), "1280x720_ARGB_8888");
    }

    #[test]
    fn test_blend_8888_midpoint() {
        let mut dst = [0u8, 100, 200, 255];
        PixelFormat::Argb8888.blend_pixel(&mut dst, &[200, 100, 0, 255], 0.5);
        assert_eq!(dst, [100, 100, 100, 255]);
    }

    #[test]
    fn test_blend_565_keeps_fields_separate() {
        let white = 0xFFFFu16.to_le_bytes();
        let mut dst = 0u16.to_le_bytes();
        PixelFormat::Rgb565.blend_pixel(&mut dst, &white, 1.0);
        assert_eq!(dst, white);

        let mut dst = 0u16.to_le_bytes();
        PixelFormat::Rgb565.blend_pixel(&mut dst, &white, 0.5);
        let v = u16::from_le_bytes(dst);
        assert_eq!(v >> 11, 16);
        assert_eq!((v >> 5) & 0x3F, 32);
        assert_eq!(v & 0x1F, 16);
    }

    #[test]
    fn test_blend_identical_is_noop() {
        let px = [f16::from_f32(0.3).to_le_bytes(), f16::from_f32(0.7).to_le_bytes()].concat();
        let mut dst = [px.clone(), px.clone()].concat();
        let src = dst.clone();
        PixelFormat::RgbaF16.blend_pixel(&mut dst, &src, 0.37);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_blend_f16() {
        let mut dst: Vec<u8> = (0..4).flat_map(|_| f16::from_f32(0.0).to_le_bytes()).collect();
        let src: Vec<u8> = (0..4).flat_map(|_| f16::from_f32(1.0).to_le_bytes()).collect();
        PixelFormat::RgbaF16.blend_pixel(&mut dst, &src, 0.25);
        let first = f16::from_le_bytes([dst[0], dst[1]]).to_f32();
        assert!((first - 0.25).abs() < 1e-3);
    }
}
