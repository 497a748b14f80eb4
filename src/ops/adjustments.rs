// ============================================================================
// ADJUSTMENT OPERATIONS — per-pixel colour transforms
// ============================================================================
//
// All functions leave alpha untouched and return a new buffer.
// ============================================================================

use crate::canvas::PixelBuffer;
use crate::error::{CanvasError, CanvasResult};
use crate::ops::filters::map_pixels;

/// Luma weights used by grayscale and saturation.
const LUMA_R: f32 = 0.3;
const LUMA_G: f32 = 0.59;
const LUMA_B: f32 = 0.11;

#[inline]
fn luma(r: f32, g: f32, b: f32) -> f32 {
    LUMA_R * r + LUMA_G * g + LUMA_B * b
}

/// Additive offset on RGB.
pub fn brightness(src: &PixelBuffer, offset: f32) -> PixelBuffer {
    map_pixels(src, |r, g, b, a| (r + offset, g + offset, b + offset, a))
}

/// Linear contrast around 128. `amount` is in [-255, 255].
pub fn contrast(src: &PixelBuffer, amount: f32) -> PixelBuffer {
    // 259 - 255 keeps the denominator positive at the extreme
    let v = amount.clamp(-255.0, 255.0);
    let f = (259.0 * (v + 255.0)) / (255.0 * (259.0 - v));
    map_pixels(src, |r, g, b, a| {
        (f * (r - 128.0) + 128.0, f * (g - 128.0) + 128.0, f * (b - 128.0) + 128.0, a)
    })
}

pub fn grayscale(src: &PixelBuffer) -> PixelBuffer {
    map_pixels(src, |r, g, b, a| {
        let v = luma(r, g, b).round();
        (v, v, v, a)
    })
}

pub fn invert(src: &PixelBuffer) -> PixelBuffer {
    map_pixels(src, |r, g, b, a| (255.0 - r, 255.0 - g, 255.0 - b, a))
}

pub fn sepia(src: &PixelBuffer) -> PixelBuffer {
    map_pixels(src, |r, g, b, a| {
        (
            0.393 * r + 0.769 * g + 0.189 * b,
            0.349 * r + 0.686 * g + 0.168 * b,
            0.272 * r + 0.534 * g + 0.131 * b,
            a,
        )
    })
}

/// `amount` in [-100, 100]: -100 fully desaturates, +100 doubles the
/// distance from luma.
pub fn saturation(src: &PixelBuffer, amount: f32) -> PixelBuffer {
    let factor = 1.0 + amount.clamp(-100.0, 100.0) / 100.0;
    map_pixels(src, |r, g, b, a| {
        let l = luma(r, g, b);
        (l + (r - l) * factor, l + (g - l) * factor, l + (b - l) * factor, a)
    })
}

/// Gamma correction, out = 255 * (in / 255)^(1 / gamma). Gamma must be > 0.
pub fn gamma(src: &PixelBuffer, gamma: f32) -> CanvasResult<PixelBuffer> {
    if gamma <= 0.0 {
        return Err(CanvasError::InvalidParameter(format!("gamma must be positive (got {})", gamma)));
    }
    let lut = build_gamma_lut(gamma);
    Ok(map_pixels(src, |r, g, b, a| {
        (lut[r as usize] as f32, lut[g as usize] as f32, lut[b as usize] as f32, a)
    }))
}

fn build_gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let v = 255.0 * (i as f32 / 255.0).powf(inv);
        *slot = crate::ops::filters::clamp_channel(v);
    }
    lut
}

/// Reflect every channel above `threshold` (default 127 when the
/// parameter is outside 1..=254).
pub fn solarize(src: &PixelBuffer, threshold: f32) -> PixelBuffer {
    let t = if (1.0..=254.0).contains(&threshold) { threshold.round() } else { 127.0 };
    let reflect = move |c: f32| if c > t { 255.0 - c } else { c };
    map_pixels(src, move |r, g, b, a| (reflect(r), reflect(g), reflect(b), a))
}

/// Quantize each channel to `levels` evenly spaced values (2..=255).
pub fn posterize(src: &PixelBuffer, levels: f32) -> PixelBuffer {
    let levels = levels.round().clamp(2.0, 255.0);
    let step = 255.0 / (levels - 1.0);
    let q = move |c: f32| (c / step).round() * step;
    map_pixels(src, move |r, g, b, a| (q(r), q(g), q(b), a))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PixelBuffer {
        let mut buf = PixelBuffer::new(8, 4).unwrap();
        for y in 0..4 {
            for x in 0..8 {
                buf.set_pixel(x, y, [(x * 31) as u8, (y * 60) as u8, (x * y * 9) as u8, (200 + x) as u8]);
            }
        }
        buf
    }

    fn alpha(buf: &PixelBuffer) -> Vec<u8> {
        buf.as_raw().chunks_exact(4).map(|p| p[3]).collect()
    }

    #[test]
    fn brightness_offsets_and_clamps() {
        let src = PixelBuffer::new_filled(2, 2, [10, 250, 0, 77]).unwrap();
        let out = brightness(&src, 15.0);
        assert_eq!(out.get_pixel(1, 1), Some([25, 255, 15, 77]));
    }

    #[test]
    fn grayscale_is_idempotent() {
        let once = grayscale(&sample());
        let twice = grayscale(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn invert_twice_is_identity() {
        let src = sample();
        assert_eq!(invert(&invert(&src)), src);
    }

    #[test]
    fn contrast_zero_is_identity() {
        let src = sample();
        assert_eq!(contrast(&src, 0.0), src);
    }

    #[test]
    fn point_ops_leave_alpha_alone() {
        let src = sample();
        let a = alpha(&src);
        assert_eq!(alpha(&sepia(&src)), a);
        assert_eq!(alpha(&saturation(&src, 50.0)), a);
        assert_eq!(alpha(&solarize(&src, 0.0)), a);
        assert_eq!(alpha(&posterize(&src, 4.0)), a);
        assert_eq!(alpha(&gamma(&src, 2.2).unwrap()), a);
    }

    #[test]
    fn full_desaturation_matches_grayscale() {
        let src = sample();
        assert_eq!(saturation(&src, -100.0), grayscale(&src));
    }

    #[test]
    fn solarize_reflects_bright_channels() {
        let src = PixelBuffer::new_filled(1, 1, [200, 100, 128, 255]).unwrap();
        assert_eq!(solarize(&src, 0.0).get_pixel(0, 0), Some([55, 100, 127, 255]));
    }

    #[test]
    fn posterize_two_levels_is_binary() {
        let out = posterize(&sample(), 2.0);
        for px in out.as_raw().chunks_exact(4) {
            assert!(px[..3].iter().all(|&c| c == 0 || c == 255));
        }
    }

    #[test]
    fn gamma_rejects_non_positive() {
        assert!(gamma(&sample(), 0.0).is_err());
        assert_eq!(gamma(&sample(), 1.0).unwrap(), sample());
    }
}
