// ============================================================================
// EFFECTS — noise, pixelate, vignette
// ============================================================================

use rayon::prelude::*;

use crate::canvas::PixelBuffer;
use crate::ops::filters::clamp_channel;

// ============================================================================
// DETERMINISTIC HASH
// ============================================================================

#[inline]
fn hash_u32(mut x: u32) -> u32 {
    x = x.wrapping_mul(0x9E3779B9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85EBCA6B);
    x ^= x >> 13;
    x = x.wrapping_mul(0xC2B2AE35);
    x ^= x >> 16;
    x
}

/// Hash to f32 in [0, 1).
#[inline]
fn hash_f32(x: u32, y: u32, seed: u32) -> f32 {
    let h = hash_u32(
        x.wrapping_mul(374761393)
            .wrapping_add(y.wrapping_mul(668265263))
            .wrapping_add(seed),
    );
    (h & 0x00FFFFFF) as f32 / 16777216.0
}

// ============================================================================
// NOISE
// ============================================================================

/// Per-channel additive jitter uniformly drawn from [-amount, amount].
/// Same seed, same output.
pub fn noise(src: &PixelBuffer, amount: f32, seed: u32) -> PixelBuffer {
    let amount = amount.abs();
    let w = src.width() as usize;
    let stride = w * 4;
    let mut out = src.clone();
    out.as_raw_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let pi = x * 4;
            for c in 0..3 {
                let n = hash_f32(x as u32 * 3 + c as u32, y as u32, seed) * 2.0 - 1.0;
                row[pi + c] = clamp_channel(row[pi + c] as f32 + n * amount);
            }
        }
    });
    out
}

// ============================================================================
// PIXELATE
// ============================================================================

/// Average `block` × `block` tiles (alpha included) and write the average
/// back to every pixel in the tile. Edge tiles average only in-bounds pixels.
/// Block sizes below 2 leave the buffer unchanged; sizes past the longer edge
/// act as one tile.
pub fn pixelate(src: &PixelBuffer, block: f32) -> PixelBuffer {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let bs = if block > 1.0 { (block.floor() as usize).min(w.max(h)) } else { 1 };
    if bs <= 1 {
        return src.clone();
    }
    let stride = w * 4;
    let src_raw = src.as_raw();
    let mut out = src.clone();

    // One band of `bs` rows per task
    out.as_raw_mut()
        .par_chunks_mut(stride * bs)
        .enumerate()
        .for_each(|(band, rows)| {
            let y0 = band * bs;
            let band_h = (h - y0).min(bs);
            for x0 in (0..w).step_by(bs) {
                let bw = (w - x0).min(bs);
                let mut sum = [0u32; 4];
                for dy in 0..band_h {
                    let base = (y0 + dy) * stride;
                    for dx in 0..bw {
                        let off = base + (x0 + dx) * 4;
                        for c in 0..4 {
                            sum[c] += src_raw[off + c] as u32;
                        }
                    }
                }
                let count = (bw * band_h) as f32;
                let avg = sum.map(|s| clamp_channel(s as f32 / count));
                for dy in 0..band_h {
                    for dx in 0..bw {
                        let off = dy * stride + (x0 + dx) * 4;
                        rows[off..off + 4].copy_from_slice(&avg);
                    }
                }
            }
        });
    out
}

// ============================================================================
// VIGNETTE
// ============================================================================

/// Radial darkening centred on the buffer. Pixels beyond half of the
/// minor-dimension radius fade toward black; `strength` (0..=100) is the
/// darkening at the radius edge. Alpha is untouched.
pub fn vignette(src: &PixelBuffer, strength: f32) -> PixelBuffer {
    let strength = if strength > 0.0 { strength.min(100.0) / 100.0 } else { 0.5 };
    let w = src.width() as f32;
    let h = src.height() as f32;
    let cx = w / 2.0;
    let cy = h / 2.0;
    let radius = (w.min(h) / 2.0).max(1.0);
    let width = src.width();

    let mut out = src.clone();
    let stride = width as usize * 4;
    out.as_raw_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let dy = (y as f32 + 0.5 - cy) / radius;
        for x in 0..width as usize {
            let dx = (x as f32 + 0.5 - cx) / radius;
            let d = (dx * dx + dy * dy).sqrt();
            if d <= 0.5 {
                continue;
            }
            let t = ((d - 0.5) / 0.5).min(1.0);
            // smoothstep
            let falloff = t * t * (3.0 - 2.0 * t);
            let m = 1.0 - strength * falloff;
            let pi = x * 4;
            for c in 0..3 {
                row[pi + c] = clamp_channel(row[pi + c] as f32 * m);
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_bounded_and_seeded() {
        let src = PixelBuffer::new_filled(16, 16, [128, 128, 128, 200]).unwrap();
        let a = noise(&src, 10.0, 7);
        let b = noise(&src, 10.0, 7);
        assert_eq!(a, b);
        for px in a.as_raw().chunks_exact(4) {
            assert!(px[..3].iter().all(|&c| (118..=138).contains(&c)));
            assert_eq!(px[3], 200);
        }
        assert_ne!(a, noise(&src, 10.0, 8));
    }

    #[test]
    fn pixelate_averages_edge_blocks_in_bounds_only() {
        let mut src = PixelBuffer::new(3, 1).unwrap();
        src.set_pixel(0, 0, [0, 0, 0, 255]);
        src.set_pixel(1, 0, [100, 100, 100, 255]);
        src.set_pixel(2, 0, [40, 40, 40, 0]);
        let out = pixelate(&src, 2.0);
        assert_eq!(out.get_pixel(0, 0), Some([50, 50, 50, 255]));
        assert_eq!(out.get_pixel(1, 0), Some([50, 50, 50, 255]));
        // Lone edge pixel averages with nothing else
        assert_eq!(out.get_pixel(2, 0), Some([40, 40, 40, 0]));
    }

    #[test]
    fn pixelate_below_two_is_identity() {
        let src = PixelBuffer::new_filled(4, 4, [1, 2, 3, 4]).unwrap();
        assert_eq!(pixelate(&src, 1.0), src);
        assert_eq!(pixelate(&src, -5.0), src);
    }

    #[test]
    fn pixelate_huge_block_averages_whole_buffer() {
        let mut src = PixelBuffer::new(8, 8).unwrap();
        src.fill([100, 100, 100, 255]);
        src.set_pixel(0, 0, [164, 164, 164, 255]);
        let out = pixelate(&src, 1e20);
        assert!(out.as_raw().chunks_exact(4).all(|p| p == [101, 101, 101, 255]));
        let via_dispatch = crate::ops::filters::apply(
            &src,
            crate::ops::filters::FilterKind::Pixelate,
            &crate::ops::filters::FilterParams::value(f32::MAX),
        )
        .unwrap();
        assert_eq!(via_dispatch, out);
    }

    #[test]
    fn vignette_keeps_centre_and_darkens_corners() {
        let src = PixelBuffer::new_filled(41, 41, [200, 200, 200, 255]).unwrap();
        let out = vignette(&src, 80.0);
        assert_eq!(out.get_pixel(20, 20), Some([200, 200, 200, 255]));
        let corner = out.get_pixel(0, 0).unwrap();
        assert!(corner[0] < 100);
        assert_eq!(corner[3], 255);
    }
}
