// ============================================================================
// IMAGE FILTERS — filter kinds, dispatch, and N×N convolution
// ============================================================================
//
// Every filter is a pure function PixelBuffer -> PixelBuffer of the same
// dimensions. Rows are processed in parallel via rayon. Channel writes are
// rounded and then clamped to [0, 255] (`clamp_channel`).
// ============================================================================

use std::fmt;

use rayon::prelude::*;

use crate::canvas::PixelBuffer;
use crate::error::{CanvasError, CanvasResult};
use crate::ops::{adjustments, effects};

/// Largest accepted convolution kernel side.
pub const MAX_KERNEL_SIDE: usize = 31;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Blur,
    Sharpen,
    EdgeDetect,
    Emboss,
    /// Caller-supplied kernel weights.
    Convolution,
    Brightness,
    Contrast,
    Grayscale,
    Invert,
    Sepia,
    Saturation,
    Gamma,
    Solarize,
    Noise,
    Posterize,
    Pixelate,
    Vignette,
}

impl FilterKind {
    pub fn all() -> &'static [FilterKind] {
        &[
            FilterKind::Blur,
            FilterKind::Sharpen,
            FilterKind::EdgeDetect,
            FilterKind::Emboss,
            FilterKind::Convolution,
            FilterKind::Brightness,
            FilterKind::Contrast,
            FilterKind::Grayscale,
            FilterKind::Invert,
            FilterKind::Sepia,
            FilterKind::Saturation,
            FilterKind::Gamma,
            FilterKind::Solarize,
            FilterKind::Noise,
            FilterKind::Posterize,
            FilterKind::Pixelate,
            FilterKind::Vignette,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Blur => "blur",
            FilterKind::Sharpen => "sharpen",
            FilterKind::EdgeDetect => "edge_detect",
            FilterKind::Emboss => "emboss",
            FilterKind::Convolution => "convolution",
            FilterKind::Brightness => "brightness",
            FilterKind::Contrast => "contrast",
            FilterKind::Grayscale => "grayscale",
            FilterKind::Invert => "invert",
            FilterKind::Sepia => "sepia",
            FilterKind::Saturation => "saturation",
            FilterKind::Gamma => "gamma",
            FilterKind::Solarize => "solarize",
            FilterKind::Noise => "noise",
            FilterKind::Posterize => "posterize",
            FilterKind::Pixelate => "pixelate",
            FilterKind::Vignette => "vignette",
        }
    }

    /// Unknown names are an error; nothing is substituted.
    pub fn from_name(name: &str) -> CanvasResult<Self> {
        let key = name.trim().to_ascii_lowercase().replace('-', "_");
        FilterKind::all()
            .iter()
            .copied()
            .find(|k| k.name() == key)
            .ok_or_else(|| CanvasError::UnsupportedFilterKind(name.to_string()))
    }

    pub fn is_convolution(&self) -> bool {
        matches!(
            self,
            FilterKind::Blur
                | FilterKind::Sharpen
                | FilterKind::EdgeDetect
                | FilterKind::Emboss
                | FilterKind::Convolution
        )
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// KERNEL
// ============================================================================

/// Square convolution kernel with an odd side length, row-major weights.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    side: usize,
    weights: Vec<f32>,
}

impl Kernel {
    pub fn new(weights: Vec<f32>) -> CanvasResult<Self> {
        let side = (weights.len() as f64).sqrt().round() as usize;
        if side == 0 || side * side != weights.len() || side % 2 == 0 || side > MAX_KERNEL_SIDE {
            return Err(CanvasError::InvalidParameter(format!(
                "kernel needs an odd square number of weights (got {})",
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(CanvasError::InvalidParameter("kernel weight is not finite".into()));
        }
        Ok(Self { side, weights })
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// (2r+1)² box average.
    pub fn box_blur(radius: u32) -> Self {
        let side = (radius as usize * 2 + 1).min(MAX_KERNEL_SIDE);
        let n = side * side;
        Self { side, weights: vec![1.0 / n as f32; n] }
    }

    pub fn sharpen() -> Self {
        Self { side: 3, weights: vec![0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0] }
    }

    pub fn edge_detect() -> Self {
        Self { side: 3, weights: vec![-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0] }
    }

    pub fn emboss() -> Self {
        Self { side: 3, weights: vec![-2.0, -1.0, 0.0, -1.0, 1.0, 1.0, 0.0, 1.0, 2.0] }
    }
}

// ============================================================================
// PARAMETERS + DISPATCH
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterParams {
    /// Numeric parameter; meaning depends on the kind (offset, block size, ...).
    pub value: f32,
    /// Explicit weights. Required for `Convolution`, overrides the built-in
    /// kernel for the other convolution kinds.
    pub kernel: Option<Kernel>,
    /// Seed for `Noise`; the same seed always yields the same output.
    pub seed: u32,
}

impl FilterParams {
    pub fn value(value: f32) -> Self {
        Self { value, ..Default::default() }
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }
}

/// Apply `kind` to `src` and return a new buffer of the same dimensions.
pub fn apply(src: &PixelBuffer, kind: FilterKind, params: &FilterParams) -> CanvasResult<PixelBuffer> {
    if !params.value.is_finite() {
        return Err(CanvasError::InvalidParameter(format!("{} parameter is not finite", kind)));
    }
    let v = params.value;
    match kind {
        FilterKind::Blur | FilterKind::Sharpen | FilterKind::EdgeDetect | FilterKind::Emboss | FilterKind::Convolution => {
            let kernel = match (&params.kernel, kind) {
                (Some(k), _) => k.clone(),
                (None, FilterKind::Blur) => Kernel::box_blur(v.round().max(1.0) as u32),
                (None, FilterKind::Sharpen) => Kernel::sharpen(),
                (None, FilterKind::EdgeDetect) => Kernel::edge_detect(),
                (None, FilterKind::Emboss) => Kernel::emboss(),
                (None, _) => {
                    return Err(CanvasError::InvalidParameter("convolution requires kernel weights".into()));
                }
            };
            Ok(convolve(src, &kernel))
        }
        FilterKind::Brightness => Ok(adjustments::brightness(src, v)),
        FilterKind::Contrast => Ok(adjustments::contrast(src, v)),
        FilterKind::Grayscale => Ok(adjustments::grayscale(src)),
        FilterKind::Invert => Ok(adjustments::invert(src)),
        FilterKind::Sepia => Ok(adjustments::sepia(src)),
        FilterKind::Saturation => Ok(adjustments::saturation(src, v)),
        FilterKind::Gamma => adjustments::gamma(src, v),
        FilterKind::Solarize => Ok(adjustments::solarize(src, v)),
        FilterKind::Noise => Ok(effects::noise(src, v, params.seed)),
        FilterKind::Posterize => Ok(adjustments::posterize(src, v)),
        FilterKind::Pixelate => Ok(effects::pixelate(src, v)),
        FilterKind::Vignette => Ok(effects::vignette(src, v)),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Round then saturate into a channel byte. NaN maps to 0.
#[inline]
pub fn clamp_channel(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, 255.0) as u8
}

/// Apply a per-pixel transform in parallel. `transform` receives
/// (r, g, b, a) as f32 and returns (r, g, b, a) as f32.
pub(crate) fn map_pixels<F>(src: &PixelBuffer, transform: F) -> PixelBuffer
where
    F: Fn(f32, f32, f32, f32) -> (f32, f32, f32, f32) + Sync,
{
    let mut out = src.clone();
    let stride = src.width() as usize * 4;
    out.as_raw_mut().par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            let (nr, ng, nb, na) = transform(px[0] as f32, px[1] as f32, px[2] as f32, px[3] as f32);
            px[0] = clamp_channel(nr);
            px[1] = clamp_channel(ng);
            px[2] = clamp_channel(nb);
            px[3] = clamp_channel(na);
        }
    });
    out
}

/// Zero-padded convolution over RGB. Out-of-bounds taps contribute nothing
/// and the kernel is not renormalised at the edges. Alpha is copied from the
/// source pixel untouched.
pub fn convolve(src: &PixelBuffer, kernel: &Kernel) -> PixelBuffer {
    let w = src.width() as usize;
    let h = src.height() as usize;
    let side = kernel.side();
    let half = (side / 2) as isize;
    let weights = kernel.weights();
    let src_raw = src.as_raw();
    let stride = w * 4;

    let mut out = src.clone();
    out.as_raw_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for ky in 0..side {
                let sy = y as isize + ky as isize - half;
                if sy < 0 || sy >= h as isize {
                    continue;
                }
                let row_base = sy as usize * stride;
                for kx in 0..side {
                    let sx = x as isize + kx as isize - half;
                    if sx < 0 || sx >= w as isize {
                        continue;
                    }
                    let wt = weights[ky * side + kx];
                    let off = row_base + sx as usize * 4;
                    acc[0] += src_raw[off] as f32 * wt;
                    acc[1] += src_raw[off + 1] as f32 * wt;
                    acc[2] += src_raw[off + 2] as f32 * wt;
                }
            }
            let pi = x * 4;
            row_out[pi] = clamp_channel(acc[0]);
            row_out[pi + 1] = clamp_channel(acc[1]);
            row_out[pi + 2] = clamp_channel(acc[2]);
            // row_out[pi + 3] already holds the source alpha
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(w, h).unwrap();
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 37 + y * 91) % 256) as u8;
                buf.set_pixel(x, y, [v, 255 - v, v / 2, ((x * 13 + y * 7) % 256) as u8]);
            }
        }
        buf
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(FilterKind::from_name("glow"), Err(CanvasError::UnsupportedFilterKind(_))));
        assert_eq!(FilterKind::from_name("edge-detect").unwrap(), FilterKind::EdgeDetect);
        for kind in FilterKind::all() {
            assert_eq!(FilterKind::from_name(kind.name()).unwrap(), *kind);
        }
    }

    #[test]
    fn kernel_must_be_odd_square() {
        assert!(Kernel::new(vec![1.0; 4]).is_err());
        assert!(Kernel::new(vec![1.0; 8]).is_err());
        assert!(Kernel::new(vec![]).is_err());
        assert_eq!(Kernel::new(vec![0.2; 25]).unwrap().side(), 5);
    }

    #[test]
    fn convolution_kinds_preserve_alpha() {
        let src = gradient(17, 11);
        for kind in [FilterKind::Blur, FilterKind::Sharpen, FilterKind::EdgeDetect, FilterKind::Emboss] {
            let out = apply(&src, kind, &FilterParams::value(0.0)).unwrap();
            for (a, b) in src.as_raw().chunks_exact(4).zip(out.as_raw().chunks_exact(4)) {
                assert_eq!(a[3], b[3], "{} changed alpha", kind);
            }
        }
    }

    #[test]
    fn convolution_is_zero_padded() {
        let src = PixelBuffer::new_filled(3, 3, [90, 90, 90, 255]).unwrap();
        let out = apply(&src, FilterKind::Blur, &FilterParams::value(0.0)).unwrap();
        // Corner sees 4 of 9 taps
        assert_eq!(out.get_pixel(0, 0), Some([40, 40, 40, 255]));
        assert_eq!(out.get_pixel(1, 1), Some([90, 90, 90, 255]));
    }

    #[test]
    fn convolution_without_kernel_is_an_error() {
        let src = gradient(4, 4);
        assert!(apply(&src, FilterKind::Convolution, &FilterParams::value(0.0)).is_err());
        let identity = Kernel::new(vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let out = apply(&src, FilterKind::Convolution, &FilterParams::value(0.0).with_kernel(identity)).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn outputs_keep_dimensions() {
        let src = gradient(9, 5);
        for kind in FilterKind::all() {
            if *kind == FilterKind::Convolution {
                continue;
            }
            let out = apply(&src, *kind, &FilterParams::value(4.0)).unwrap();
            assert_eq!((out.width(), out.height()), (9, 5), "{}", kind);
        }
    }

    #[test]
    fn clamp_channel_rounds_then_saturates() {
        assert_eq!(clamp_channel(-3.0), 0);
        assert_eq!(clamp_channel(300.0), 255);
        assert_eq!(clamp_channel(127.5), 128);
        assert_eq!(clamp_channel(f32::NAN), 0);
    }
}
