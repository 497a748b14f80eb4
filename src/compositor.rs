// ============================================================================
// COMPOSITOR — flatten a layer stack through the viewport into one frame
// ============================================================================
//
// Rendering is read-only over the stack. Each output pixel centre is mapped
// back through the viewport and every layer's own transform and sampled
// nearest-neighbour, so arbitrary rotation, scale and mirroring share one path.
// ============================================================================

use rayon::prelude::*;

use crate::canvas::{blend_pixel, BlendMode, Layer, LayerId, LayerStack, PixelBuffer, TRANSPARENT};
use crate::error::CanvasResult;

/// Fraction of the surface a freshly opened canvas fills.
pub const FIT_FRACTION: f32 = 0.7;
pub const MIN_ZOOM: f32 = 0.01;
pub const MAX_ZOOM: f32 = 64.0;
/// Selection outline width in device pixels (constant on screen at any zoom).
pub const SELECTION_LINE_WIDTH: f32 = 2.0;

// ============================================================================
// AFFINE
// ============================================================================

/// 2D affine map: x' = a·x + c·y + e, y' = b·x + d·y + f.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine2 {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2 { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn translate(tx: f32, ty: f32) -> Self {
        Affine2 { e: tx, f: ty, ..Self::IDENTITY }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Affine2 { a: sx, d: sy, ..Self::IDENTITY }
    }

    pub fn rotate_degrees(deg: f32) -> Self {
        let (s, c) = deg.to_radians().sin_cos();
        Affine2 { a: c, b: s, c: -s, d: c, e: 0.0, f: 0.0 }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn then_apply(&self, other: &Affine2) -> Affine2 {
        Affine2 {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    #[inline]
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// `None` for singular maps (zero scale).
    pub fn invert(&self) -> Option<Affine2> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Affine2 {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }
}

/// Builds a transform from a chain of steps applied in reading order, the way
/// a 2D canvas context accumulates translate/rotate/scale calls.
fn chain(steps: &[Affine2]) -> Affine2 {
    steps.iter().fold(Affine2::IDENTITY, |acc, s| acc.then_apply(s))
}

/// Layer-local pixel space → canvas space. Rotation and scale pivot on the
/// buffer centre, so a negative scale mirrors in place.
pub fn layer_to_canvas(layer: &Layer) -> Affine2 {
    let t = &layer.transform;
    let hw = layer.width() as f32 * 0.5;
    let hh = layer.height() as f32 * 0.5;
    chain(&[
        Affine2::translate(t.x + hw, t.y + hh),
        Affine2::rotate_degrees(t.rotation),
        Affine2::scale(t.scale_x, t.scale_y),
        Affine2::translate(-hw, -hh),
    ])
}

/// Canvas-space corners of a layer's transformed bounding box, in order
/// top-left, top-right, bottom-right, bottom-left (pre-transform).
pub fn layer_corners(layer: &Layer) -> [(f32, f32); 4] {
    let m = layer_to_canvas(layer);
    let (w, h) = (layer.width() as f32, layer.height() as f32);
    [m.apply(0.0, 0.0), m.apply(w, 0.0), m.apply(w, h), m.apply(0.0, h)]
}

// ============================================================================
// VIEWPORT
// ============================================================================

/// Pan (device pixels) and zoom (device pixels per canvas pixel).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { pan_x: 0.0, pan_y: 0.0, zoom: 1.0 }
    }
}

impl Viewport {
    /// Centred, zoomed so the canvas fills 70% of the surface.
    pub fn fit(canvas_w: u32, canvas_h: u32, surface_w: u32, surface_h: u32) -> Self {
        Self { pan_x: 0.0, pan_y: 0.0, zoom: fit_zoom(canvas_w, canvas_h, surface_w, surface_h) }
    }

    /// Canvas space → device space.
    pub fn canvas_to_device_matrix(&self, canvas: (u32, u32), surface: (u32, u32)) -> Affine2 {
        chain(&[
            Affine2::translate(surface.0 as f32 * 0.5 + self.pan_x, surface.1 as f32 * 0.5 + self.pan_y),
            Affine2::scale(self.zoom, self.zoom),
            Affine2::translate(-(canvas.0 as f32) * 0.5, -(canvas.1 as f32) * 0.5),
        ])
    }
}

pub fn fit_zoom(canvas_w: u32, canvas_h: u32, surface_w: u32, surface_h: u32) -> f32 {
    if canvas_w == 0 || canvas_h == 0 || surface_w == 0 || surface_h == 0 {
        return 1.0;
    }
    let zx = FIT_FRACTION * surface_w as f32 / canvas_w as f32;
    let zy = FIT_FRACTION * surface_h as f32 / canvas_h as f32;
    zx.min(zy).clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Device (surface) point → canvas point. The single mapping every pointer
/// handler goes through.
pub fn device_to_canvas(view: &Viewport, canvas: (u32, u32), surface: (u32, u32), point: (f32, f32)) -> (f32, f32) {
    let zoom = if view.zoom.abs() < f32::EPSILON { 1.0 } else { view.zoom };
    (
        (point.0 - (surface.0 as f32 * 0.5 + view.pan_x)) / zoom + canvas.0 as f32 * 0.5,
        (point.1 - (surface.1 as f32 * 0.5 + view.pan_y)) / zoom + canvas.1 as f32 * 0.5,
    )
}

/// Inverse of `device_to_canvas`.
pub fn canvas_to_device(view: &Viewport, canvas: (u32, u32), surface: (u32, u32), point: (f32, f32)) -> (f32, f32) {
    view.canvas_to_device_matrix(canvas, surface).apply(point.0, point.1)
}

// ============================================================================
// RENDER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionOutline {
    pub layer_id: LayerId,
    pub color: [u8; 4],
}

/// Transparency grid drawn over the backing: `color` fills every cell whose
/// column plus row index is even, in canvas pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Checker {
    pub color: [u8; 4],
    pub cell: u32,
}

impl Default for Checker {
    fn default() -> Self {
        Self { color: [0x22, 0x22, 0x22, 255], cell: 40 }
    }
}

impl Checker {
    #[inline]
    fn covers(&self, cx: f32, cy: f32) -> bool {
        let cell = self.cell.max(1) as f32;
        ((cx / cell).floor() as i64 + (cy / cell).floor() as i64) % 2 == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOptions {
    /// Fills the whole surface first.
    pub backdrop: [u8; 4],
    /// Opaque rectangle under the layers covering the canvas bounds.
    pub backing: Option<[u8; 4]>,
    pub checker: Option<Checker>,
    pub selection: Option<SelectionOutline>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            backdrop: [0x0f, 0x0f, 0x0f, 255],
            backing: Some([0x1a, 0x1a, 0x1a, 255]),
            checker: Some(Checker::default()),
            selection: None,
        }
    }
}

/// Per-layer data resolved once per frame.
struct LayerDraw<'a> {
    device_to_local: Affine2,
    pixels: &'a PixelBuffer,
    mode: BlendMode,
    opacity: f32,
}

/// Render `stack` onto a `surface_w` × `surface_h` frame.
///
/// Order: backdrop, canvas backing, checker grid, visible layers
/// bottom-to-top, then the optional selection outline. Never mutates the stack.
pub fn render_frame(
    stack: &LayerStack,
    canvas: (u32, u32),
    view: &Viewport,
    surface: (u32, u32),
    options: &RenderOptions,
) -> CanvasResult<PixelBuffer> {
    let mut out = PixelBuffer::new_filled(surface.0, surface.1, options.backdrop)?;
    if canvas.0 == 0 || canvas.1 == 0 || stack.is_empty() {
        return Ok(out);
    }
    let view_m = view.canvas_to_device_matrix(canvas, surface);
    let Some(device_to_canvas_m) = view_m.invert() else {
        return Ok(out);
    };

    let draws: Vec<LayerDraw> = stack
        .iter()
        .filter(|l| l.visible && l.opacity > 0)
        .filter_map(|l| {
            let local_to_device = view_m.then_apply(&layer_to_canvas(l));
            local_to_device.invert().map(|inv| LayerDraw {
                device_to_local: inv,
                pixels: &l.pixels,
                mode: l.blend_mode,
                opacity: l.opacity_factor(),
            })
        })
        .collect();

    let outline: Option<([(f32, f32); 4], [u8; 4])> = options.selection.and_then(|sel| {
        stack.get(sel.layer_id).map(|l| {
            let corners = layer_corners(l).map(|(x, y)| view_m.apply(x, y));
            (corners, sel.color)
        })
    });

    let (cw, ch) = (canvas.0 as f32, canvas.1 as f32);
    let width = surface.0 as usize;
    out.as_raw_mut()
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let dy = y as f32 + 0.5;
            for x in 0..width {
                let dx = x as f32 + 0.5;
                let pi = x * 4;
                let mut px = [row[pi], row[pi + 1], row[pi + 2], row[pi + 3]];

                if options.backing.is_some() || options.checker.is_some() {
                    let (cx, cy) = device_to_canvas_m.apply(dx, dy);
                    if cx >= 0.0 && cy >= 0.0 && cx < cw && cy < ch {
                        if let Some(backing) = options.backing {
                            px = blend_pixel(px, backing, BlendMode::Normal, 1.0);
                        }
                        if let Some(checker) = &options.checker
                            && checker.covers(cx, cy)
                        {
                            px = blend_pixel(px, checker.color, BlendMode::Normal, 1.0);
                        }
                    }
                }

                for d in &draws {
                    if let Some(top) = sample_nearest(d.pixels, &d.device_to_local, dx, dy) {
                        px = blend_pixel(px, top, d.mode, d.opacity);
                    }
                }

                if let Some((corners, color)) = &outline
                    && on_outline(corners, dx, dy, SELECTION_LINE_WIDTH * 0.5)
                {
                    px = blend_pixel(px, *color, BlendMode::Normal, 1.0);
                }

                row[pi..pi + 4].copy_from_slice(&px);
            }
        });

    Ok(out)
}

/// Flatten the stack at canvas resolution over transparency (export path).
pub fn flatten(stack: &LayerStack, canvas_w: u32, canvas_h: u32) -> CanvasResult<PixelBuffer> {
    let options = RenderOptions { backdrop: TRANSPARENT, backing: None, checker: None, selection: None };
    render_frame(stack, (canvas_w, canvas_h), &Viewport::default(), (canvas_w, canvas_h), &options)
}

#[inline]
fn sample_nearest(pixels: &PixelBuffer, inv: &Affine2, dx: f32, dy: f32) -> Option<[u8; 4]> {
    let (lx, ly) = inv.apply(dx, dy);
    if lx < 0.0 || ly < 0.0 {
        return None;
    }
    let (ix, iy) = (lx.floor() as u32, ly.floor() as u32);
    pixels.get_pixel(ix, iy)
}

fn on_outline(corners: &[(f32, f32); 4], x: f32, y: f32, half_width: f32) -> bool {
    (0..4).any(|i| {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        segment_distance(a, b, (x, y)) <= half_width
    })
}

fn segment_distance(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    let (vx, vy) = (b.0 - a.0, b.1 - a.1);
    let (wx, wy) = (p.0 - a.0, p.1 - a.1);
    let len2 = vx * vx + vy * vy;
    let t = if len2 > 0.0 { ((wx * vx + wy * vy) / len2).clamp(0.0, 1.0) } else { 0.0 };
    let (qx, qy) = (a.0 + t * vx - p.0, a.1 + t * vy - p.1);
    (qx * qx + qy * qy).sqrt()
}
