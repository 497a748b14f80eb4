// ============================================================================
// CANVAS-LEVEL OPERATIONS — layer construction, background, crop, strokes
// ============================================================================

use image::imageops::FilterType;

use crate::canvas::{
    blend_pixel, BlendMode, Layer, LayerId, LayerKind, LayerStack, PixelBuffer, Transform,
    BACKGROUND_LAYER_NAME, TRANSPARENT,
};
use crate::error::{CanvasError, CanvasResult};
use crate::io::Bitmap;
use crate::ops::text::{CoverageMask, FontService, TextSource};

/// What a new layer is built from.
#[derive(Clone, Debug)]
pub enum LayerSource {
    /// Canvas-sized, fully transparent.
    Empty,
    /// Canvas-sized, filled with one colour.
    Fill([u8; 4]),
    /// Caller-supplied pixels anchored at the canvas origin.
    Raster(PixelBuffer),
    /// Decoded bitmap placed at native size, centered on the canvas.
    Image(Bitmap),
    Text(TextSource),
}

impl LayerSource {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerSource::Empty => LayerKind::Empty,
            LayerSource::Fill(_) => LayerKind::Fill,
            LayerSource::Raster(_) => LayerKind::Raster,
            LayerSource::Image(_) => LayerKind::Image,
            LayerSource::Text(_) => LayerKind::Text,
        }
    }
}

/// Offset that centers a `size` extent inside `canvas`; may be negative.
fn centered(canvas: u32, size: u32) -> f32 {
    ((canvas as f32 - size as f32) / 2.0).floor()
}

/// Build a layer for `source`. `stack_len` drives the default "Layer N" name.
pub fn build_layer(
    source: LayerSource,
    canvas_w: u32,
    canvas_h: u32,
    stack_len: usize,
    fonts: &dyn FontService,
) -> CanvasResult<Layer> {
    let default_name = format!("Layer {}", stack_len + 1);
    let layer = match source {
        LayerSource::Empty => Layer::new(default_name, LayerKind::Empty, canvas_w, canvas_h)?,
        LayerSource::Fill(color) => {
            let pixels = PixelBuffer::new_filled(canvas_w, canvas_h, color)?;
            Layer::with_pixels(default_name, LayerKind::Fill, pixels)
        }
        LayerSource::Raster(pixels) => Layer::with_pixels(default_name, LayerKind::Raster, pixels),
        LayerSource::Image(bitmap) => {
            let pixels = bitmap.to_pixel_buffer()?;
            let mut layer = Layer::with_pixels("Image", LayerKind::Image, pixels);
            layer.transform.x = centered(canvas_w, bitmap.width);
            layer.transform.y = centered(canvas_h, bitmap.height);
            layer
        }
        LayerSource::Text(text) => {
            let mut layer = Layer::new_text("Text", text, fonts)?;
            layer.transform.x = centered(canvas_w, layer.width());
            layer.transform.y = centered(canvas_h, layer.height());
            layer
        }
    };
    Ok(layer)
}

// ============================================================================
// BACKGROUND
// ============================================================================

#[derive(Clone, Debug)]
pub enum BackgroundMode {
    Transparent,
    Color([u8; 4]),
    /// Scaled to cover the canvas, centered, overflow cropped.
    Image(Bitmap),
}

/// Cover-fit `bitmap` into a `canvas_w`×`canvas_h` buffer.
pub fn cover_fit(bitmap: &Bitmap, canvas_w: u32, canvas_h: u32) -> CanvasResult<PixelBuffer> {
    let src = bitmap.to_pixel_buffer()?;
    let mut out = PixelBuffer::new(canvas_w, canvas_h)?;
    let scale = (canvas_w as f32 / src.width() as f32).max(canvas_h as f32 / src.height() as f32);
    let dw = ((src.width() as f32 * scale).round() as u32).max(canvas_w);
    let dh = ((src.height() as f32 * scale).round() as u32).max(canvas_h);
    let scaled = image::imageops::resize(&src.to_rgba_image(), dw, dh, FilterType::Triangle);
    let scaled = PixelBuffer::from_rgba_image(&scaled)?;
    let ox = -(((dw - canvas_w) / 2) as i32);
    let oy = -(((dh - canvas_h) / 2) as i32);
    out.blit(&scaled, ox, oy);
    Ok(out)
}

pub fn render_background(mode: &BackgroundMode, canvas_w: u32, canvas_h: u32) -> CanvasResult<PixelBuffer> {
    match mode {
        BackgroundMode::Transparent => PixelBuffer::new(canvas_w, canvas_h),
        BackgroundMode::Color(c) => PixelBuffer::new_filled(canvas_w, canvas_h, *c),
        BackgroundMode::Image(bitmap) => cover_fit(bitmap, canvas_w, canvas_h),
    }
}

/// Find-or-create the background layer and redraw it for `mode`.
/// A newly created background goes to the bottom of the stack.
pub fn apply_background(
    stack: &mut LayerStack,
    mode: &BackgroundMode,
    canvas_w: u32,
    canvas_h: u32,
) -> CanvasResult<LayerId> {
    let pixels = render_background(mode, canvas_w, canvas_h)?;
    let existing = stack.find_by_name(BACKGROUND_LAYER_NAME).map(|l| l.id);
    match existing.and_then(|id| stack.get_mut(id)) {
        Some(layer) => {
            layer.pixels = pixels;
            layer.transform = Transform::default();
            layer.kind = LayerKind::Fill;
            layer.text_source = None;
            Ok(layer.id)
        }
        None => {
            let layer = Layer::with_pixels(BACKGROUND_LAYER_NAME, LayerKind::Fill, pixels);
            let id = layer.id;
            stack.insert(0, layer)?;
            Ok(id)
        }
    }
}

// ============================================================================
// CROP
// ============================================================================

/// Integer canvas-space rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two opposite corners in any order.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: x0.abs_diff(x1),
            height: y0.abs_diff(y1),
        }
    }
}

/// Shift every layer so `region`'s top-left becomes the canvas origin.
pub fn crop_translate(stack: &mut LayerStack, region: Rect) -> CanvasResult<()> {
    if region.width == 0 || region.height == 0 {
        return Err(CanvasError::InvalidDimensions { width: region.width, height: region.height });
    }
    for layer in stack.iter_mut() {
        layer.transform.x -= region.x as f32;
        layer.transform.y -= region.y as f32;
    }
    Ok(())
}

// ============================================================================
// STROKES – brush / eraser segments stamped into a layer buffer
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub color: [u8; 4],
    /// Brush diameter in pixels.
    pub size: f32,
    pub erase: bool,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self { color: [0, 0, 0, 255], size: 10.0, erase: false }
    }
}

/// Draw a round-capped segment in buffer-local coordinates. Coverage is
/// max-combined over the whole segment so overlapping stamps never darken.
pub fn stroke_segment(buffer: &mut PixelBuffer, from: (f32, f32), to: (f32, f32), style: &StrokeStyle) {
    let radius = style.size / 2.0;
    if radius < 0.05 {
        return;
    }
    let min_x = (from.0.min(to.0) - radius - 1.0).floor().max(0.0);
    let min_y = (from.1.min(to.1) - radius - 1.0).floor().max(0.0);
    let max_x = (from.0.max(to.0) + radius + 1.0).ceil().min(buffer.width() as f32);
    let max_y = (from.1.max(to.1) + radius + 1.0).ceil().min(buffer.height() as f32);
    if min_x >= max_x || min_y >= max_y {
        return;
    }
    let (ox, oy) = (min_x as i32, min_y as i32);
    let mut mask = CoverageMask::new((max_x - min_x) as u32, (max_y - min_y) as u32);

    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = distance.ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        stamp_circle(&mut mask, from.0 + dx * t - ox as f32, from.1 + dy * t - oy as f32, radius);
    }

    for my in 0..mask.height() {
        for mx in 0..mask.width() {
            let cov = mask.get(mx, my);
            if cov <= 0.001 {
                continue;
            }
            let (x, y) = (mx + ox as u32, my + oy as u32);
            let Some(base) = buffer.get_pixel(x, y) else { continue };
            let px = if style.erase {
                let a = (base[3] as f32 * (1.0 - cov)).round() as u8;
                if a == 0 { TRANSPARENT } else { [base[0], base[1], base[2], a] }
            } else {
                blend_pixel(base, style.color, BlendMode::Normal, cov)
            };
            buffer.set_pixel(x, y, px);
        }
    }
}

/// Antialiased disc: full coverage inside, one-pixel linear falloff at the rim.
fn stamp_circle(mask: &mut CoverageMask, cx: f32, cy: f32, radius: f32) {
    let x0 = (cx - radius - 1.0).floor() as i32;
    let x1 = (cx + radius + 1.0).ceil() as i32;
    let y0 = (cy - radius - 1.0).floor() as i32;
    let y1 = (cy + radius + 1.0).ceil() as i32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let px = x as f32 + 0.5 - cx;
            let py = y as f32 + 0.5 - cy;
            let d = (px * px + py * py).sqrt();
            let cov = (radius - d + 0.5).clamp(0.0, 1.0);
            if cov > 0.0 {
                mask.plot(x, y, cov);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::WHITE;
    use crate::io::PixelFormat;
    use crate::ops::text::BlockFont;

    #[test]
    fn image_layers_are_centered_at_native_size() {
        let bmp = Bitmap::new(10, 4, PixelFormat::Rgb8, vec![7; 10 * 4 * 3]).unwrap();
        let layer = build_layer(LayerSource::Image(bmp), 100, 50, 1, &BlockFont).unwrap();
        assert_eq!(layer.name, "Image");
        assert_eq!(layer.kind, LayerKind::Image);
        assert_eq!((layer.width(), layer.height()), (10, 4));
        assert_eq!((layer.transform.x, layer.transform.y), (45.0, 23.0));
        assert_eq!(layer.pixels.get_pixel(0, 0), Some([7, 7, 7, 255]));
    }

    #[test]
    fn oversized_images_get_negative_offsets() {
        let bmp = Bitmap::new(20, 20, PixelFormat::Rgba8, vec![0; 20 * 20 * 4]).unwrap();
        let layer = build_layer(LayerSource::Image(bmp), 10, 10, 0, &BlockFont).unwrap();
        assert_eq!((layer.transform.x, layer.transform.y), (-5.0, -5.0));
    }

    #[test]
    fn empty_layers_are_canvas_sized_and_numbered() {
        let layer = build_layer(LayerSource::Empty, 8, 6, 1, &BlockFont).unwrap();
        assert_eq!(layer.name, "Layer 2");
        assert_eq!((layer.width(), layer.height()), (8, 6));
        assert!(layer.pixels.as_raw().iter().all(|&b| b == 0));
    }

    #[test]
    fn text_layers_carry_their_source() {
        let layer = build_layer(LayerSource::Text(TextSource::new("Hi", 20.0)), 400, 300, 0, &BlockFont).unwrap();
        assert_eq!(layer.kind, LayerKind::Text);
        assert!(layer.text_source.is_some());
        assert_eq!(layer.transform.x, ((400 - layer.width()) / 2) as f32);
    }

    #[test]
    fn background_is_reused_and_kept_at_bottom() {
        let mut stack = LayerStack::new();
        stack.push(Layer::new("Layer 1", LayerKind::Empty, 4, 4).unwrap()).unwrap();
        let id = apply_background(&mut stack, &BackgroundMode::Color(WHITE), 4, 4).unwrap();
        assert_eq!(stack.index_of(id), Some(0));
        let again = apply_background(&mut stack, &BackgroundMode::Color([1, 2, 3, 255]), 6, 2).unwrap();
        assert_eq!(again, id);
        assert_eq!(stack.len(), 2);
        let bg = stack.get(id).unwrap();
        assert_eq!((bg.width(), bg.height()), (6, 2));
        assert_eq!(bg.pixels.get_pixel(5, 1), Some([1, 2, 3, 255]));
    }

    #[test]
    fn cover_fit_fills_the_whole_canvas() {
        let bmp = Bitmap::new(2, 1, PixelFormat::Rgba8, vec![255, 0, 0, 255, 255, 0, 0, 255]).unwrap();
        let buf = cover_fit(&bmp, 10, 10).unwrap();
        assert_eq!((buf.width(), buf.height()), (10, 10));
        assert!(buf.as_raw().chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn crop_translates_layers() {
        let mut stack = LayerStack::new();
        let mut layer = Layer::new("a", LayerKind::Raster, 2, 2).unwrap();
        layer.transform.x = 100.0;
        layer.transform.y = 100.0;
        let id = layer.id;
        stack.push(layer).unwrap();
        let region = Rect::from_corners(500, 500, 50, 50);
        assert_eq!(region, Rect::new(50, 50, 450, 450));
        crop_translate(&mut stack, region).unwrap();
        let l = stack.get(id).unwrap();
        assert_eq!((l.transform.x, l.transform.y), (50.0, 50.0));
        assert!(crop_translate(&mut stack, Rect::new(0, 0, 0, 5)).is_err());
    }

    #[test]
    fn strokes_paint_and_erase() {
        let mut buf = PixelBuffer::new(20, 20).unwrap();
        let style = StrokeStyle { color: [255, 0, 0, 255], size: 4.0, erase: false };
        stroke_segment(&mut buf, (2.0, 10.0), (18.0, 10.0), &style);
        assert_eq!(buf.get_pixel(10, 10), Some([255, 0, 0, 255]));
        assert_eq!(buf.get_pixel(10, 0), Some(TRANSPARENT));

        let eraser = StrokeStyle { erase: true, ..style };
        stroke_segment(&mut buf, (10.0, 10.0), (10.0, 10.0), &eraser);
        assert_eq!(buf.get_pixel(10, 10), Some(TRANSPARENT));
        assert_eq!(buf.get_pixel(3, 10), Some([255, 0, 0, 255]));
    }

    #[test]
    fn strokes_outside_the_buffer_are_ignored() {
        let mut buf = PixelBuffer::new(5, 5).unwrap();
        stroke_segment(&mut buf, (-50.0, -50.0), (-40.0, -40.0), &StrokeStyle::default());
        assert!(buf.as_raw().iter().all(|&b| b == 0));
    }
}
