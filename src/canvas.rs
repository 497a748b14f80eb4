use std::fmt;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use uuid::Uuid;

use crate::error::{CanvasError, CanvasResult};
use crate::ops::text::{FontService, TextSource};

/// Upper bound on width*height for any single buffer (~256 megapixels).
pub const MAX_BUFFER_PIXELS: u64 = 256_000_000;

/// Name of the layer `set_background` looks for (and creates when missing).
pub const BACKGROUND_LAYER_NAME: &str = "Background";

pub const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

// ============================================================================
// LAYER IDENTITY
// ============================================================================

/// Opaque, stable layer identity. Survives clone, resize and history restore;
/// only `LayerId::new` mints a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PIXEL BUFFER – contiguous row-major RGBA8 raster
// ============================================================================

/// Flat RGBA8 raster. `pixels.len() == width * height * 4` always holds.
///
/// There is no copy-on-write here: `clone()` copies every byte, so a retained
/// copy (history, clipboard, filter job) can never observe later edits.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Zero-initialised (fully transparent) buffer.
    pub fn new(width: u32, height: u32) -> CanvasResult<Self> {
        check_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![0; byte_len(width, height)],
        })
    }

    pub fn new_filled(width: u32, height: u32, color: [u8; 4]) -> CanvasResult<Self> {
        let mut buf = Self::new(width, height)?;
        buf.fill(color);
        Ok(buf)
    }

    /// Wrap an existing RGBA8 byte vector.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> CanvasResult<Self> {
        check_dimensions(width, height)?;
        if pixels.len() != byte_len(width, height) {
            return Err(CanvasError::InvalidFormat(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                byte_len(width, height),
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn from_rgba_image(img: &RgbaImage) -> CanvasResult<Self> {
        Self::from_raw(img.width(), img.height(), img.as_raw().clone())
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        // Length invariant guarantees from_raw succeeds.
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// `None` when (x, y) lies outside the buffer.
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let o = self.offset(x, y);
        Some([self.pixels[o], self.pixels[o + 1], self.pixels[o + 2], self.pixels[o + 3]])
    }

    /// Out-of-bounds writes are ignored and report `false`.
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let o = self.offset(x, y);
        self.pixels[o..o + 4].copy_from_slice(&px);
        true
    }

    /// Reallocate to the new size. Old content is discarded, never resampled;
    /// callers that need it blit a retained copy back in.
    pub fn resize(&mut self, width: u32, height: u32) -> CanvasResult<()> {
        check_dimensions(width, height)?;
        self.width = width;
        self.height = height;
        self.pixels = vec![0; byte_len(width, height)];
        Ok(())
    }

    pub fn fill(&mut self, color: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Copy `src` into this buffer with its top-left at (dst_x, dst_y),
    /// clipping at the edges. Pixels are replaced, not blended.
    pub fn blit(&mut self, src: &PixelBuffer, dst_x: i32, dst_y: i32) {
        // i64 so extreme offsets cannot overflow
        let (dx, dy) = (dst_x as i64, dst_y as i64);
        let x0 = dx.max(0);
        let y0 = dy.max(0);
        let x1 = (dx + src.width as i64).min(self.width as i64);
        let y1 = (dy + src.height as i64).min(self.height as i64);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let run = (x1 - x0) as usize * 4;
        for y in y0..y1 {
            let sy = (y - dy) as u32;
            let sx = (x0 - dx) as u32;
            let s = src.offset(sx, sy);
            let d = self.offset(x0 as u32, y as u32);
            self.pixels[d..d + run].copy_from_slice(&src.pixels[s..s + run]);
        }
    }
}

impl Clone for PixelBuffer {
    fn clone(&self) -> Self {
        let PixelBuffer { width, height, pixels } = self;
        Self {
            width: *width,
            height: *height,
            pixels: pixels.clone(),
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl PartialEq for PixelBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.pixels == other.pixels
    }
}

fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

pub fn check_dimensions(width: u32, height: u32) -> CanvasResult<()> {
    if width == 0 || height == 0 || (width as u64) * (height as u64) > MAX_BUFFER_PIXELS {
        return Err(CanvasError::InvalidDimensions { width, height });
    }
    Ok(())
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Xor,
    Overwrite,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Xor,
            BlendMode::Overwrite,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Additive => "additive",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Xor => "xor",
            BlendMode::Overwrite => "overwrite",
        }
    }

    /// Parse a blend mode name. Canvas composite-operation spellings
    /// (`source-over`, `lighter`, `copy`) are accepted as aliases.
    /// Unknown names are an error, never a silent fallback to Normal.
    pub fn from_name(name: &str) -> CanvasResult<Self> {
        let key = name.trim().to_ascii_lowercase().replace('_', "-");
        let mode = match key.as_str() {
            "normal" | "source-over" => BlendMode::Normal,
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "additive" | "lighter" => BlendMode::Additive,
            "overlay" => BlendMode::Overlay,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "color-dodge" => BlendMode::ColorDodge,
            "color-burn" => BlendMode::ColorBurn,
            "hard-light" => BlendMode::HardLight,
            "soft-light" => BlendMode::SoftLight,
            "difference" => BlendMode::Difference,
            "exclusion" => BlendMode::Exclusion,
            "xor" => BlendMode::Xor,
            "overwrite" | "copy" => BlendMode::Overwrite,
            _ => return Err(CanvasError::UnsupportedBlendMode(name.to_string())),
        };
        Ok(mode)
    }

    /// Stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Additive => 3,
            BlendMode::Overlay => 4,
            BlendMode::Darken => 5,
            BlendMode::Lighten => 6,
            BlendMode::ColorDodge => 7,
            BlendMode::ColorBurn => 8,
            BlendMode::HardLight => 9,
            BlendMode::SoftLight => 10,
            BlendMode::Difference => 11,
            BlendMode::Exclusion => 12,
            BlendMode::Xor => 13,
            BlendMode::Overwrite => 14,
        }
    }

    pub fn from_u8(v: u8) -> CanvasResult<Self> {
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.to_u8() == v)
            .ok_or_else(|| CanvasError::UnsupportedBlendMode(format!("code {}", v)))
    }
}

/// Composite `top` over `base` with the given operator and opacity (0..=1).
/// Straight (non-premultiplied) alpha in and out.
pub fn blend_pixel(base: [u8; 4], top: [u8; 4], mode: BlendMode, opacity: f32) -> [u8; 4] {
    // Fast path: fully transparent top pixel, nothing to blend
    if top[3] == 0 && mode != BlendMode::Overwrite {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;

    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    match mode {
        BlendMode::Overwrite => {
            return [top[0], top[1], top[2], unit_to_u8(top_a)];
        }
        BlendMode::Xor => {
            let xor_a = base_a * (1.0 - top_a) + top_a * (1.0 - base_a);
            if xor_a == 0.0 {
                return TRANSPARENT;
            }
            let mix = |b: f32, t: f32| (b * base_a * (1.0 - top_a) + t * top_a * (1.0 - base_a)) / xor_a;
            return [
                unit_to_u8(mix(base_r, top_r)),
                unit_to_u8(mix(base_g, top_g)),
                unit_to_u8(mix(base_b, top_b)),
                unit_to_u8(xor_a),
            ];
        }
        _ => {}
    }

    let channel = |b: f32, t: f32| -> f32 {
        match mode {
            BlendMode::Normal => t,
            BlendMode::Multiply => b * t,
            BlendMode::Screen => 1.0 - (1.0 - b) * (1.0 - t),
            BlendMode::Additive => (b + t).min(1.0),
            BlendMode::Overlay => overlay_channel(b, t),
            BlendMode::Darken => b.min(t),
            BlendMode::Lighten => b.max(t),
            BlendMode::ColorDodge => {
                if t >= 1.0 { 1.0 } else { (b / (1.0 - t)).min(1.0) }
            }
            BlendMode::ColorBurn => {
                if t <= 0.0 { 0.0 } else { (1.0 - (1.0 - b) / t).max(0.0) }
            }
            BlendMode::HardLight => overlay_channel(t, b),
            BlendMode::SoftLight => soft_light_channel(b, t),
            BlendMode::Difference => (b - t).abs(),
            BlendMode::Exclusion => b + t - 2.0 * b * t,
            BlendMode::Xor | BlendMode::Overwrite => t,
        }
    };

    // Separable modes only apply where the backdrop has coverage.
    let r = channel(base_r, top_r) * base_a + top_r * (1.0 - base_a);
    let g = channel(base_g, top_g) * base_a + top_g * (1.0 - base_a);
    let b = channel(base_b, top_b) * base_a + top_b * (1.0 - base_a);

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return TRANSPARENT;
    }

    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    [unit_to_u8(out_r), unit_to_u8(out_g), unit_to_u8(out_b), unit_to_u8(out_a)]
}

#[inline]
fn unit_to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Raster,
    Text,
    Image,
    Empty,
    Fill,
}

impl LayerKind {
    pub fn to_u8(&self) -> u8 {
        match self {
            LayerKind::Raster => 0,
            LayerKind::Text => 1,
            LayerKind::Image => 2,
            LayerKind::Empty => 3,
            LayerKind::Fill => 4,
        }
    }

    pub fn from_u8(v: u8) -> CanvasResult<Self> {
        Ok(match v {
            0 => LayerKind::Raster,
            1 => LayerKind::Text,
            2 => LayerKind::Image,
            3 => LayerKind::Empty,
            4 => LayerKind::Fill,
            _ => return Err(CanvasError::InvalidFormat(format!("unknown layer kind {}", v))),
        })
    }
}

/// Placement of a layer's buffer in canvas space. Rotation (degrees) and
/// scale pivot on the buffer centre; negative scale mirrors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, rotation: 0.0, scale_x: 1.0, scale_y: 1.0 }
    }
}

pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    /// 0..=100
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub transform: Transform,
    pub pixels: PixelBuffer,
    /// Present only for `LayerKind::Text`; `pixels` is always its render.
    pub text_source: Option<TextSource>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind, width: u32, height: u32) -> CanvasResult<Self> {
        Ok(Self {
            id: LayerId::new(),
            name: name.into(),
            kind,
            visible: true,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            transform: Transform::default(),
            pixels: PixelBuffer::new(width, height)?,
            text_source: None,
        })
    }

    pub fn with_pixels(name: impl Into<String>, kind: LayerKind, pixels: PixelBuffer) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            kind,
            visible: true,
            opacity: 100,
            blend_mode: BlendMode::Normal,
            transform: Transform::default(),
            pixels,
            text_source: None,
        }
    }

    /// Build a text layer whose buffer is the render of `source`.
    pub fn new_text(name: impl Into<String>, source: TextSource, fonts: &dyn FontService) -> CanvasResult<Self> {
        let pixels = crate::ops::text::render_text(&source, fonts)?;
        let mut layer = Self::with_pixels(name, LayerKind::Text, pixels);
        layer.text_source = Some(source);
        Ok(layer)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_opacity(&mut self, opacity: u8) {
        self.opacity = opacity.min(100);
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend_mode = mode;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Replace the text description and immediately re-render the buffer.
    /// The buffer is resized to the new glyph bounds.
    pub fn set_text_source(&mut self, source: TextSource, fonts: &dyn FontService) -> CanvasResult<()> {
        let pixels = crate::ops::text::render_text(&source, fonts)?;
        self.pixels = pixels;
        self.text_source = Some(source);
        self.kind = LayerKind::Text;
        Ok(())
    }

    /// Re-render from the stored text source (no-op for non-text layers).
    pub fn render_text(&mut self, fonts: &dyn FontService) -> CanvasResult<()> {
        if let Some(source) = &self.text_source {
            self.pixels = crate::ops::text::render_text(source, fonts)?;
        }
        Ok(())
    }

    pub fn opacity_factor(&self) -> f32 {
        self.opacity.min(100) as f32 / 100.0
    }
}

/// Field-by-field deep copy. Destructuring makes a newly added field a
/// compile error here until it is copied explicitly.
impl Clone for Layer {
    fn clone(&self) -> Self {
        let Layer {
            id,
            name,
            kind,
            visible,
            opacity,
            blend_mode,
            transform,
            pixels,
            text_source,
        } = self;
        Self {
            id: *id,
            name: name.clone(),
            kind: *kind,
            visible: *visible,
            opacity: *opacity,
            blend_mode: *blend_mode,
            transform: *transform,
            pixels: pixels.clone(),
            text_source: text_source.clone(),
        }
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("visible", &self.visible)
            .field("opacity", &self.opacity)
            .field("blend_mode", &self.blend_mode)
            .field("transform", &self.transform)
            .field("pixels", &self.pixels)
            .finish()
    }
}

// ============================================================================
// LAYER STACK – index 0 is the bottommost layer
// ============================================================================

/// Slots are `Arc`s so a render snapshot can share untouched layers with the
/// live stack (`share`); `get_mut` unshares only the layer being edited.
/// `clone` is always a deep copy.
#[derive(Debug, Default)]
pub struct LayerStack {
    layers: Vec<Arc<Layer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().map(|l| l.as_ref())
    }

    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    pub fn ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.iter().find(|l| l.id == id)
    }

    /// Unshares the slot first if a snapshot still holds it.
    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id).map(Arc::make_mut)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Layer> {
        self.iter().find(|l| l.name == name)
    }

    pub fn top(&self) -> Option<&Layer> {
        self.layers.last().map(|l| l.as_ref())
    }

    /// Append on top of the stack.
    pub fn push(&mut self, layer: Layer) -> CanvasResult<()> {
        let idx = self.layers.len();
        self.insert(idx, layer)
    }

    /// Insert at `index` (clamped to the stack length). Duplicate ids are rejected.
    pub fn insert(&mut self, index: usize, layer: Layer) -> CanvasResult<()> {
        if self.contains(layer.id) {
            return Err(CanvasError::InvalidParameter(format!(
                "layer {} is already in the stack",
                layer.id
            )));
        }
        let index = index.min(self.layers.len());
        self.layers.insert(index, Arc::new(layer));
        Ok(())
    }

    pub fn remove(&mut self, id: LayerId) -> Option<Layer> {
        let idx = self.index_of(id)?;
        Some(Arc::unwrap_or_clone(self.layers.remove(idx)))
    }

    /// Move a layer to `index` (clamped). Returns false for an unknown id.
    pub fn move_to(&mut self, id: LayerId, index: usize) -> bool {
        let Some(from) = self.index_of(id) else { return false };
        let layer = self.layers.remove(from);
        let to = index.min(self.layers.len());
        self.layers.insert(to, layer);
        true
    }

    /// Mutable access to every layer; unshares each one.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
        self.layers.iter_mut().map(Arc::make_mut)
    }

    /// Shallow copy: every slot points at the same layer as `self`.
    pub fn share(&self) -> Self {
        Self { layers: self.layers.clone() }
    }

    /// Whether `id`'s slot is the same allocation in both stacks.
    pub fn shares_layer(&self, other: &LayerStack, id: LayerId) -> bool {
        match (self.index_of(id), other.index_of(id)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&self.layers[a], &other.layers[b]),
            _ => false,
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(|l| l.pixels.memory_bytes()).sum()
    }
}

impl Clone for LayerStack {
    fn clone(&self) -> Self {
        Self {
            layers: self.layers.iter().map(|l| Arc::new(Layer::clone(l))).collect(),
        }
    }
}

/// Convert an `[u8; 4]` into the `image` crate pixel type.
pub fn to_rgba(px: [u8; 4]) -> Rgba<u8> {
    Rgba(px)
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional).
pub fn parse_hex_color(s: &str) -> CanvasResult<[u8; 4]> {
    let hex = s.trim().trim_start_matches('#');
    let bad = || CanvasError::InvalidParameter(format!("invalid color '{}'", s));
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(bad());
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
    match hex.len() {
        3 => {
            let nib = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).map(|v| v * 17).map_err(|_| bad());
            Ok([nib(0)?, nib(1)?, nib(2)?, 255])
        }
        6 => Ok([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Ok([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => Err(bad()),
    }
}

pub fn format_hex_color(c: [u8; 4]) -> String {
    if c[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2])
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", c[0], c[1], c[2], c[3])
    }
}
