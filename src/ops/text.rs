use std::fs;
use std::path::Path;

use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};

use crate::canvas::{blend_pixel, BlendMode, PixelBuffer};
use crate::error::{CanvasError, CanvasResult};
use crate::log_info;

/// Clear space around the glyph box on every side.
pub const TEXT_PADDING: f32 = 20.0;
/// Horizontal shear applied to synthesize italics.
const ITALIC_SHEAR: f32 = 0.2;
/// Longest accepted text content, in chars.
pub const MAX_TEXT_CHARS: usize = 4096;
pub const MAX_FONT_SIZE: f32 = 2048.0;

/// Text alignment options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextAlignment {
    #[default]
    Left,
    Center,
    Right,
}

impl TextAlignment {
    pub fn name(&self) -> &'static str {
        match self {
            TextAlignment::Left => "left",
            TextAlignment::Center => "center",
            TextAlignment::Right => "right",
        }
    }

    pub fn from_name(name: &str) -> CanvasResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(TextAlignment::Left),
            "center" | "centre" => Ok(TextAlignment::Center),
            "right" => Ok(TextAlignment::Right),
            other => Err(CanvasError::InvalidParameter(format!("unknown text alignment '{}'", other))),
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            TextAlignment::Left => 0,
            TextAlignment::Center => 1,
            TextAlignment::Right => 2,
        }
    }

    pub fn from_u8(v: u8) -> CanvasResult<Self> {
        match v {
            0 => Ok(TextAlignment::Left),
            1 => Ok(TextAlignment::Center),
            2 => Ok(TextAlignment::Right),
            _ => Err(CanvasError::InvalidFormat(format!("unknown text alignment {}", v))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStroke {
    pub color: [u8; 4],
    pub width: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextShadow {
    pub color: [u8; 4],
    pub offset_x: f32,
    pub offset_y: f32,
    pub blur: f32,
}

/// Structured description a text layer is rendered from.
#[derive(Clone, Debug, PartialEq)]
pub struct TextSource {
    pub content: String,
    pub font: String,
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub color: [u8; 4],
    pub stroke: Option<TextStroke>,
    pub shadow: Option<TextShadow>,
    pub align: TextAlignment,
}

impl TextSource {
    pub fn new(content: impl Into<String>, size: f32) -> Self {
        Self {
            content: content.into(),
            font: "Inter".to_string(),
            size,
            bold: false,
            italic: false,
            underline: false,
            color: [0, 0, 0, 255],
            stroke: None,
            shadow: None,
            align: TextAlignment::Left,
        }
    }

    fn face(&self) -> FontFace<'_> {
        FontFace {
            family: &self.font,
            size: self.size,
            bold: self.bold,
            italic: self.italic,
        }
    }

    /// Extra room beyond `TEXT_PADDING` for stroke and shadow.
    fn effect_margin(&self) -> f32 {
        let stroke = self.stroke.map_or(0.0, |s| s.width.max(0.0));
        let shadow = self
            .shadow
            .map_or(0.0, |s| s.offset_x.abs().max(s.offset_y.abs()) + s.blur.max(0.0));
        stroke + shadow
    }

    fn validate(&self) -> CanvasResult<()> {
        if !self.size.is_finite() || self.size <= 0.0 || self.size > MAX_FONT_SIZE {
            return Err(CanvasError::InvalidParameter(format!("font size {} out of range", self.size)));
        }
        if self.content.chars().count() > MAX_TEXT_CHARS {
            return Err(CanvasError::InvalidParameter(format!(
                "text longer than {} characters",
                MAX_TEXT_CHARS
            )));
        }
        let finite = |v: f32| v.is_finite();
        if let Some(s) = self.stroke
            && !finite(s.width)
        {
            return Err(CanvasError::InvalidParameter("stroke width is not finite".into()));
        }
        if let Some(s) = self.shadow
            && !(finite(s.offset_x) && finite(s.offset_y) && finite(s.blur))
        {
            return Err(CanvasError::InvalidParameter("shadow parameters are not finite".into()));
        }
        Ok(())
    }
}

/// Family + size + style flags handed to the font service.
#[derive(Clone, Copy, Debug)]
pub struct FontFace<'a> {
    pub family: &'a str,
    pub size: f32,
    pub bold: bool,
    pub italic: bool,
}

// ============================================================================
// COVERAGE MASK – single-channel f32 raster glyphs are drawn into
// ============================================================================

#[derive(Clone, Debug)]
pub struct CoverageMask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl CoverageMask {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0.0; width as usize * height as usize] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Max-combine `cov` at (x, y); out-of-range points are dropped.
    pub fn plot(&mut self, x: i32, y: i32, cov: f32) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = self.data[idx].max(cov.clamp(0.0, 1.0));
    }

    /// Fill the pixel-aligned rectangle covering [x0, x1) × [y0, y1).
    pub fn fill_rect(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let ix0 = x0.floor().max(0.0) as i32;
        let iy0 = y0.floor().max(0.0) as i32;
        let ix1 = (x1.ceil() as i32).min(self.width as i32);
        let iy1 = (y1.ceil() as i32).min(self.height as i32);
        for y in iy0..iy1 {
            for x in ix0..ix1 {
                self.plot(x, y, 1.0);
            }
        }
    }

    fn union(&mut self, other: &CoverageMask) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a = a.max(*b);
        }
    }

    /// Square max-filter of the given radius (separable).
    fn dilate(&self, radius: u32) -> CoverageMask {
        if radius == 0 {
            return self.clone();
        }
        let r = radius as i32;
        let (w, h) = (self.width as i32, self.height as i32);
        let mut tmp = CoverageMask::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut m = 0.0f32;
                for dx in -r..=r {
                    let sx = x + dx;
                    if sx >= 0 && sx < w {
                        m = m.max(self.data[(y * w + sx) as usize]);
                    }
                }
                tmp.data[(y * w + x) as usize] = m;
            }
        }
        let mut out = CoverageMask::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut m = 0.0f32;
                for dy in -r..=r {
                    let sy = y + dy;
                    if sy >= 0 && sy < h {
                        m = m.max(tmp.data[(sy * w + x) as usize]);
                    }
                }
                out.data[(y * w + x) as usize] = m;
            }
        }
        out
    }

    /// Separable box blur of the given radius.
    fn box_blur(&self, radius: u32) -> CoverageMask {
        if radius == 0 {
            return self.clone();
        }
        let r = radius as i32;
        let n = (2 * r + 1) as f32;
        let (w, h) = (self.width as i32, self.height as i32);
        let mut tmp = CoverageMask::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut s = 0.0f32;
                for dx in -r..=r {
                    let sx = x + dx;
                    if sx >= 0 && sx < w {
                        s += self.data[(y * w + sx) as usize];
                    }
                }
                tmp.data[(y * w + x) as usize] = s / n;
            }
        }
        let mut out = CoverageMask::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut s = 0.0f32;
                for dy in -r..=r {
                    let sy = y + dy;
                    if sy >= 0 && sy < h {
                        s += tmp.data[(sy * w + x) as usize];
                    }
                }
                out.data[(y * w + x) as usize] = s / n;
            }
        }
        out
    }

    fn shifted(&self, dx: i32, dy: i32) -> CoverageMask {
        let mut out = CoverageMask::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let v = self.data[(y * self.width as i32 + x) as usize];
                if v > 0.0 {
                    out.plot(x + dx, y + dy, v);
                }
            }
        }
        out
    }

    /// Composite `color` through this mask onto `dst` (normal blend).
    fn paint_onto(&self, dst: &mut PixelBuffer, color: [u8; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                let cov = self.get(x, y);
                if cov <= 0.001 {
                    continue;
                }
                let src = [color[0], color[1], color[2], (color[3] as f32 * cov).round().min(255.0) as u8];
                if let Some(base) = dst.get_pixel(x, y) {
                    dst.set_pixel(x, y, blend_pixel(base, src, BlendMode::Normal, 1.0));
                }
            }
        }
    }
}

// ============================================================================
// FONT SERVICE – measurement and glyph drawing are delegated
// ============================================================================

/// External text measurement/drawing. Implementations must be deterministic.
pub trait FontService: Send + Sync {
    /// Advance width of `text` in pixels.
    fn measure(&self, text: &str, face: &FontFace<'_>) -> CanvasResult<f32>;

    /// Draw glyph coverage for `text` starting at `left_x`, vertically
    /// centred on `middle_y`.
    fn draw(&self, text: &str, face: &FontFace<'_>, left_x: f32, middle_y: f32, mask: &mut CoverageMask) -> CanvasResult<()>;
}

/// Font files loaded through ab_glyph, keyed by family name (file stem).
/// Unknown families fall back to the first registered font.
#[derive(Default)]
pub struct AbGlyphFonts {
    fonts: Vec<(String, FontArc)>,
}

impl AbGlyphFonts {
    pub fn new() -> Self {
        Self { fonts: Vec::new() }
    }

    /// Register every readable font in `paths`; failures are logged and skipped.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut fonts = Self::new();
        for p in paths {
            if let Err(e) = fonts.load_file(p.as_ref()) {
                crate::log_warn!("Fonts: skipping {}: {}", p.as_ref().display(), e);
            }
        }
        fonts
    }

    pub fn load_file(&mut self, path: &Path) -> CanvasResult<String> {
        let data = fs::read(path)?;
        let family = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "font".to_string());
        self.add_font(family.clone(), data)?;
        log_info!("Fonts: loaded '{}' from {}", family, path.display());
        Ok(family)
    }

    pub fn add_font(&mut self, family: impl Into<String>, data: Vec<u8>) -> CanvasResult<()> {
        let font = FontArc::try_from_vec(data).map_err(|e| CanvasError::Font(e.to_string()))?;
        self.fonts.push((family.into(), font));
        Ok(())
    }

    pub fn families(&self) -> Vec<&str> {
        self.fonts.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    fn resolve(&self, family: &str) -> CanvasResult<&FontArc> {
        self.fonts
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(family))
            .or_else(|| self.fonts.first())
            .map(|(_, f)| f)
            .ok_or_else(|| CanvasError::Font("no fonts loaded".into()))
    }
}

/// Lay out a single line, returning (glyph, x) pairs and the total advance.
fn layout_line(font: &FontArc, text: &str, size: f32) -> (Vec<(GlyphId, f32)>, f32) {
    let scaled = font.as_scaled(size);
    let mut glyphs = Vec::with_capacity(text.len());
    let mut cursor_x = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            cursor_x += scaled.kern(prev, id);
        }
        glyphs.push((id, cursor_x));
        cursor_x += scaled.h_advance(id);
        last = Some(id);
    }
    (glyphs, cursor_x)
}

impl FontService for AbGlyphFonts {
    fn measure(&self, text: &str, face: &FontFace<'_>) -> CanvasResult<f32> {
        let font = self.resolve(face.family)?;
        let (_, width) = layout_line(font, text, face.size);
        // Bold is synthesized by smearing one pixel right
        Ok(width + if face.bold { 1.0 } else { 0.0 })
    }

    fn draw(&self, text: &str, face: &FontFace<'_>, left_x: f32, middle_y: f32, mask: &mut CoverageMask) -> CanvasResult<()> {
        let font = self.resolve(face.family)?;
        let scaled = font.as_scaled(face.size);
        // descent is negative
        let baseline = middle_y + (scaled.ascent() + scaled.descent()) * 0.5;
        let (glyphs, _) = layout_line(font, text, face.size);

        for (id, gx) in glyphs {
            let glyph = id.with_scale_and_position(face.size, point(left_x + gx, baseline));
            let Some(outlined) = font.outline_glyph(glyph) else { continue };
            let b = outlined.px_bounds();
            outlined.draw(|px, py, cov| {
                let mut cx = b.min.x + px as f32;
                let cy = b.min.y + py as f32;
                if face.italic {
                    cx += (baseline - cy) * ITALIC_SHEAR;
                }
                let ix = cx.round() as i32;
                let iy = cy.round() as i32;
                mask.plot(ix, iy, cov);
                if face.bold {
                    mask.plot(ix + 1, iy, cov);
                }
            });
        }
        Ok(())
    }
}

/// Deterministic font with fixed-width block glyphs: every non-whitespace
/// char is a solid box. Needs no font files.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockFont;

impl BlockFont {
    /// 0.6 × size, computed exactly for integral sizes.
    fn advance(size: f32) -> f32 {
        size * 3.0 / 5.0
    }

    fn half_height(size: f32) -> f32 {
        size * 0.35
    }
}

impl FontService for BlockFont {
    fn measure(&self, text: &str, face: &FontFace<'_>) -> CanvasResult<f32> {
        let w = text.chars().count() as f32 * Self::advance(face.size);
        Ok(w + if face.bold { 1.0 } else { 0.0 })
    }

    fn draw(&self, text: &str, face: &FontFace<'_>, left_x: f32, middle_y: f32, mask: &mut CoverageMask) -> CanvasResult<()> {
        let adv = Self::advance(face.size);
        let half = Self::half_height(face.size);
        let extra = if face.bold { 1.0 } else { 0.0 };
        for (i, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let x0 = left_x + i as f32 * adv + adv * 0.1;
            let x1 = left_x + (i + 1) as f32 * adv - adv * 0.1 + extra;
            if face.italic {
                let y0 = (middle_y - half).floor() as i32;
                let y1 = (middle_y + half).ceil() as i32;
                for y in y0..y1 {
                    let shift = (middle_y - y as f32) * ITALIC_SHEAR;
                    mask.fill_rect(x0 + shift, y as f32, x1 + shift, y as f32 + 1.0);
                }
            } else {
                mask.fill_rect(x0, middle_y - half, x1, middle_y + half);
            }
        }
        Ok(())
    }
}

// ============================================================================
// RENDER
// ============================================================================

/// Line box height, 1.2 × size.
pub fn line_height(size: f32) -> f32 {
    size * 6.0 / 5.0
}

/// Buffer dimensions `render_text` will produce for `source`.
pub fn text_extent(source: &TextSource, fonts: &dyn FontService) -> CanvasResult<(u32, u32, f32)> {
    source.validate()?;
    let text_w = fonts.measure(&source.content, &source.face())?.max(0.0);
    let pad = TEXT_PADDING + source.effect_margin();
    let w = (text_w + pad * 2.0).ceil().max(1.0) as u32;
    let h = (line_height(source.size) + pad * 2.0).ceil().max(1.0) as u32;
    Ok((w, h, text_w))
}

/// Render `source` into a fresh buffer sized to the padded glyph box.
/// Draw order, bottom to top: shadow, stroke, fill, underline.
pub fn render_text(source: &TextSource, fonts: &dyn FontService) -> CanvasResult<PixelBuffer> {
    let (w, h, text_w) = text_extent(source, fonts)?;
    let mut out = PixelBuffer::new(w, h)?;
    let pad = TEXT_PADDING + source.effect_margin();

    let left_x = match source.align {
        TextAlignment::Left => pad,
        TextAlignment::Center => (w as f32 - text_w) * 0.5,
        TextAlignment::Right => w as f32 - pad - text_w,
    };
    let middle_y = h as f32 * 0.5;

    let mut fill = CoverageMask::new(w, h);
    fonts.draw(&source.content, &source.face(), left_x, middle_y, &mut fill)?;

    let mut underline = CoverageMask::new(w, h);
    if source.underline && text_w > 0.1 {
        let thickness = (source.size * 0.06).max(1.0);
        let line_y = middle_y + source.size * 0.45;
        underline.fill_rect(left_x, line_y - thickness * 0.5, left_x + text_w, line_y + thickness * 0.5);
    }

    let mut body = fill.clone();
    body.union(&underline);

    let stroke_mask = source
        .stroke
        .filter(|s| s.width > 0.0)
        .map(|s| (body.dilate(s.width.round().max(1.0) as u32), s.color));

    if let Some(shadow) = source.shadow {
        let mut silhouette = body.clone();
        if let Some((m, _)) = &stroke_mask {
            silhouette.union(m);
        }
        let shadow_mask = silhouette
            .shifted(shadow.offset_x.round() as i32, shadow.offset_y.round() as i32)
            .box_blur(shadow.blur.max(0.0).round() as u32);
        shadow_mask.paint_onto(&mut out, shadow.color);
    }
    if let Some((m, color)) = &stroke_mask {
        m.paint_onto(&mut out, *color);
    }
    fill.paint_onto(&mut out, source.color);
    underline.paint_onto(&mut out, source.color);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extent_matches_padding_rule() {
        let src = TextSource::new("Hello", 40.0);
        let (w, h, text_w) = text_extent(&src, &BlockFont).unwrap();
        assert_eq!(text_w, 120.0);
        assert_eq!(w, 160);
        assert_eq!(h, 88);
    }

    #[test]
    fn render_is_deterministic() {
        let mut src = TextSource::new("Abc def", 32.0);
        src.underline = true;
        src.stroke = Some(TextStroke { color: [255, 0, 0, 255], width: 2.0 });
        src.shadow = Some(TextShadow { color: [0, 0, 0, 128], offset_x: 3.0, offset_y: 3.0, blur: 2.0 });
        let a = render_text(&src, &BlockFont).unwrap();
        let b = render_text(&src, &BlockFont).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stroke_and_shadow_grow_the_buffer() {
        let plain = TextSource::new("x", 20.0);
        let mut fancy = plain.clone();
        fancy.stroke = Some(TextStroke { color: [0, 0, 0, 255], width: 4.0 });
        fancy.shadow = Some(TextShadow { color: [0, 0, 0, 255], offset_x: -5.0, offset_y: 2.0, blur: 3.0 });
        let (pw, ph, _) = text_extent(&plain, &BlockFont).unwrap();
        let (fw, fh, _) = text_extent(&fancy, &BlockFont).unwrap();
        assert_eq!(fw, pw + 24);
        assert_eq!(fh, ph + 24);
    }

    #[test]
    fn fill_lands_in_the_middle_row() {
        let mut src = TextSource::new("W", 40.0);
        src.color = [10, 20, 30, 255];
        let buf = render_text(&src, &BlockFont).unwrap();
        let mid = buf.height() / 2;
        let x = (TEXT_PADDING + 40.0 * 0.3) as u32;
        assert_eq!(buf.get_pixel(x, mid), Some([10, 20, 30, 255]));
        assert_eq!(buf.get_pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn alignment_moves_glyphs_not_buffer() {
        let mut left = TextSource::new("ab", 30.0);
        let mut right = left.clone();
        right.align = TextAlignment::Right;
        let l = render_text(&left, &BlockFont).unwrap();
        let r = render_text(&right, &BlockFont).unwrap();
        assert_eq!((l.width(), l.height()), (r.width(), r.height()));
        left.align = TextAlignment::Center;
        let c = render_text(&left, &BlockFont).unwrap();
        assert_eq!(c.width(), l.width());
    }

    #[test]
    fn invalid_size_is_rejected() {
        assert!(render_text(&TextSource::new("a", 0.0), &BlockFont).is_err());
        assert!(render_text(&TextSource::new("a", f32::NAN), &BlockFont).is_err());
    }

    #[test]
    fn empty_font_registry_is_a_font_error() {
        let fonts = AbGlyphFonts::new();
        let err = render_text(&TextSource::new("a", 12.0), &fonts).unwrap_err();
        assert!(matches!(err, CanvasError::Font(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn larger_text_never_shrinks(content in "[ -~]{0,40}", size in 1.0f32..120.0, grow in 0.0f32..60.0) {
            let small = TextSource::new(content.clone(), size);
            let big = TextSource::new(content, size + grow);
            let (sw, sh, _) = text_extent(&small, &BlockFont).unwrap();
            let (bw, bh, _) = text_extent(&big, &BlockFont).unwrap();
            prop_assert!(bw >= sw && bh >= sh);
            let buf = render_text(&big, &BlockFont).unwrap();
            prop_assert_eq!((buf.width(), buf.height()), (bw, bh));
        }
    }
}
