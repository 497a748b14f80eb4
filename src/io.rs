use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::canvas::{BlendMode, Layer, LayerId, LayerKind, LayerStack, PixelBuffer, Transform};
use crate::error::{CanvasError, CanvasResult};
use crate::ops::text::{TextAlignment, TextShadow, TextSource, TextStroke};
use crate::{log_info, log_warn};

// ============================================================================
// BITMAP – decoded pixels handed across the collaborator boundary
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    /// No alpha channel; treated as fully opaque.
    Rgb8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> CanvasResult<Self> {
        crate::canvas::check_dimensions(width, height)?;
        let expected = width as usize * height as usize * format.channels();
        if pixels.len() != expected {
            return Err(CanvasError::InvalidFormat(format!(
                "bitmap {}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, format, pixels })
    }

    pub fn from_rgba_image(img: RgbaImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            format: PixelFormat::Rgba8,
            pixels: img.into_raw(),
        }
    }

    /// Expand to an RGBA buffer (RGB gains alpha 255).
    pub fn to_pixel_buffer(&self) -> CanvasResult<PixelBuffer> {
        match self.format {
            PixelFormat::Rgba8 => PixelBuffer::from_raw(self.width, self.height, self.pixels.clone()),
            PixelFormat::Rgb8 => {
                let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
                for px in self.pixels.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                PixelBuffer::from_raw(self.width, self.height, rgba)
            }
        }
    }
}

/// Decode any supported encoded image (PNG, JPEG) into RGBA.
pub fn decode_bitmap(bytes: &[u8]) -> CanvasResult<Bitmap> {
    let img = image::load_from_memory(bytes)?;
    let bitmap = Bitmap::from_rgba_image(img.to_rgba8());
    crate::canvas::check_dimensions(bitmap.width, bitmap.height)?;
    Ok(bitmap)
}

pub fn load_bitmap(path: &Path) -> CanvasResult<Bitmap> {
    let bytes = std::fs::read(path)?;
    decode_bitmap(&bytes)
}

// ============================================================================
// ASYNC DECODE – submit bytes, poll decoded events
// ============================================================================

/// Completion event for one submitted decode.
#[derive(Debug)]
pub struct DecodedBitmap {
    pub tag: u64,
    pub result: CanvasResult<Bitmap>,
}

/// Two-phase decode: `submit` returns immediately, `poll` / `wait_all`
/// hand back results. Decoding runs on the global rayon pool.
pub struct DecodeQueue {
    sender: mpsc::Sender<DecodedBitmap>,
    receiver: mpsc::Receiver<DecodedBitmap>,
    pending: usize,
}

impl Default for DecodeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver, pending: 0 }
    }

    pub fn submit(&mut self, tag: u64, bytes: Vec<u8>) {
        self.pending += 1;
        let sender = self.sender.clone();
        rayon::spawn(move || {
            let result = decode_bitmap(&bytes);
            if let Err(e) = &result {
                log_warn!("Decode {} failed: {}", tag, e);
            }
            let _ = sender.send(DecodedBitmap { tag, result });
        });
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn poll(&mut self) -> Vec<DecodedBitmap> {
        let mut done = Vec::new();
        while let Ok(ev) = self.receiver.try_recv() {
            done.push(ev);
        }
        self.pending = self.pending.saturating_sub(done.len());
        done
    }

    pub fn wait_all(&mut self) -> Vec<DecodedBitmap> {
        let mut done = Vec::new();
        while self.pending > 0 {
            match self.receiver.recv() {
                Ok(ev) => {
                    self.pending -= 1;
                    done.push(ev);
                }
                Err(_) => break,
            }
        }
        done
    }
}

// ============================================================================
// EXPORT
// ============================================================================

/// PNG-encode an RGBA buffer.
pub fn encode_png(buffer: &PixelBuffer) -> CanvasResult<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        buffer.as_raw(),
        buffer.width(),
        buffer.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(bytes)
}

/// Downscale so the longer edge is at most `max_edge`, drop alpha, and
/// JPEG-encode at `quality` (1..=100).
pub fn encode_jpeg_preview(buffer: &PixelBuffer, max_edge: u32, quality: u8) -> CanvasResult<Vec<u8>> {
    let mut img = buffer.to_rgba_image();
    let (w, h) = (img.width(), img.height());
    let longest = w.max(h);
    if max_edge > 0 && longest > max_edge {
        let scale = max_edge as f32 / longest as f32;
        let nw = ((w as f32 * scale).round() as u32).max(1);
        let nh = ((h as f32 * scale).round() as u32).max(1);
        img = image::imageops::resize(&img, nw, nh, FilterType::Triangle);
    }
    let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
    Ok(bytes)
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> CanvasResult<()> {
    std::fs::write(path, bytes)?;
    log_info!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

// ============================================================================
// LFE PROJECT FILE FORMAT
// ============================================================================

const LFE_MAGIC_V1: &str = "LFE1";

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted project files.
const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    active_layer: Option<u128>,
    layers: Vec<LayerDataV1>,
}

#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    id: u128,
    name: String,
    kind: u8,
    visible: bool,
    opacity: u8,
    blend_mode: u8,
    x: f32,
    y: f32,
    rotation: f32,
    scale_x: f32,
    scale_y: f32,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    text: Option<TextDataV1>,
}

#[derive(Serialize, Deserialize)]
struct TextDataV1 {
    content: String,
    font: String,
    size: f32,
    bold: bool,
    italic: bool,
    underline: bool,
    color: [u8; 4],
    stroke: Option<([u8; 4], f32)>,
    shadow: Option<([u8; 4], f32, f32, f32)>,
    align: u8,
}

/// Everything a saved project restores.
#[derive(Clone, Debug)]
pub struct ProjectDocument {
    pub width: u32,
    pub height: u32,
    pub layers: LayerStack,
    pub active_layer: Option<LayerId>,
}

fn text_to_data(t: &TextSource) -> TextDataV1 {
    TextDataV1 {
        content: t.content.clone(),
        font: t.font.clone(),
        size: t.size,
        bold: t.bold,
        italic: t.italic,
        underline: t.underline,
        color: t.color,
        stroke: t.stroke.map(|s| (s.color, s.width)),
        shadow: t.shadow.map(|s| (s.color, s.offset_x, s.offset_y, s.blur)),
        align: t.align.to_u8(),
    }
}

fn text_from_data(d: TextDataV1) -> CanvasResult<TextSource> {
    Ok(TextSource {
        content: d.content,
        font: d.font,
        size: d.size,
        bold: d.bold,
        italic: d.italic,
        underline: d.underline,
        color: d.color,
        stroke: d.stroke.map(|(color, width)| TextStroke { color, width }),
        shadow: d.shadow.map(|(color, offset_x, offset_y, blur)| TextShadow { color, offset_x, offset_y, blur }),
        align: TextAlignment::from_u8(d.align)?,
    })
}

pub fn project_to_bytes(doc: &ProjectDocument) -> CanvasResult<Vec<u8>> {
    let layers = doc
        .layers
        .iter()
        .map(|l| LayerDataV1 {
            id: l.id.as_u128(),
            name: l.name.clone(),
            kind: l.kind.to_u8(),
            visible: l.visible,
            opacity: l.opacity,
            blend_mode: l.blend_mode.to_u8(),
            x: l.transform.x,
            y: l.transform.y,
            rotation: l.transform.rotation,
            scale_x: l.transform.scale_x,
            scale_y: l.transform.scale_y,
            width: l.width(),
            height: l.height(),
            pixels: l.pixels.as_raw().to_vec(),
            text: l.text_source.as_ref().map(text_to_data),
        })
        .collect();
    let file = ProjectFileV1 {
        magic: LFE_MAGIC_V1.to_string(),
        width: doc.width,
        height: doc.height,
        active_layer: doc.active_layer.map(|id| id.as_u128()),
        layers,
    };
    Ok(bincode::serialize(&file)?)
}

pub fn project_from_bytes(raw: &[u8]) -> CanvasResult<ProjectDocument> {
    if raw.len() < 12 {
        return Err(CanvasError::InvalidFormat("File too small".into()));
    }
    // bincode writes an 8-byte length prefix before the 4-byte magic string
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != LFE_MAGIC_V1 {
        return Err(CanvasError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }
    let project: ProjectFileV1 = bincode::deserialize(raw)?;

    if project.width == 0 || project.height == 0 {
        return Err(CanvasError::InvalidFormat("Canvas dimensions cannot be zero".into()));
    }
    if project.width > MAX_CANVAS_DIM || project.height > MAX_CANVAS_DIM {
        return Err(CanvasError::InvalidFormat(format!(
            "Canvas size {}x{} exceeds maximum allowed {}x{}",
            project.width, project.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
        )));
    }
    if project.layers.len() > MAX_LAYERS {
        return Err(CanvasError::InvalidFormat(format!(
            "Project contains {} layers, which exceeds the maximum of {}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }

    let mut stack = LayerStack::new();
    for ld in project.layers {
        if ld.width > MAX_CANVAS_DIM || ld.height > MAX_CANVAS_DIM {
            return Err(CanvasError::InvalidFormat(format!(
                "Layer '{}' is {}x{}, over the per-axis limit",
                ld.name, ld.width, ld.height
            )));
        }
        let pixels = PixelBuffer::from_raw(ld.width, ld.height, ld.pixels)?;
        let layer = Layer {
            id: LayerId::from_u128(ld.id),
            name: ld.name,
            kind: LayerKind::from_u8(ld.kind)?,
            visible: ld.visible,
            opacity: ld.opacity.min(100),
            blend_mode: BlendMode::from_u8(ld.blend_mode)?,
            transform: Transform {
                x: ld.x,
                y: ld.y,
                rotation: ld.rotation,
                scale_x: ld.scale_x,
                scale_y: ld.scale_y,
            },
            pixels,
            text_source: ld.text.map(text_from_data).transpose()?,
        };
        stack
            .push(layer)
            .map_err(|e| CanvasError::InvalidFormat(e.to_string()))?;
    }

    let active_layer = project
        .active_layer
        .map(LayerId::from_u128)
        .filter(|id| stack.contains(*id));

    Ok(ProjectDocument {
        width: project.width,
        height: project.height,
        layers: stack,
        active_layer,
    })
}

/// Save a project as a .lfe file.
pub fn save_project(doc: &ProjectDocument, path: &Path) -> CanvasResult<()> {
    let bytes = project_to_bytes(doc)?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    std::io::Write::write_all(&mut writer, &bytes)?;
    log_info!("Saved project {} ({} layers)", path.display(), doc.layers.len());
    Ok(())
}

pub fn load_project(path: &Path) -> CanvasResult<ProjectDocument> {
    let raw = std::fs::read(path)?;
    let doc = project_from_bytes(&raw)?;
    log_info!("Loaded project {} ({}x{}, {} layers)", path.display(), doc.width, doc.height, doc.layers.len());
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::WHITE;

    fn sample_doc() -> ProjectDocument {
        let mut stack = LayerStack::new();
        let mut bg = Layer::new("Background", LayerKind::Fill, 4, 3).unwrap();
        bg.pixels.fill(WHITE);
        let mut text = Layer::new("Text", LayerKind::Text, 2, 2).unwrap();
        text.transform = Transform { x: 1.5, y: -2.0, rotation: 30.0, scale_x: -1.0, scale_y: 2.0 };
        text.blend_mode = BlendMode::Multiply;
        text.opacity = 40;
        let mut source = TextSource::new("hi", 12.0);
        source.shadow = Some(TextShadow { color: [1, 2, 3, 4], offset_x: 1.0, offset_y: 2.0, blur: 3.0 });
        text.text_source = Some(source);
        let active = text.id;
        stack.push(bg).unwrap();
        stack.push(text).unwrap();
        ProjectDocument { width: 4, height: 3, layers: stack, active_layer: Some(active) }
    }

    #[test]
    fn project_bytes_preserve_ids_and_fields() {
        let doc = sample_doc();
        let loaded = project_from_bytes(&project_to_bytes(&doc).unwrap()).unwrap();
        assert_eq!(loaded.layers.ids(), doc.layers.ids());
        assert_eq!(loaded.active_layer, doc.active_layer);
        let (a, b) = (&doc.layers.layers()[1], &loaded.layers.layers()[1]);
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.blend_mode, b.blend_mode);
        assert_eq!(a.opacity, b.opacity);
        assert_eq!(a.text_source, b.text_source);
        assert_eq!(doc.layers.layers()[0].pixels, loaded.layers.layers()[0].pixels);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = project_to_bytes(&sample_doc()).unwrap();
        bytes[8] = b'X';
        assert!(matches!(project_from_bytes(&bytes), Err(CanvasError::InvalidFormat(_))));
        assert!(project_from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn unknown_blend_code_is_not_substituted() {
        let doc = sample_doc();
        let mut file: ProjectFileV1 = bincode::deserialize(&project_to_bytes(&doc).unwrap()).unwrap();
        file.layers[1].blend_mode = 99;
        let bytes = bincode::serialize(&file).unwrap();
        assert!(matches!(project_from_bytes(&bytes), Err(CanvasError::UnsupportedBlendMode(_))));
    }

    #[test]
    fn project_file_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.lfe");
        save_project(&sample_doc(), &path).unwrap();
        let loaded = load_project(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (4, 3));
        assert_eq!(loaded.layers.len(), 2);
    }

    #[test]
    fn rgb_bitmap_gains_opaque_alpha() {
        let bmp = Bitmap::new(2, 1, PixelFormat::Rgb8, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let buf = bmp.to_pixel_buffer().unwrap();
        assert_eq!(buf.get_pixel(1, 0), Some([4, 5, 6, 255]));
        assert!(Bitmap::new(2, 1, PixelFormat::Rgb8, vec![0; 5]).is_err());
        assert!(Bitmap::new(0, 1, PixelFormat::Rgba8, vec![]).is_err());
    }

    #[test]
    fn png_export_decodes_back() {
        let mut buf = PixelBuffer::new(3, 2).unwrap();
        buf.set_pixel(2, 1, [10, 20, 30, 40]);
        let png = encode_png(&buf).unwrap();
        let bmp = decode_bitmap(&png).unwrap();
        assert_eq!(bmp.to_pixel_buffer().unwrap(), buf);
    }

    #[test]
    fn jpeg_preview_is_downscaled() {
        let buf = PixelBuffer::new_filled(200, 100, WHITE).unwrap();
        let jpg = encode_jpeg_preview(&buf, 50, 50).unwrap();
        let bmp = decode_bitmap(&jpg).unwrap();
        assert_eq!((bmp.width, bmp.height), (50, 25));
    }

    #[test]
    fn decode_queue_reports_each_tag() {
        let png = encode_png(&PixelBuffer::new_filled(2, 2, WHITE).unwrap()).unwrap();
        let mut q = DecodeQueue::new();
        q.submit(1, png);
        q.submit(2, b"not an image".to_vec());
        let mut done = q.wait_all();
        done.sort_by_key(|d| d.tag);
        assert_eq!(done.len(), 2);
        assert!(done[0].result.is_ok());
        assert!(done[1].result.is_err());
        assert_eq!(q.pending(), 0);
    }
}
