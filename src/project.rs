// ============================================================================
// CANVAS SESSION — the open document and its single mutation entry point
// ============================================================================
//
// The live layer stack sits behind an `Arc`, and so does each layer in it.
// A mutation swaps in a shallow copy of the stack and unshares only the
// layers it touches, so a render thread holding the previous `Arc` keeps
// reading a complete, unchanging stack.
// After each mutation the session publishes a fresh `SceneSnapshot` to its
// `FrameSource`.
// ============================================================================

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::canvas::{
    check_dimensions, BlendMode, Layer, LayerId, LayerKind, LayerStack, PixelBuffer, Transform,
    BACKGROUND_LAYER_NAME, WHITE,
};
use crate::components::history::HistoryManager;
use crate::compositor::{
    self, layer_to_canvas, Checker, RenderOptions, SelectionOutline, Viewport, MAX_ZOOM, MIN_ZOOM,
};
use crate::error::{CanvasError, CanvasResult};
use crate::io::{self, Bitmap, ProjectDocument};
use crate::ops::ai::{AspectRatio, CollaboratorError, GeneratedTarget, PreviewPurpose};
use crate::ops::canvas_ops::{self, BackgroundMode, LayerSource, Rect, StrokeStyle};
use crate::ops::engine::{FilterEngine, FilterRequest, FilterResponse};
use crate::ops::filters::{FilterKind, FilterParams};
use crate::ops::text::{self, FontService, TextSource};
use crate::settings::EngineSettings;
use crate::{log_info, log_warn};

// ============================================================================
// FRAME SOURCE – what the render context reads
// ============================================================================

/// Pointer interaction mode. Only `Move` shows the selection outline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interaction {
    Move,
    /// Any other tool; opaque to the engine.
    Other(String),
}

/// Immutable view of everything one frame needs.
#[derive(Clone, Debug)]
pub struct SceneSnapshot {
    pub layers: Arc<LayerStack>,
    pub width: u32,
    pub height: u32,
    pub view: Viewport,
    pub surface: (u32, u32),
    pub active_layer: Option<LayerId>,
    pub show_selection: bool,
    /// Bumped on every publish.
    pub version: u64,
}

/// Cloneable handle the render context keeps. Reads never block on a
/// mutation in progress, only on the pointer swap itself.
#[derive(Clone)]
pub struct FrameSource {
    current: Arc<RwLock<Arc<SceneSnapshot>>>,
    backdrop: [u8; 4],
    backing: [u8; 4],
    selection_color: [u8; 4],
}

impl FrameSource {
    fn new(initial: SceneSnapshot, settings: &EngineSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
            backdrop: settings.backdrop_color,
            backing: settings.canvas_backing_color,
            selection_color: settings.selection_color,
        }
    }

    fn publish(&self, snapshot: SceneSnapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }

    pub fn snapshot(&self) -> Arc<SceneSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn render_options(&self, scene: &SceneSnapshot) -> RenderOptions {
        let selection = match (scene.show_selection, scene.active_layer) {
            (true, Some(layer_id)) => Some(SelectionOutline { layer_id, color: self.selection_color }),
            _ => None,
        };
        RenderOptions {
            backdrop: self.backdrop,
            backing: Some(self.backing),
            checker: Some(Checker::default()),
            selection,
        }
    }

    /// Render the latest published scene at surface resolution.
    pub fn render(&self) -> CanvasResult<PixelBuffer> {
        let scene = self.snapshot();
        let options = self.render_options(&scene);
        compositor::render_frame(&scene.layers, (scene.width, scene.height), &scene.view, scene.surface, &options)
    }
}

// ============================================================================
// LAYER UPDATE – partial field replacement
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub visible: Option<bool>,
    /// Clamped to 0..=100.
    pub opacity: Option<u8>,
    pub blend_mode: Option<BlendMode>,
    pub transform: Option<Transform>,
    /// Triggers a re-render; the buffer takes the new glyph bounds.
    pub text_source: Option<TextSource>,
    /// Whole-buffer replacement; rasterizes a text layer.
    pub pixels: Option<PixelBuffer>,
}

impl LayerUpdate {
    pub fn position(x: f32, y: f32, current: Transform) -> Self {
        Self { transform: Some(Transform { x, y, ..current }), ..Default::default() }
    }

    pub fn opacity(opacity: u8) -> Self {
        Self { opacity: Some(opacity), ..Default::default() }
    }

    pub fn text(source: TextSource) -> Self {
        Self { text_source: Some(source), ..Default::default() }
    }
}

/// Drop the text description once the pixels stop being its render.
fn rasterize(layer: &mut Layer) {
    if layer.text_source.take().is_some() {
        layer.kind = LayerKind::Raster;
    }
}

// ============================================================================
// CANVAS SESSION
// ============================================================================

pub struct CanvasSession {
    width: u32,
    height: u32,
    layers: Arc<LayerStack>,
    active_layer: Option<LayerId>,
    view: Viewport,
    surface: (u32, u32),
    interaction: Interaction,
    history: HistoryManager,
    engine: FilterEngine,
    fonts: Arc<dyn FontService>,
    frames: FrameSource,
    version: u64,
    preview_max_edge: u32,
    /// Failed filter jobs since the last `take_filter_failures`.
    filter_failures: Vec<String>,
}

impl CanvasSession {
    /// Start a session with a new project at the configured default size.
    pub fn new(settings: &EngineSettings, fonts: Arc<dyn FontService>) -> CanvasResult<Self> {
        let surface = (settings.viewport_width, settings.viewport_height);
        let mut engine = FilterEngine::new(settings.filter_threads);
        engine.start()?;
        let frames = FrameSource::new(
            SceneSnapshot {
                layers: Arc::new(LayerStack::new()),
                width: 0,
                height: 0,
                view: Viewport::default(),
                surface,
                active_layer: None,
                show_selection: false,
                version: 0,
            },
            settings,
        );
        let mut session = Self {
            width: 0,
            height: 0,
            layers: Arc::new(LayerStack::new()),
            active_layer: None,
            view: Viewport::default(),
            surface,
            interaction: Interaction::Other(String::new()),
            history: HistoryManager::new(settings.max_history_steps),
            engine,
            fonts,
            frames,
            version: 0,
            preview_max_edge: settings.preview_max_edge,
            filter_failures: Vec::new(),
        };
        session.new_project(settings.default_width, settings.default_height)?;
        Ok(session)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.active_layer
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn viewport(&self) -> Viewport {
        self.view
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn pending_filters(&self) -> usize {
        self.engine.pending()
    }

    /// Drain the messages of filter jobs that failed since the last call.
    pub fn take_filter_failures(&mut self) -> Vec<String> {
        std::mem::take(&mut self.filter_failures)
    }

    pub fn fonts(&self) -> &dyn FontService {
        self.fonts.as_ref()
    }

    /// Handle for the render context.
    pub fn frame_source(&self) -> FrameSource {
        self.frames.clone()
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        AspectRatio::for_canvas(self.width, self.height)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Copy-on-write access to the live stack.
    fn stack_mut(&mut self) -> &mut LayerStack {
        if Arc::get_mut(&mut self.layers).is_none() {
            self.layers = Arc::new(self.layers.share());
        }
        Arc::make_mut(&mut self.layers)
    }

    fn layer_mut(&mut self, id: LayerId) -> CanvasResult<&mut Layer> {
        self.stack_mut().get_mut(id).ok_or(CanvasError::LayerNotFound(id))
    }

    fn publish(&mut self) {
        self.version += 1;
        self.frames.publish(SceneSnapshot {
            layers: Arc::clone(&self.layers),
            width: self.width,
            height: self.height,
            view: self.view,
            surface: self.surface,
            active_layer: self.active_layer,
            show_selection: self.interaction == Interaction::Move,
            version: self.version,
        });
    }

    /// Snapshot the current stack into history and publish.
    pub fn commit(&mut self, description: &str) {
        self.history.push_sized(&self.layers, (self.width, self.height), description);
        self.publish();
    }

    fn restore(&mut self, stack: LayerStack) {
        if let Some((w, h)) = self.history.current_canvas() {
            self.width = w;
            self.height = h;
        }
        if let Some(id) = self.active_layer
            && !stack.contains(id)
        {
            self.active_layer = None;
        }
        self.layers = Arc::new(stack);
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Project lifecycle
    // ------------------------------------------------------------------------

    /// Reset to a `width`×`height` canvas holding one white background.
    pub fn new_project(&mut self, width: u32, height: u32) -> CanvasResult<LayerId> {
        check_dimensions(width, height)?;
        let background = Layer::with_pixels(
            BACKGROUND_LAYER_NAME,
            LayerKind::Fill,
            PixelBuffer::new_filled(width, height, WHITE)?,
        );
        let id = background.id;
        let mut stack = LayerStack::new();
        stack.push(background)?;

        self.width = width;
        self.height = height;
        self.layers = Arc::new(stack);
        self.active_layer = Some(id);
        self.view = Viewport::fit(width, height, self.surface.0, self.surface.1);
        self.history.reset(&self.layers, (width, height), "New Project");
        self.publish();
        log_info!("New project {}x{}", width, height);
        Ok(id)
    }

    pub fn to_document(&self) -> ProjectDocument {
        ProjectDocument {
            width: self.width,
            height: self.height,
            layers: (*self.layers).clone(),
            active_layer: self.active_layer,
        }
    }

    pub fn save_project(&self, path: &Path) -> CanvasResult<()> {
        io::save_project(&self.to_document(), path)
    }

    /// Replace the session contents with a loaded document. History restarts.
    pub fn load_document(&mut self, doc: ProjectDocument) -> CanvasResult<()> {
        check_dimensions(doc.width, doc.height)?;
        self.width = doc.width;
        self.height = doc.height;
        self.active_layer = doc.active_layer.or_else(|| doc.layers.top().map(|l| l.id));
        self.layers = Arc::new(doc.layers);
        self.view = Viewport::fit(self.width, self.height, self.surface.0, self.surface.1);
        self.history.reset(&self.layers, (self.width, self.height), "Open Project");
        self.publish();
        Ok(())
    }

    pub fn open_project(&mut self, path: &Path) -> CanvasResult<()> {
        let doc = io::load_project(path)?;
        self.load_document(doc)
    }

    // ------------------------------------------------------------------------
    // Layer operations
    // ------------------------------------------------------------------------

    /// Append a layer built from `source`, make it active, commit.
    pub fn add_layer(&mut self, source: LayerSource) -> CanvasResult<LayerId> {
        let kind = source.kind();
        let layer = canvas_ops::build_layer(source, self.width, self.height, self.layers.len(), self.fonts.as_ref())?;
        let id = layer.id;
        let name = layer.name.clone();
        self.stack_mut().push(layer)?;
        self.active_layer = Some(id);
        self.commit(match kind {
            LayerKind::Image => "Add Image",
            LayerKind::Text => "Add Text",
            _ => "Add Layer",
        });
        log_info!("Added layer '{}' ({})", name, id);
        Ok(id)
    }

    /// Apply the set fields of `update`. `commit == false` is for live drag
    /// previews; the caller commits once at gesture end.
    pub fn update_layer(&mut self, id: LayerId, update: LayerUpdate, commit: bool) -> CanvasResult<()> {
        if !self.layers.contains(id) {
            return Err(CanvasError::LayerNotFound(id));
        }
        // Render before touching the layer so a font failure leaves it intact
        let rendered = match update.text_source {
            Some(source) => {
                let pixels = text::render_text(&source, self.fonts.as_ref())?;
                Some((source, pixels))
            }
            None => None,
        };

        let layer = self.layer_mut(id)?;
        if let Some(name) = update.name {
            layer.name = name;
        }
        if let Some(visible) = update.visible {
            layer.set_visible(visible);
        }
        if let Some(opacity) = update.opacity {
            layer.set_opacity(opacity);
        }
        if let Some(mode) = update.blend_mode {
            layer.set_blend_mode(mode);
        }
        if let Some(transform) = update.transform {
            layer.set_transform(transform);
        }
        if let Some(pixels) = update.pixels {
            layer.pixels = pixels;
            rasterize(layer);
        }
        if let Some((source, pixels)) = rendered {
            layer.pixels = pixels;
            layer.text_source = Some(source);
            layer.kind = LayerKind::Text;
        }

        if commit {
            self.commit("Update Layer");
        } else {
            self.publish();
        }
        Ok(())
    }

    pub fn remove_layer(&mut self, id: LayerId) -> CanvasResult<()> {
        let removed = self.stack_mut().remove(id).ok_or(CanvasError::LayerNotFound(id))?;
        if self.active_layer == Some(id) {
            self.active_layer = None;
        }
        self.commit("Delete Layer");
        log_info!("Removed layer '{}' ({})", removed.name, id);
        Ok(())
    }

    /// Copy a layer (fresh id, " Copy" suffix) directly above the source.
    pub fn duplicate_layer(&mut self, id: LayerId) -> CanvasResult<LayerId> {
        let index = self.layers.index_of(id).ok_or(CanvasError::LayerNotFound(id))?;
        let mut copy = Layer::clone(&self.layers.layers()[index]);
        copy.id = LayerId::new();
        copy.name = format!("{} Copy", copy.name);
        let new_id = copy.id;
        self.stack_mut().insert(index + 1, copy)?;
        self.active_layer = Some(new_id);
        self.commit("Duplicate Layer");
        Ok(new_id)
    }

    /// Move a layer to `index` (0 = bottom, clamped to the top).
    pub fn move_layer(&mut self, id: LayerId, index: usize) -> CanvasResult<()> {
        if self.layers.index_of(id) == Some(index.min(self.layers.len().saturating_sub(1))) {
            return Ok(());
        }
        if !self.stack_mut().move_to(id, index) {
            return Err(CanvasError::LayerNotFound(id));
        }
        self.commit("Move Layer");
        Ok(())
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> CanvasResult<()> {
        if !self.layers.contains(id) {
            return Err(CanvasError::LayerNotFound(id));
        }
        self.active_layer = Some(id);
        self.publish();
        Ok(())
    }

    pub fn clear_active_layer(&mut self) {
        self.active_layer = None;
        self.publish();
    }

    /// Paint a brush/eraser segment given in canvas coordinates. Pixels
    /// change in place; call `commit` at pointer release.
    pub fn stroke_segment(
        &mut self,
        id: LayerId,
        from: (f32, f32),
        to: (f32, f32),
        style: &StrokeStyle,
    ) -> CanvasResult<()> {
        let layer = self.layer_mut(id)?;
        let to_local = layer_to_canvas(layer)
            .invert()
            .ok_or_else(|| CanvasError::InvalidParameter("layer transform is not invertible".into()))?;
        let a = to_local.apply(from.0, from.1);
        let b = to_local.apply(to.0, to.1);
        canvas_ops::stroke_segment(&mut layer.pixels, a, b, style);
        rasterize(layer);
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------------

    /// Queue `kind` on a copy of the layer's pixels. The result lands on the
    /// next `poll_filters` / `wait_for_filters`.
    pub fn apply_filter(&mut self, id: LayerId, kind: FilterKind, params: FilterParams) -> CanvasResult<u64> {
        let layer = self.layers.get(id).ok_or(CanvasError::LayerNotFound(id))?;
        let request = FilterRequest { layer_id: id, buffer: layer.pixels.clone(), kind, params };
        let job = self.engine.submit(request)?;
        log_info!("Filter '{}' queued for layer {} (job {})", kind, id, job);
        Ok(job)
    }

    /// Apply finished filter jobs. Returns how many changed a layer.
    pub fn poll_filters(&mut self) -> usize {
        let done = self.engine.poll();
        self.complete_filters(done)
    }

    /// Block until every queued job has finished, then apply them.
    pub fn wait_for_filters(&mut self) -> usize {
        let done = self.engine.wait_all();
        self.complete_filters(done)
    }

    fn complete_filters(&mut self, responses: Vec<FilterResponse>) -> usize {
        let mut applied = 0;
        for response in responses {
            if !response.success {
                let message = format!(
                    "{}: {}",
                    response.kind,
                    response.error.as_deref().unwrap_or("unknown error")
                );
                log_warn!("Filter failed for layer {}: {}", response.layer_id, message);
                self.filter_failures.push(message);
                continue;
            }
            let Some(layer) = self.stack_mut().get_mut(response.layer_id) else {
                log_info!("Discarded '{}' result for deleted layer {}", response.kind, response.layer_id);
                continue;
            };
            layer.pixels = response.buffer;
            rasterize(layer);
            self.commit(&format!("{} Filter", response.kind));
            applied += 1;
        }
        applied
    }

    // ------------------------------------------------------------------------
    // Canvas operations
    // ------------------------------------------------------------------------

    pub fn set_background(&mut self, mode: BackgroundMode) -> CanvasResult<LayerId> {
        let (w, h) = (self.width, self.height);
        let id = canvas_ops::apply_background(self.stack_mut(), &mode, w, h)?;
        self.commit("Set Background");
        Ok(id)
    }

    /// Shrink the canvas to `region`, keeping every layer's visual position.
    pub fn crop(&mut self, region: Rect) -> CanvasResult<()> {
        canvas_ops::crop_translate(self.stack_mut(), region)?;
        self.width = region.width;
        self.height = region.height;
        self.commit("Crop");
        log_info!("Cropped canvas to {}x{}", region.width, region.height);
        Ok(())
    }

    /// Change canvas bounds; layer pixels are untouched.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> CanvasResult<()> {
        check_dimensions(width, height)?;
        self.width = width;
        self.height = height;
        self.commit("Resize Canvas");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Undo / Redo
    // ------------------------------------------------------------------------

    /// Returns false at the oldest entry.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(stack) => {
                self.restore(stack);
                true
            }
            None => false,
        }
    }

    /// Returns false at the newest entry.
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(stack) => {
                self.restore(stack);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------------

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.view.pan_x += dx;
        self.view.pan_y += dy;
        self.publish();
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.view.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
            self.publish();
        }
    }

    pub fn fit_to_view(&mut self) {
        self.view = Viewport::fit(self.width, self.height, self.surface.0, self.surface.1);
        self.publish();
    }

    pub fn set_surface_size(&mut self, width: u32, height: u32) -> CanvasResult<()> {
        check_dimensions(width, height)?;
        self.surface = (width, height);
        self.publish();
        Ok(())
    }

    pub fn device_to_canvas(&self, point: (f32, f32)) -> (f32, f32) {
        compositor::device_to_canvas(&self.view, (self.width, self.height), self.surface, point)
    }

    pub fn canvas_to_device(&self, point: (f32, f32)) -> (f32, f32) {
        compositor::canvas_to_device(&self.view, (self.width, self.height), self.surface, point)
    }

    pub fn set_interaction(&mut self, interaction: Interaction) {
        self.interaction = interaction;
        self.publish();
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    pub fn render(&self) -> CanvasResult<PixelBuffer> {
        self.frames.render()
    }

    /// Composite at canvas resolution over transparency.
    pub fn flatten(&self) -> CanvasResult<PixelBuffer> {
        compositor::flatten(&self.layers, self.width, self.height)
    }

    pub fn export_png(&self) -> CanvasResult<Vec<u8>> {
        io::encode_png(&self.flatten()?)
    }

    pub fn export_jpeg(&self, max_edge: u32, quality: u8) -> CanvasResult<Vec<u8>> {
        io::encode_jpeg_preview(&self.flatten()?, max_edge, quality)
    }

    /// Downscaled JPEG for the generative collaborator.
    pub fn export_preview(&self, purpose: PreviewPurpose) -> CanvasResult<Vec<u8>> {
        self.export_jpeg(self.preview_max_edge, purpose.jpeg_quality())
    }

    /// Land a collaborator result, or surface its failure unchanged.
    pub fn accept_generated(
        &mut self,
        result: Result<Bitmap, CollaboratorError>,
        target: GeneratedTarget,
    ) -> CanvasResult<LayerId> {
        let bitmap = result.map_err(|e| {
            log_warn!("Generation failed: {}", e);
            CanvasError::Collaborator(e)
        })?;
        match target {
            GeneratedTarget::Layer => self.add_layer(LayerSource::Image(bitmap)),
            GeneratedTarget::Background => self.set_background(BackgroundMode::Image(bitmap)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::text::BlockFont;

    fn session(w: u32, h: u32) -> CanvasSession {
        let settings = EngineSettings {
            default_width: w,
            default_height: h,
            viewport_width: 200,
            viewport_height: 100,
            ..Default::default()
        };
        CanvasSession::new(&settings, Arc::new(BlockFont)).unwrap()
    }

    #[test]
    fn stroke_copies_only_the_edited_layer() {
        let mut s = session(64, 64);
        let bg = s.layers().layers()[0].id;
        let top = s.add_layer(LayerSource::Empty).unwrap();
        let published = s.frame_source().snapshot().layers.clone();

        s.stroke_segment(top, (2.0, 2.0), (30.0, 30.0), &StrokeStyle::default()).unwrap();
        assert!(s.layers().shares_layer(&published, bg));
        assert!(!s.layers().shares_layer(&published, top));
        assert!(published.get(top).unwrap().pixels.as_raw().iter().all(|&b| b == 0));

        let moved = s.frame_source().snapshot().layers.clone();
        s.update_layer(top, LayerUpdate::position(5.0, 5.0, Transform::default()), false).unwrap();
        assert!(s.layers().shares_layer(&moved, bg));
    }

    #[test]
    fn new_project_fits_viewport_at_seventy_percent() {
        let s = session(100, 100);
        assert_eq!(s.viewport().zoom, 0.7);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.layers().len(), 1);
        assert_eq!(s.layers().layers()[0].name, BACKGROUND_LAYER_NAME);
    }

    #[test]
    fn frame_source_keeps_old_stack_while_session_mutates() {
        let mut s = session(4, 4);
        let frames = s.frame_source();
        let before = frames.snapshot();
        s.add_layer(LayerSource::Empty).unwrap();
        assert_eq!(before.layers.len(), 1);
        let after = frames.snapshot();
        assert_eq!(after.layers.len(), 2);
        assert!(after.version > before.version);
    }

    #[test]
    fn uncommitted_updates_do_not_grow_history() {
        let mut s = session(10, 10);
        let id = s.add_layer(LayerSource::Empty).unwrap();
        let len = s.history().len();
        for x in 0..5 {
            let t = s.layer(id).unwrap().transform;
            s.update_layer(id, LayerUpdate::position(x as f32, 0.0, t), false).unwrap();
        }
        assert_eq!(s.history().len(), len);
        s.commit("Move");
        assert_eq!(s.history().len(), len + 1);
    }

    #[test]
    fn text_update_rerenders_buffer() {
        let mut s = session(400, 200);
        let id = s.add_layer(LayerSource::Text(TextSource::new("Hi", 20.0))).unwrap();
        let small = s.layer(id).unwrap().width();
        s.update_layer(id, LayerUpdate::text(TextSource::new("Hi", 60.0)), true).unwrap();
        assert!(s.layer(id).unwrap().width() > small);
    }

    #[test]
    fn selection_only_in_move_mode() {
        let mut s = session(4, 4);
        assert!(!s.frame_source().snapshot().show_selection);
        s.set_interaction(Interaction::Move);
        assert!(s.frame_source().snapshot().show_selection);
        s.set_interaction(Interaction::Other("brush".into()));
        assert!(!s.frame_source().snapshot().show_selection);
    }

    #[test]
    fn strokes_land_in_layer_space_and_commit_once() {
        let mut s = session(20, 20);
        let id = s.add_layer(LayerSource::Raster(PixelBuffer::new(10, 10).unwrap())).unwrap();
        let t = s.layer(id).unwrap().transform;
        s.update_layer(id, LayerUpdate::position(10.0, 10.0, t), true).unwrap();
        let len = s.history().len();
        let style = StrokeStyle { color: [0, 255, 0, 255], size: 3.0, erase: false };
        s.stroke_segment(id, (12.0, 15.0), (18.0, 15.0), &style).unwrap();
        assert_eq!(s.layer(id).unwrap().pixels.get_pixel(4, 4), Some([0, 255, 0, 255]));
        assert_eq!(s.history().len(), len);
    }

    #[test]
    fn duplicate_gets_fresh_identity_above_source() {
        let mut s = session(4, 4);
        let id = s.add_layer(LayerSource::Fill([9, 9, 9, 255])).unwrap();
        let dup = s.duplicate_layer(id).unwrap();
        assert_ne!(dup, id);
        assert_eq!(s.layers().index_of(dup), Some(s.layers().index_of(id).unwrap() + 1));
        assert_eq!(s.layer(dup).unwrap().name, "Layer 2 Copy");
        assert_eq!(s.active_layer(), Some(dup));
    }

    #[test]
    fn stale_ids_are_caller_errors() {
        let mut s = session(4, 4);
        let ghost = LayerId::new();
        assert!(matches!(s.remove_layer(ghost), Err(CanvasError::LayerNotFound(_))));
        assert!(matches!(s.set_active_layer(ghost), Err(CanvasError::LayerNotFound(_))));
        assert!(matches!(
            s.apply_filter(ghost, FilterKind::Invert, FilterParams::default()),
            Err(CanvasError::LayerNotFound(_))
        ));
        assert!(matches!(
            s.update_layer(ghost, LayerUpdate::opacity(5), true),
            Err(CanvasError::LayerNotFound(_))
        ));
    }

    #[test]
    fn collaborator_failures_surface_unchanged() {
        let mut s = session(4, 4);
        let err = CollaboratorError::new("Requested entity was not found.");
        match s.accept_generated(Err(err), GeneratedTarget::Layer) {
            Err(CanvasError::Collaborator(e)) => assert!(e.credentials_invalid),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(s.layers().len(), 1);
    }
}
