use std::sync::Arc;

use layerfe::canvas::{BACKGROUND_LAYER_NAME, WHITE};
use layerfe::io::{self, Bitmap, PixelFormat};
use layerfe::ops::ai::{GeneratedTarget, PreviewPurpose};
use layerfe::ops::canvas_ops::{BackgroundMode, LayerSource, Rect};
use layerfe::ops::filters::{FilterKind, FilterParams};
use layerfe::ops::text::BlockFont;
use layerfe::settings::EngineSettings;
use layerfe::{BlendMode, CanvasSession, LayerKind, LayerUpdate, PixelBuffer, Transform};

fn session(w: u32, h: u32) -> CanvasSession {
    session_with(EngineSettings { default_width: w, default_height: h, ..Default::default() })
}

fn session_with(settings: EngineSettings) -> CanvasSession {
    CanvasSession::new(&settings, Arc::new(BlockFont)).unwrap()
}

#[test]
fn new_layer_brightness_and_two_undos() {
    let mut s = session(1080, 1080);
    assert_eq!(s.layers().len(), 1);
    assert_eq!(s.layers().layers()[0].name, BACKGROUND_LAYER_NAME);
    assert!(s.layers().layers()[0].pixels.as_raw().iter().all(|&b| b == 255));
    assert_eq!(s.history().len(), 1);

    let id = s.add_layer(LayerSource::Empty).unwrap();
    assert_eq!(s.layers().len(), 2);
    assert_eq!(s.active_layer(), Some(id));

    s.apply_filter(id, FilterKind::Brightness, FilterParams::value(15.0)).unwrap();
    assert_eq!(s.wait_for_filters(), 1);
    let layer = s.layer(id).unwrap();
    assert!(layer.pixels.as_raw().chunks_exact(4).all(|p| p == [15, 15, 15, 0]));

    assert!(s.undo());
    assert_eq!(s.layers().len(), 2);
    assert!(s.layer(id).unwrap().pixels.as_raw().iter().all(|&b| b == 0));
    assert_eq!(s.active_layer(), Some(id));

    assert!(s.undo());
    assert_eq!(s.layers().len(), 1);
    assert_eq!(s.active_layer(), None);
    assert!(!s.undo());
}

#[test]
fn crop_keeps_visual_position_and_undoes_with_bounds() {
    let mut s = session(1000, 1000);
    let id = s.add_layer(LayerSource::Raster(PixelBuffer::new(50, 50).unwrap())).unwrap();
    let t = Transform { x: 100.0, y: 100.0, ..Transform::default() };
    s.update_layer(id, LayerUpdate { transform: Some(t), ..Default::default() }, true).unwrap();

    s.crop(Rect::from_corners(50, 50, 500, 500)).unwrap();
    assert_eq!(s.canvas_size(), (450, 450));
    let moved = s.layer(id).unwrap().transform;
    assert_eq!((moved.x, moved.y), (50.0, 50.0));

    assert!(s.undo());
    assert_eq!(s.canvas_size(), (1000, 1000));
    assert_eq!(s.layer(id).unwrap().transform.x, 100.0);
}

#[test]
fn undo_redo_restores_identical_state() {
    let mut s = session(32, 32);
    let id = s.add_layer(LayerSource::Fill([10, 20, 30, 255])).unwrap();
    let update = LayerUpdate {
        transform: Some(Transform { x: 3.0, y: -4.0, rotation: 45.0, scale_x: -1.0, scale_y: 2.0 }),
        opacity: Some(60),
        blend_mode: Some(BlendMode::Multiply),
        ..Default::default()
    };
    s.update_layer(id, update, true).unwrap();
    s.apply_filter(id, FilterKind::Noise, FilterParams::value(40.0).with_seed(7)).unwrap();
    s.wait_for_filters();

    let before = s.layer(id).unwrap().clone();
    assert!(s.undo());
    assert_ne!(s.layer(id).unwrap().pixels, before.pixels);
    assert!(s.redo());
    let after = s.layer(id).unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.pixels, before.pixels);
    assert_eq!(after.transform, before.transform);
    assert_eq!(after.opacity, before.opacity);
    assert_eq!(after.blend_mode, before.blend_mode);
    assert!(!s.redo());
}

#[test]
fn late_filter_result_for_deleted_layer_is_dropped() {
    let mut s = session(64, 64);
    let id = s.add_layer(LayerSource::Fill([200, 0, 0, 255])).unwrap();
    s.apply_filter(id, FilterKind::Blur, FilterParams::value(2.0)).unwrap();
    s.remove_layer(id).unwrap();
    assert_eq!(s.active_layer(), None);
    let history_len = s.history().len();

    assert_eq!(s.wait_for_filters(), 0);
    assert_eq!(s.layers().len(), 1);
    assert!(s.layer(id).is_none());
    assert_eq!(s.history().len(), history_len);
}

#[test]
fn topmost_opaque_layer_wins() {
    let mut s = session(8, 8);
    s.add_layer(LayerSource::Fill([0, 0, 255, 255])).unwrap();
    s.add_layer(LayerSource::Fill([255, 0, 0, 255])).unwrap();
    let flat = s.flatten().unwrap();
    assert!(flat.as_raw().chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
}

#[test]
fn failed_filters_leave_layer_and_history_alone() {
    let mut s = session(8, 8);
    let id = s.add_layer(LayerSource::Empty).unwrap();
    let len = s.history().len();
    s.apply_filter(id, FilterKind::Gamma, FilterParams::value(-1.0)).unwrap();
    assert_eq!(s.wait_for_filters(), 0);
    assert_eq!(s.history().len(), len);
    let failures = s.take_filter_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("gamma"));
    assert!(s.take_filter_failures().is_empty());
}

#[test]
fn history_is_bounded_by_settings() {
    let mut s = session_with(EngineSettings {
        default_width: 4,
        default_height: 4,
        max_history_steps: 3,
        ..Default::default()
    });
    for _ in 0..5 {
        s.add_layer(LayerSource::Empty).unwrap();
    }
    assert_eq!(s.history().len(), 3);
    assert!(s.undo());
    assert!(s.undo());
    assert!(!s.undo());
    assert_eq!(s.layers().len(), 4);
}

#[test]
fn generated_bitmaps_land_as_layer_or_background() {
    let mut s = session(20, 10);
    let bmp = Bitmap::new(4, 2, PixelFormat::Rgb8, vec![0, 128, 0].repeat(8)).unwrap();

    let layer = s.accept_generated(Ok(bmp.clone()), GeneratedTarget::Layer).unwrap();
    assert_eq!(s.layer(layer).unwrap().kind, LayerKind::Image);
    assert_eq!(s.layer(layer).unwrap().transform.x, 8.0);

    let bg = s.accept_generated(Ok(bmp), GeneratedTarget::Background).unwrap();
    assert_eq!(s.layers().index_of(bg), Some(0));
    let bg_layer = s.layer(bg).unwrap();
    assert_eq!((bg_layer.width(), bg_layer.height()), (20, 10));
    assert_eq!(bg_layer.pixels.get_pixel(19, 9), Some([0, 128, 0, 255]));
}

#[test]
fn set_background_reuses_the_background_layer() {
    let mut s = session(6, 6);
    let original = s.layers().layers()[0].id;
    let id = s.set_background(BackgroundMode::Transparent).unwrap();
    assert_eq!(id, original);
    assert_eq!(s.layers().len(), 1);
    assert!(s.layer(id).unwrap().pixels.as_raw().iter().all(|&b| b == 0));
    s.set_background(BackgroundMode::Color(WHITE)).unwrap();
    assert_eq!(s.layer(id).unwrap().pixels.get_pixel(0, 0), Some(WHITE));
}

#[test]
fn project_save_and_open_preserves_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.lfe");

    let mut s = session(16, 12);
    let id = s.add_layer(LayerSource::Fill([1, 2, 3, 255])).unwrap();
    s.update_layer(id, LayerUpdate::opacity(40), true).unwrap();
    s.save_project(&path).unwrap();

    let mut other = session(2, 2);
    other.open_project(&path).unwrap();
    assert_eq!(other.canvas_size(), (16, 12));
    assert_eq!(other.layers().ids(), s.layers().ids());
    assert_eq!(other.active_layer(), Some(id));
    assert_eq!(other.layer(id).unwrap().opacity, 40);
    assert_eq!(other.history().len(), 1);
}

#[test]
fn previews_are_downscaled_jpegs() {
    let mut s = session_with(EngineSettings {
        default_width: 400,
        default_height: 200,
        preview_max_edge: 100,
        ..Default::default()
    });
    s.add_layer(LayerSource::Fill([50, 60, 70, 255])).unwrap();
    for purpose in [PreviewPurpose::Analyze, PreviewPurpose::Remix] {
        let bytes = s.export_preview(purpose).unwrap();
        let bmp = io::decode_bitmap(&bytes).unwrap();
        assert_eq!((bmp.width, bmp.height), (100, 50));
    }
    let png = io::decode_bitmap(&s.export_png().unwrap()).unwrap();
    assert_eq!((png.width, png.height), (400, 200));
}

#[test]
fn device_mapping_round_trips_through_the_session() {
    let mut s = session(300, 200);
    s.set_surface_size(800, 600).unwrap();
    s.set_zoom(2.0);
    s.pan_by(15.0, -10.0);
    let p = s.canvas_to_device((150.0, 100.0));
    assert_eq!(p, (415.0, 290.0));
    assert_eq!(s.device_to_canvas(p), (150.0, 100.0));
}

#[test]
fn render_thread_reads_consistent_frames() {
    let mut s = session_with(EngineSettings {
        default_width: 16,
        default_height: 16,
        viewport_width: 32,
        viewport_height: 32,
        ..Default::default()
    });
    let frames = s.frame_source();
    let reader = std::thread::spawn(move || {
        let mut last = 0;
        for _ in 0..50 {
            let scene = frames.snapshot();
            assert!(scene.version >= last);
            last = scene.version;
            let frame = frames.render().unwrap();
            assert_eq!((frame.width(), frame.height()), (32, 32));
        }
    });
    for _ in 0..20 {
        let id = s.add_layer(LayerSource::Fill([9, 9, 9, 255])).unwrap();
        s.remove_layer(id).unwrap();
    }
    reader.join().unwrap();
}
