// ============================================================================
// LayerFE CLI — headless compositing via command-line arguments
// ============================================================================
//
// Usage examples:
//   layerfe --width 1080 --height 1080 --image photo.jpg --filter grayscale -o out.png
//   layerfe -W 800 -H 600 --background "#202030" --text "Hello" --font Inter.ttf -o card.png
//   layerfe --image "shots/*.png" --filter blur=3 --filter brightness=15 -o stack.png
//   layerfe --open scene.lfe --preview thumb.jpg --quality 50
//
// Filters apply, in order, to the top layer once all layers are added.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use crate::canvas::parse_hex_color;
use crate::io::{write_bytes, DecodeQueue};
use crate::ops::canvas_ops::{BackgroundMode, LayerSource};
use crate::ops::filters::{FilterKind, FilterParams};
use crate::ops::text::{AbGlyphFonts, BlockFont, FontService, TextSource};
use crate::project::CanvasSession;
use crate::settings::EngineSettings;
use crate::{log_info, log_warn};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// LayerFE headless compositor.
#[derive(Parser, Debug)]
#[command(
    name = "layerfe",
    about = "LayerFE headless layer compositor",
    long_about = "Build a layered canvas from images and text, run filters on the top\n\
                  layer, and export the flattened result without opening an editor.\n\n\
                  Example:\n  \
                  layerfe -W 1080 -H 1080 --image photo.jpg --filter sepia -o out.png"
)]
pub struct CliArgs {
    /// Canvas width (defaults to the configured project width).
    #[arg(short = 'W', long)]
    pub width: Option<u32>,

    /// Canvas height (defaults to the configured project height).
    #[arg(short = 'H', long)]
    pub height: Option<u32>,

    /// Background colour (#rgb, #rrggbb, #rrggbbaa) or "transparent".
    #[arg(long, value_name = "COLOR")]
    pub background: Option<String>,

    /// Image file(s) added as layers, bottom to top. Glob patterns accepted.
    #[arg(short, long, num_args = 1..)]
    pub image: Vec<String>,

    /// Add a text layer with this content.
    #[arg(long)]
    pub text: Option<String>,

    /// Text size in pixels.
    #[arg(long, default_value_t = 64.0)]
    pub font_size: f32,

    /// TrueType/OpenType font file(s) for text layers.
    #[arg(long, num_args = 1..)]
    pub font: Vec<PathBuf>,

    /// Filter to apply to the top layer, as KIND or KIND=VALUE. Repeatable.
    #[arg(short, long, value_name = "KIND[=VALUE]")]
    pub filter: Vec<String>,

    /// Start from a saved .lfe project instead of a blank canvas.
    #[arg(long, value_name = "PROJECT.lfe")]
    pub open: Option<PathBuf>,

    /// PNG output path for the flattened canvas.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Downscaled JPEG preview output path.
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,

    /// JPEG preview quality (1–100).
    #[arg(short, long, default_value_t = 80, value_name = "1-100")]
    pub quality: u8,

    /// Save the layered result as a .lfe project.
    #[arg(long, value_name = "PROJECT.lfe")]
    pub save: Option<PathBuf>,

    /// Mirror log output to stderr and print timing.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the pipeline and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    if args.output.is_none() && args.preview.is_none() && args.save.is_none() {
        eprintln!("error: nothing to write; pass --output, --preview or --save.");
        return ExitCode::FAILURE;
    }
    let start = Instant::now();
    match run_pipeline(&args, EngineSettings::load()) {
        Ok(()) => {
            if args.verbose {
                println!("done ({:.0}ms)", start.elapsed().as_secs_f64() * 1000.0);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

fn run_pipeline(args: &CliArgs, mut settings: EngineSettings) -> Result<(), String> {
    if let Some(w) = args.width {
        settings.default_width = w;
    }
    if let Some(h) = args.height {
        settings.default_height = h;
    }
    settings.font_paths.extend(args.font.iter().cloned());

    let filters = args
        .filter
        .iter()
        .map(|f| parse_filter(f))
        .collect::<Result<Vec<_>, _>>()?;

    let mut session = CanvasSession::new(&settings, load_fonts(&settings.font_paths))
        .map_err(|e| format!("could not start session: {}", e))?;

    // -- Step 1: Base document --------------------------------------------
    if let Some(path) = &args.open {
        session
            .open_project(path)
            .map_err(|e| format!("open '{}' failed: {}", path.display(), e))?;
    }
    if let Some(bg) = &args.background {
        let mode = if bg.eq_ignore_ascii_case("transparent") {
            BackgroundMode::Transparent
        } else {
            BackgroundMode::Color(parse_hex_color(bg).map_err(|e| e.to_string())?)
        };
        session.set_background(mode).map_err(|e| format!("background failed: {}", e))?;
    }

    // -- Step 2: Image layers (decoded off-thread, added in argument order) --
    let inputs = resolve_inputs(&args.image);
    if !args.image.is_empty() && inputs.is_empty() {
        return Err("no image files matched the given pattern(s)".into());
    }
    let mut queue = DecodeQueue::new();
    for (tag, path) in inputs.iter().enumerate() {
        let bytes = std::fs::read(path).map_err(|e| format!("read '{}' failed: {}", path.display(), e))?;
        queue.submit(tag as u64, bytes);
    }
    let mut decoded = queue.wait_all();
    decoded.sort_by_key(|d| d.tag);
    for d in decoded {
        let path = &inputs[d.tag as usize];
        let bitmap = d.result.map_err(|e| format!("decode '{}' failed: {}", path.display(), e))?;
        session
            .add_layer(LayerSource::Image(bitmap))
            .map_err(|e| format!("add '{}' failed: {}", path.display(), e))?;
        if args.verbose {
            println!("  + {}", path.display());
        }
    }

    // -- Step 3: Text layer -----------------------------------------------
    if let Some(content) = &args.text {
        session
            .add_layer(LayerSource::Text(TextSource::new(content.as_str(), args.font_size)))
            .map_err(|e| format!("text layer failed: {}", e))?;
    }

    // -- Step 4: Filters on the top layer ---------------------------------
    if !filters.is_empty() {
        let target = session.layers().top().map(|l| l.id).ok_or("canvas has no layers")?;
        for (kind, params) in filters {
            session
                .apply_filter(target, kind, params)
                .map_err(|e| format!("filter '{}' failed: {}", kind, e))?;
            // Sequential: each filter reads the previous one's result
            session.wait_for_filters();
            if let Some(failure) = session.take_filter_failures().into_iter().next() {
                return Err(format!("filter {}", failure));
            }
        }
    }

    // -- Step 5: Outputs --------------------------------------------------
    if let Some(out) = &args.output {
        let png = session.export_png().map_err(|e| format!("PNG export failed: {}", e))?;
        write_bytes(out, &png).map_err(|e| format!("write '{}' failed: {}", out.display(), e))?;
    }
    if let Some(out) = &args.preview {
        let jpg = session
            .export_jpeg(settings.preview_max_edge, args.quality)
            .map_err(|e| format!("preview export failed: {}", e))?;
        write_bytes(out, &jpg).map_err(|e| format!("write '{}' failed: {}", out.display(), e))?;
    }
    if let Some(out) = &args.save {
        session
            .save_project(out)
            .map_err(|e| format!("save '{}' failed: {}", out.display(), e))?;
    }
    log_info!("CLI run finished: {} layers, {}x{}", session.layers().len(), session.width(), session.height());
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Real fonts when any load, otherwise the built-in block font.
fn load_fonts(paths: &[PathBuf]) -> Arc<dyn FontService> {
    let fonts = AbGlyphFonts::from_paths(paths);
    if fonts.is_empty() {
        if !paths.is_empty() {
            log_warn!("No usable fonts among {} path(s); using block font", paths.len());
        }
        Arc::new(BlockFont)
    } else {
        Arc::new(fonts)
    }
}

/// `KIND` or `KIND=VALUE`.
fn parse_filter(arg: &str) -> Result<(FilterKind, FilterParams), String> {
    let (name, value) = match arg.split_once('=') {
        Some((n, v)) => {
            let v: f32 = v.trim().parse().map_err(|_| format!("bad value in filter '{}'", arg))?;
            (n, v)
        }
        None => (arg, 0.0),
    };
    let kind = FilterKind::from_name(name.trim()).map_err(|e| e.to_string())?;
    Ok((kind, FilterParams::value(value)))
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_specs_parse() {
        let (kind, params) = parse_filter("brightness=15").unwrap();
        assert_eq!(kind, FilterKind::Brightness);
        assert_eq!(params.value, 15.0);
        assert_eq!(parse_filter("edge-detect").unwrap().0, FilterKind::EdgeDetect);
        assert!(parse_filter("sparkle").is_err());
        assert!(parse_filter("blur=lots").is_err());
    }

    #[test]
    fn args_parse_repeated_filters() {
        let args = CliArgs::try_parse_from([
            "layerfe", "-W", "10", "-H", "20", "-f", "invert", "-f", "blur=2", "-o", "out.png",
        ])
        .unwrap();
        assert_eq!((args.width, args.height), (Some(10), Some(20)));
        assert_eq!(args.filter, vec!["invert", "blur=2"]);
    }

    #[test]
    fn globs_expand_and_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.png", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let literal = dir.path().join("a.png").to_string_lossy().into_owned();
        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.png"));
    }

    #[test]
    fn end_to_end_writes_png_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.png");
        let save = dir.path().join("scene.lfe");
        let args = CliArgs::try_parse_from([
            "layerfe",
            "-W", "8",
            "-H", "6",
            "--background", "#ff0000",
            "-f", "invert",
            "-o", out.to_str().unwrap(),
            "--save", save.to_str().unwrap(),
        ])
        .unwrap();
        run_pipeline(&args, EngineSettings::default()).unwrap();
        let bmp = crate::io::load_bitmap(&out).unwrap();
        assert_eq!((bmp.width, bmp.height), (8, 6));
        assert_eq!(&bmp.pixels[0..4], &[0, 255, 255, 255]);
        assert_eq!(crate::io::load_project(&save).unwrap().layers.len(), 1);
    }

    #[test]
    fn failed_filter_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.png");
        let args = CliArgs::try_parse_from([
            "layerfe", "-W", "4", "-H", "4", "-f", "gamma", "-o", out.to_str().unwrap(),
        ])
        .unwrap();
        let err = run_pipeline(&args, EngineSettings::default()).unwrap_err();
        assert!(err.contains("gamma"), "{}", err);
        assert!(!out.exists());
    }
}
