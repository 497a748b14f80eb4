// ============================================================================
// ENGINE SETTINGS – plain key=value file in the user config directory
// ============================================================================

use std::path::{Path, PathBuf};

use crate::canvas::{format_hex_color, parse_hex_color};
use crate::components::history::DEFAULT_MAX_HISTORY;
use crate::error::CanvasResult;
use crate::{log_info, log_warn};

const SETTINGS_FILE: &str = "layerfe_settings.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub max_history_steps: usize,
    /// 0 = let rayon pick.
    pub filter_threads: usize,
    pub backdrop_color: [u8; 4],
    pub canvas_backing_color: [u8; 4],
    pub selection_color: [u8; 4],
    pub default_width: u32,
    pub default_height: u32,
    /// Surface size used for the initial fit-to-view zoom.
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub preview_max_edge: u32,
    pub preview_quality: u8,
    pub font_paths: Vec<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_history_steps: DEFAULT_MAX_HISTORY,
            filter_threads: 0,
            backdrop_color: [0x0f, 0x0f, 0x0f, 255],
            canvas_backing_color: [0x1a, 0x1a, 0x1a, 255],
            selection_color: [0x3b, 0x82, 0xf6, 255],
            default_width: 3840,
            default_height: 2160,
            viewport_width: 1920,
            viewport_height: 1080,
            preview_max_edge: 1024,
            preview_quality: 80,
            font_paths: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/layerfe/layerfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\LayerFE\layerfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/LayerFE/layerfe_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("LayerFE").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("LayerFE")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(xdg) => PathBuf::from(xdg),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("layerfe").join(SETTINGS_FILE))
        }
    }

    /// Parse settings text. Unknown keys are skipped; malformed values keep
    /// their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_history_steps" => {
                    s.max_history_steps = val.parse().ok().filter(|&n| n > 0).unwrap_or(DEFAULT_MAX_HISTORY);
                }
                "filter_threads" => {
                    s.filter_threads = val.parse().unwrap_or(0);
                }
                "backdrop_color" => {
                    if let Ok(c) = parse_hex_color(val) { s.backdrop_color = c; }
                }
                "canvas_backing_color" => {
                    if let Ok(c) = parse_hex_color(val) { s.canvas_backing_color = c; }
                }
                "selection_color" => {
                    if let Ok(c) = parse_hex_color(val) { s.selection_color = c; }
                }
                "default_width" => {
                    s.default_width = val.parse().ok().filter(|&n| n > 0).unwrap_or(3840);
                }
                "default_height" => {
                    s.default_height = val.parse().ok().filter(|&n| n > 0).unwrap_or(2160);
                }
                "viewport_width" => {
                    s.viewport_width = val.parse().ok().filter(|&n| n > 0).unwrap_or(1920);
                }
                "viewport_height" => {
                    s.viewport_height = val.parse().ok().filter(|&n| n > 0).unwrap_or(1080);
                }
                "preview_max_edge" => {
                    s.preview_max_edge = val.parse().unwrap_or(1024);
                }
                "preview_quality" => {
                    s.preview_quality = val.parse::<u8>().map(|q| q.clamp(1, 100)).unwrap_or(80);
                }
                "font_path" => {
                    if !val.is_empty() {
                        s.font_paths.push(PathBuf::from(val));
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        let mut content = format!(
            "max_history_steps={}\n\
             filter_threads={}\n\
             backdrop_color={}\n\
             canvas_backing_color={}\n\
             selection_color={}\n\
             default_width={}\n\
             default_height={}\n\
             viewport_width={}\n\
             viewport_height={}\n\
             preview_max_edge={}\n\
             preview_quality={}\n",
            self.max_history_steps,
            self.filter_threads,
            format_hex_color(self.backdrop_color),
            format_hex_color(self.canvas_backing_color),
            format_hex_color(self.selection_color),
            self.default_width,
            self.default_height,
            self.viewport_width,
            self.viewport_height,
            self.preview_max_edge,
            self.preview_quality,
        );
        for path in &self.font_paths {
            content.push_str(&format!("font_path={}\n", path.display()));
        }
        content
    }

    /// Load from the default location (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                log_info!("Loaded settings from {}", path.display());
                Self::parse(&content)
            }
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> CanvasResult<()> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => {
                log_warn!("No settings directory available; settings not saved");
                Ok(())
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> CanvasResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_falls_back_to_defaults() {
        let s = EngineSettings::parse(
            "max_history_steps=abc\n\
             backdrop_color=not-a-color\n\
             preview_quality=250\n\
             no equals sign\n\
             mystery_key=1\n",
        );
        assert_eq!(s, EngineSettings::default());
    }

    #[test]
    fn values_and_font_paths_are_read() {
        let s = EngineSettings::parse(
            "# comment\n\
             max_history_steps=12\n\
             selection_color=#ff0000\n\
             font_path=/fonts/a.ttf\n\
             font_path=/fonts/b.otf\n",
        );
        assert_eq!(s.max_history_steps, 12);
        assert_eq!(s.selection_color, [255, 0, 0, 255]);
        assert_eq!(s.font_paths, vec![PathBuf::from("/fonts/a.ttf"), PathBuf::from("/fonts/b.otf")]);
    }

    #[test]
    fn zero_history_is_rejected() {
        assert_eq!(EngineSettings::parse("max_history_steps=0").max_history_steps, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let s = EngineSettings {
            max_history_steps: 7,
            filter_threads: 3,
            preview_quality: 55,
            font_paths: vec![PathBuf::from("x.ttf")],
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(EngineSettings::load_from(&path), s);
        assert_eq!(EngineSettings::load_from(&dir.path().join("missing.cfg")), EngineSettings::default());
    }
}
