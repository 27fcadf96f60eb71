use std::path::PathBuf;
use std::time::Duration;

use image::Rgb;

use crate::canvas::{format_hex_color, parse_hex_color, Background, MAX_CANVAS_DIM};

/// Upper bound for `max_history_mb` (64 GB).
const MAX_HISTORY_MB: usize = 64 * 1024;

/// Persistent engine preferences, stored as `key=value` lines.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Undo steps kept before the oldest is dropped.
    pub max_undo_steps: usize,
    /// Approximate history memory budget in megabytes; 0 disables the cap.
    pub max_history_mb: usize,
    /// Interval between preview frames while a stroke is active.
    pub preview_interval_ms: u64,
    /// Debounce delay for recompositing after edits.
    pub redraw_debounce_ms: u64,
    pub color_blending: bool,
    pub render_pixel_alpha: bool,
    /// Solid background instead of the checkerboard.
    pub show_background: bool,
    pub background_color: Rgb<u8>,
    /// Flatten exports onto `background_color`.
    pub save_background: bool,
    pub default_width: u32,
    pub default_height: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            max_history_mb: 64,
            preview_interval_ms: 10,
            redraw_debounce_ms: 30,
            color_blending: false,
            render_pixel_alpha: true,
            show_background: false,
            background_color: Rgb([255, 255, 255]),
            save_background: false,
            default_width: 32,
            default_height: 32,
        }
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EngineSettings {
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("PixelCanvas").join("pixelcanvas_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PixelCanvas")
                    .join("pixelcanvas_settings.cfg"),
            );
        }
        #[allow(unreachable_code)]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(xdg) => PathBuf::from(xdg),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("pixelcanvas").join("pixelcanvas_settings.cfg"))
        }
    }

    /// Read settings from the platform config file, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::parse(&content)
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_config_string())
    }

    /// Parse `key=value` lines. Unknown keys, comments and bad values are
    /// skipped and leave the default in place.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_steps = v.clamp(1, 10_000);
                    }
                }
                "max_history_mb" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_history_mb = v.min(MAX_HISTORY_MB);
                    }
                }
                "preview_interval_ms" => {
                    if let Ok(v) = val.parse::<u64>() {
                        s.preview_interval_ms = v.clamp(1, 1000);
                    }
                }
                "redraw_debounce_ms" => {
                    if let Ok(v) = val.parse::<u64>() {
                        s.redraw_debounce_ms = v.min(1000);
                    }
                }
                "color_blending" => {
                    if let Some(v) = parse_bool(val) {
                        s.color_blending = v;
                    }
                }
                "render_pixel_alpha" => {
                    if let Some(v) = parse_bool(val) {
                        s.render_pixel_alpha = v;
                    }
                }
                "show_background" => {
                    if let Some(v) = parse_bool(val) {
                        s.show_background = v;
                    }
                }
                "background_color" => {
                    if let Some(c) = parse_hex_color(val) {
                        s.background_color = c;
                    }
                }
                "save_background" => {
                    if let Some(v) = parse_bool(val) {
                        s.save_background = v;
                    }
                }
                "default_width" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.default_width = v.clamp(1, MAX_CANVAS_DIM);
                    }
                }
                "default_height" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.default_height = v.clamp(1, MAX_CANVAS_DIM);
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             max_history_mb={}\n\
             preview_interval_ms={}\n\
             redraw_debounce_ms={}\n\
             color_blending={}\n\
             render_pixel_alpha={}\n\
             show_background={}\n\
             background_color={}\n\
             save_background={}\n\
             default_width={}\n\
             default_height={}\n",
            self.max_undo_steps,
            self.max_history_mb,
            self.preview_interval_ms,
            self.redraw_debounce_ms,
            self.color_blending,
            self.render_pixel_alpha,
            self.show_background,
            format_hex_color(self.background_color),
            self.save_background,
            self.default_width,
            self.default_height,
        )
    }

    pub fn background(&self) -> Background {
        if self.show_background {
            Background::Solid(self.background_color)
        } else {
            Background::Checkerboard
        }
    }

    /// Background color for exports, when flattening is enabled.
    pub fn export_background(&self) -> Option<Rgb<u8>> {
        self.save_background.then_some(self.background_color)
    }

    pub fn history_memory_limit(&self) -> Option<usize> {
        (self.max_history_mb > 0).then(|| self.max_history_mb.saturating_mul(1024 * 1024))
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_interval_ms)
    }

    pub fn redraw_debounce(&self) -> Duration {
        Duration::from_millis(self.redraw_debounce_ms)
    }
}
