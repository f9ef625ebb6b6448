//! Configuration schema types for `forge.toml`
//!
//! Every section is optional; a missing file or section yields the defaults
//! below. The loaded [`PipelineConfig`] is passed explicitly into each
//! pipeline entry point.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chroma::{ChromaKey, DEFAULT_TOLERANCE};
use crate::color::KeyColor;
use crate::normalize::{Anchor, NormalizeSettings};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chroma: ChromaConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Where animations live on disk and how their URLs are formed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root directory
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// URL prefix that maps onto the storage root
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: default_storage_root(), url_prefix: default_url_prefix() }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_url_prefix() -> String {
    "/api/storage".to_string()
}

/// Chroma key settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromaConfig {
    #[serde(default)]
    pub key_color: KeyColor,
    /// Per-channel tolerance, 0-255
    #[serde(default = "default_tolerance")]
    pub tolerance: u16,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self { key_color: KeyColor::default(), tolerance: default_tolerance() }
    }
}

fn default_tolerance() -> u16 {
    DEFAULT_TOLERANCE as u16
}

impl ChromaConfig {
    pub fn chroma_key(&self) -> ChromaKey {
        ChromaKey::new(self.key_color, self.tolerance.min(255) as u8)
    }
}

/// Canvas normalization defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
    #[serde(default)]
    pub anchor: Anchor,
    /// Fraction of canvas height the content fills
    #[serde(default = "default_canvas_scale")]
    pub scale: f64,
    /// Nearest-neighbor resampling
    #[serde(default = "default_true")]
    pub pixel_art: bool,
    /// One shared bounding box across all frames
    #[serde(default = "default_true")]
    pub consistent_bounds: bool,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            anchor: Anchor::default(),
            scale: default_canvas_scale(),
            pixel_art: true,
            consistent_bounds: true,
        }
    }
}

impl CanvasConfig {
    pub fn settings(&self) -> NormalizeSettings {
        NormalizeSettings {
            canvas_width: self.width,
            canvas_height: self.height,
            anchor: self.anchor,
            scale: self.scale,
            pixel_art: self.pixel_art,
            consistent_bounds: self.consistent_bounds,
        }
    }
}

fn default_canvas_width() -> u32 {
    256
}

fn default_canvas_height() -> u32 {
    512
}

fn default_canvas_scale() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

/// Export defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Frame rate used when an animation records none
    #[serde(default = "default_fps")]
    pub default_fps: u32,
    /// First frame size tried when inferring a grid
    #[serde(default = "default_frame_size")]
    pub preferred_frame_size: u32,
    /// Columns used by rebuild when an animation records none
    #[serde(default = "default_columns")]
    pub default_columns: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_fps: default_fps(),
            preferred_frame_size: default_frame_size(),
            default_columns: default_columns(),
        }
    }
}

fn default_fps() -> u32 {
    12
}

fn default_frame_size() -> u32 {
    48
}

fn default_columns() -> u32 {
    6
}

/// Background remover backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoverKind {
    /// In-process chroma keying with the `[chroma]` settings
    #[default]
    Chroma,
    /// External tool invoked with `--input`/`--output`
    Command,
}

/// Background removal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default)]
    pub remover: RemoverKind,
    /// Program and leading arguments for the `command` remover
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color_tolerance: Option<u32>,
    /// Pass `--no-post-process` to the command
    #[serde(default)]
    pub no_post_process: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            remover: RemoverKind::Chroma,
            command: Vec::new(),
            timeout_ms: default_timeout_ms(),
            model: None,
            color_tolerance: None,
            no_post_process: false,
        }
    }
}

fn default_timeout_ms() -> u64 {
    180_000
}

/// Batch export settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker threads; 0 uses available parallelism
    #[serde(default)]
    pub jobs: usize,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "canvas.scale")
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "forge.toml: '{}' {}", self.field, self.message)
    }
}

impl PipelineConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if !(self.canvas.scale > 0.0 && self.canvas.scale <= 1.0) {
            push("canvas.scale", "must be in (0, 1]");
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            push("canvas", "width and height must be positive");
        }
        if self.chroma.tolerance > 255 {
            push("chroma.tolerance", "must be at most 255");
        }
        if self.export.preferred_frame_size == 0 {
            push("export.preferred_frame_size", "must be a positive integer");
        }
        if self.export.default_columns == 0 {
            push("export.default_columns", "must be a positive integer");
        }
        if self.background.remover == RemoverKind::Command && self.background.command.is_empty() {
            push("background.command", "must name a program when remover = \"command\"");
        }
        if self.background.timeout_ms == 0 {
            push("background.timeout_ms", "must be a positive integer");
        }
        if !self.storage.url_prefix.starts_with('/') {
            push("storage.url_prefix", "must start with '/'");
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Worker count for batch exports.
    pub fn batch_jobs(&self) -> usize {
        if self.batch.jobs > 0 {
            self.batch.jobs
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }
}
