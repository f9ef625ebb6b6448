//! Persisted documents: the animation record and the types it owns.
//!
//! Everything here round-trips through `animation.json` in camelCase. Fields
//! this crate does not interpret (provider settings, prompts, queues) are kept
//! in `extra` so a load/save cycle never drops them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sequence::LoopMode;
use crate::spritesheet::SpritesheetLayout;

fn default_fps() -> u32 {
    12
}

/// Lifecycle status of an animation's generated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnimationStatus {
    #[default]
    Draft,
    Generating,
    Complete,
    Failed,
}

/// One frame of generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFrame {
    pub frame_index: usize,
    pub url: String,
    #[serde(default)]
    pub is_keyframe: bool,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
}

/// A past generation attempt for a keyframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyframeGeneration {
    pub id: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_palette: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A user- or model-authored override pinned to one frame index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyframe {
    pub frame_index: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tile_x: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tile_y: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remove_bg: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_palette: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub generations: Vec<KeyframeGeneration>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How background removal is applied during export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundRemovalMode {
    /// Once over the whole atlas
    #[default]
    Spritesheet,
    /// Independently per frame, then recomposed
    PerFrame,
}

impl BackgroundRemovalMode {
    /// Parse a user-supplied mode, accepting the common aliases.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spritesheet" | "sheet" => Some(Self::Spritesheet),
            "per-frame" | "per_frame" | "frames" => Some(Self::PerFrame),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spritesheet => "spritesheet",
            Self::PerFrame => "per-frame",
        }
    }
}

impl std::fmt::Display for BackgroundRemovalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The live export manifest of an animation. Overwritten on every export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub spritesheet_url: String,
    pub aseprite_json_hash_url: String,
    pub aseprite_json_array_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub png_sequence_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub png_sequence_index_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zip_bundle_url: Option<String>,
    pub normalized: bool,
    pub background_removed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub background_removal_mode: Option<BackgroundRemovalMode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alpha_threshold: Option<u8>,
    pub last_exported_at: DateTime<Utc>,
}

/// Where a version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionSource {
    #[default]
    Manual,
    Generation,
}

/// Entry in an animation's version list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationVersion {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: VersionSource,
}

/// Generation-relevant fields of an animation, as stored inside a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationSnapshot {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub frame_count: usize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sprite_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extract_fps: Option<u32>,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sheet_columns: Option<u32>,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default)]
    pub generated_frames: Vec<GeneratedFrame>,
    #[serde(default)]
    pub status: AnimationStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generated_spritesheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spritesheet_layout: Option<SpritesheetLayout>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actual_frame_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_start_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_end_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_provider_spritesheet_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_thumbnail_url: Option<String>,
    /// Uninterpreted generation settings carried with the snapshot
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Keys from [`Animation::extra`] that belong in a snapshot.
const SNAPSHOT_SETTINGS: [&str; 7] = [
    "referenceImageId",
    "style",
    "generationProvider",
    "generationModel",
    "generationSeconds",
    "generationSize",
    "generationLoop",
];

impl AnimationSnapshot {
    /// Rewrite every asset URL the snapshot holds.
    pub fn map_urls<F: Fn(&str) -> String>(mut self, f: F) -> Self {
        let map = |url: &mut Option<String>| {
            if let Some(u) = url.as_mut() {
                *u = f(u);
            }
        };

        for keyframe in &mut self.keyframes {
            map(&mut keyframe.image);
            map(&mut keyframe.input_palette);
            for generation in &mut keyframe.generations {
                generation.image = f(&generation.image);
                map(&mut generation.input_palette);
            }
        }
        for frame in &mut self.generated_frames {
            frame.url = f(&frame.url);
        }
        map(&mut self.generated_spritesheet);
        map(&mut self.generation_start_image_url);
        map(&mut self.generation_end_image_url);
        map(&mut self.source_video_url);
        map(&mut self.source_provider_spritesheet_url);
        map(&mut self.source_thumbnail_url);
        self
    }
}

/// The animation document stored at `animations/<id>/animation.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub character_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub frame_count: usize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sprite_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub frame_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extract_fps: Option<u32>,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sheet_columns: Option<u32>,
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,
    #[serde(default)]
    pub generated_frames: Vec<GeneratedFrame>,
    #[serde(default)]
    pub status: AnimationStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generated_spritesheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spritesheet_layout: Option<SpritesheetLayout>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actual_frame_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_start_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_end_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_provider_spritesheet_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub generation_job: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exports: Option<ExportRecord>,
    #[serde(default)]
    pub versions: Vec<AnimationVersion>,
    #[serde(default)]
    pub active_version_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version_counter: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Animation {
    /// A fresh draft animation with no generated output.
    pub fn new(id: impl Into<String>, name: impl Into<String>, frame_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            character_id: None,
            name: name.into(),
            description: String::new(),
            frame_count,
            fps: default_fps(),
            sprite_size: None,
            frame_width: None,
            frame_height: None,
            extract_fps: None,
            loop_mode: LoopMode::Loop,
            sheet_columns: None,
            keyframes: Vec::new(),
            generated_frames: Vec::new(),
            status: AnimationStatus::Draft,
            generated_spritesheet: None,
            generation_note: None,
            spritesheet_layout: None,
            actual_frame_count: None,
            generation_start_image_url: None,
            generation_end_image_url: None,
            source_video_url: None,
            source_provider_spritesheet_url: None,
            source_thumbnail_url: None,
            generation_job: None,
            exports: None,
            versions: Vec::new(),
            active_version_id: None,
            version_counter: None,
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }

    /// Frame size recorded on the animation, falling back to `sprite_size`.
    pub fn frame_size(&self) -> (Option<u32>, Option<u32>) {
        (
            self.spritesheet_layout.map(|l| l.frame_width).or(self.frame_width).or(self.sprite_size),
            self.spritesheet_layout.map(|l| l.frame_height).or(self.frame_height).or(self.sprite_size),
        )
    }

    /// Number of generated frames, as recorded.
    pub fn effective_frame_count(&self) -> usize {
        self.actual_frame_count
            .or_else(|| (!self.generated_frames.is_empty()).then_some(self.generated_frames.len()))
            .unwrap_or(self.frame_count)
    }

    /// Copy out the generation-relevant fields.
    pub fn snapshot(&self) -> AnimationSnapshot {
        let settings = SNAPSHOT_SETTINGS
            .iter()
            .filter_map(|key| self.extra.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();

        AnimationSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            frame_count: self.frame_count,
            fps: self.fps,
            sprite_size: self.sprite_size,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            extract_fps: self.extract_fps,
            loop_mode: self.loop_mode,
            sheet_columns: self.sheet_columns,
            keyframes: self.keyframes.clone(),
            generated_frames: self.generated_frames.clone(),
            status: self.status,
            generated_spritesheet: self.generated_spritesheet.clone(),
            generation_note: self.generation_note.clone(),
            spritesheet_layout: self.spritesheet_layout,
            actual_frame_count: self.actual_frame_count,
            generation_start_image_url: self.generation_start_image_url.clone(),
            generation_end_image_url: self.generation_end_image_url.clone(),
            source_video_url: self.source_video_url.clone(),
            source_provider_spritesheet_url: self.source_provider_spritesheet_url.clone(),
            source_thumbnail_url: self.source_thumbnail_url.clone(),
            settings,
        }
    }

    /// Overwrite the generation-relevant fields from a snapshot.
    ///
    /// Identity, versions and timestamps are left alone.
    pub fn apply_snapshot(&mut self, snapshot: AnimationSnapshot) {
        self.name = snapshot.name;
        self.description = snapshot.description;
        self.frame_count = snapshot.frame_count;
        self.fps = snapshot.fps;
        self.sprite_size = snapshot.sprite_size;
        self.frame_width = snapshot.frame_width;
        self.frame_height = snapshot.frame_height;
        self.extract_fps = snapshot.extract_fps;
        self.loop_mode = snapshot.loop_mode;
        self.sheet_columns = snapshot.sheet_columns;
        self.keyframes = snapshot.keyframes;
        self.generated_frames = snapshot.generated_frames;
        self.status = snapshot.status;
        self.generated_spritesheet = snapshot.generated_spritesheet;
        self.generation_note = snapshot.generation_note;
        self.spritesheet_layout = snapshot.spritesheet_layout;
        self.actual_frame_count = snapshot.actual_frame_count;
        self.generation_start_image_url = snapshot.generation_start_image_url;
        self.generation_end_image_url = snapshot.generation_end_image_url;
        self.source_video_url = snapshot.source_video_url;
        self.source_provider_spritesheet_url = snapshot.source_provider_spritesheet_url;
        self.source_thumbnail_url = snapshot.source_thumbnail_url;
        for key in SNAPSHOT_SETTINGS {
            self.extra.remove(key);
        }
        self.extra.extend(snapshot.settings);
    }
}

/// The `version.json` document inside a version directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDocument {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: VersionSource,
    pub snapshot: AnimationSnapshot,
}
