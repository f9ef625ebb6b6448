//! Export orchestration.
//!
//! Turns an animation's generated spritesheet (and frames, when present)
//! into the published export set:
//!
//! ```text
//! exports/<spritesheet>.png
//! exports/spritesheet-array.json
//! exports/spritesheet-hash.json
//! exports/frames/frame_NNN.png + index.json   (when frames exist)
//! exports/export_<id>.zip                     (when requested)
//! ```
//!
//! Stages run in a fixed order: normalize, remove background, clamp alpha,
//! write. Everything is written into a staging directory and published with a
//! rename; the animation's [`ExportRecord`] is saved last.

use chrono::{DateTime, Utc};
use image::RgbaImage;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::alpha::{clamp_alpha, clamped, effective_threshold};
use crate::background::{remover_from_config, BackgroundError, BackgroundRemover};
use crate::bundle::{write_archive, BundleError};
use crate::cancel::{CancelToken, Cancelled};
use crate::config::PipelineConfig;
use crate::frames::{
    frame_filename, frame_index_from_name, list_frame_files, load_rgba, png_dimensions, save_png, FrameError,
};
use crate::metadata::{build_aseprite, build_index, AsepriteDocs, AtlasDescription};
use crate::models::{Animation, BackgroundRemovalMode, ExportRecord};
use crate::normalize::{normalize_batch, Anchor, NormalizeError, NormalizeSettings};
use crate::spritesheet::{
    compose_indexed, default_columns, extract, infer_frame_size, ExtractOptions, SpritesheetError,
    SpritesheetLayout,
};
use crate::storage::{
    discard_dir, publish_dir, staging_dir_for, write_json, Storage, StorageError, EXPORTS_DIR, FRAMES_DIR,
};

pub const ARRAY_JSON: &str = "spritesheet-array.json";
pub const HASH_JSON: &str = "spritesheet-hash.json";
pub const NORMALIZED_SPRITESHEET: &str = "spritesheet_normalized.png";
pub const FRAMES_INDEX: &str = "index.json";

/// Coarse classification of export failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The animation or its source files do not exist
    NotFound,
    /// The request or the stored data cannot be exported
    InvalidInput,
    /// A pipeline stage failed
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for the kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput => 400,
            ErrorKind::Internal => 500,
        }
    }
}

/// Error type for the export pipeline
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    #[error("Animation not found: {0}")]
    AnimationNotFound(String),
    #[error("No generated spritesheet found. Run generation first.")]
    NoSpritesheet,
    #[error("Invalid spritesheet path '{0}'.")]
    InvalidSpritesheetPath(String),
    #[error("Spritesheet file missing: {}", .0.display())]
    SpritesheetMissing(PathBuf),
    #[error("Spritesheet must be PNG to generate Aseprite metadata.")]
    NotPng,
    #[error("Invalid background removal mode '{0}'. Use spritesheet or per-frame.")]
    InvalidRemovalMode(String),
    #[error(transparent)]
    Layout(#[from] SpritesheetError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// Background removal failed; the export is aborted
    #[error("{0}")]
    BackgroundRemoval(#[source] BackgroundError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Storage(StorageError),
    #[error(transparent)]
    Archive(#[from] BundleError),
    #[error("Export cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::AnimationNotFound(_) | ExportError::SpritesheetMissing(_) => ErrorKind::NotFound,
            ExportError::NoSpritesheet
            | ExportError::InvalidSpritesheetPath(_)
            | ExportError::NotPng
            | ExportError::InvalidRemovalMode(_)
            | ExportError::Layout(_)
            | ExportError::Storage(StorageError::InvalidId(_)) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for ExportError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AnimationNotFound(id) => ExportError::AnimationNotFound(id),
            StorageError::Cancelled(_) => ExportError::Cancelled,
            other => ExportError::Storage(other),
        }
    }
}

impl From<Cancelled> for ExportError {
    fn from(_: Cancelled) -> Self {
        ExportError::Cancelled
    }
}

/// What an export should do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOptions {
    /// Redraw frames onto the configured canvas before packing
    pub normalize: bool,
    pub remove_background: bool,
    pub background_removal_mode: BackgroundRemovalMode,
    /// Hard-clip alpha after removal; `None` or `Some(0)` means off
    pub alpha_threshold: Option<u8>,
    /// Per-character anchor override for normalization
    pub anchor: Option<Anchor>,
    /// Per-character scale override for normalization
    pub scale: Option<f64>,
    /// Also write `export_<id>.zip` with every artifact
    pub zip_bundle: bool,
}

impl ExportOptions {
    /// Resolve a raw removal mode. An unknown mode is an error only when
    /// background removal is requested.
    pub fn parse_mode(remove_background: bool, raw: Option<&str>) -> Result<BackgroundRemovalMode, ExportError> {
        match raw {
            Some(value) if remove_background => BackgroundRemovalMode::parse(value)
                .ok_or_else(|| ExportError::InvalidRemovalMode(value.to_string())),
            _ => Ok(BackgroundRemovalMode::Spritesheet),
        }
    }
}

/// Paths of the published artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifacts {
    pub export_dir: PathBuf,
    pub spritesheet_path: PathBuf,
    pub spritesheet_filename: String,
    pub hash_path: PathBuf,
    pub array_path: PathBuf,
    pub frames_dir: Option<PathBuf>,
    pub zip_path: Option<PathBuf>,
    pub png_sequence_url: Option<String>,
    pub normalized: bool,
    pub background_removed: bool,
    pub background_removal_mode: BackgroundRemovalMode,
    pub alpha_threshold: Option<u8>,
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub animation: Animation,
    pub artifacts: ExportArtifacts,
    pub aseprite: AsepriteDocs,
    pub exported_at: DateTime<Utc>,
}

/// Image content that is either an untouched file or a processed raster.
#[derive(Debug, Clone)]
enum Payload {
    File(PathBuf),
    Image(RgbaImage),
}

impl Payload {
    fn load(&self) -> Result<RgbaImage, FrameError> {
        match self {
            Payload::File(path) => load_rgba(path),
            Payload::Image(image) => Ok(image.clone()),
        }
    }

    fn dimensions(&self) -> Result<(u32, u32), FrameError> {
        match self {
            Payload::File(path) => png_dimensions(path),
            Payload::Image(image) => Ok(image.dimensions()),
        }
    }

    /// Untouched files are copied byte for byte.
    fn write_to(&self, dest: &Path) -> Result<(), FrameError> {
        match self {
            Payload::File(path) => {
                fs::copy(path, dest)?;
                Ok(())
            }
            Payload::Image(image) => save_png(image, dest),
        }
    }
}

#[derive(Debug, Clone)]
struct FrameOut {
    filename: String,
    frame_index: usize,
    payload: Payload,
}

/// The artifact set as it moves through the stages.
#[derive(Debug)]
struct WorkingSet {
    atlas: Payload,
    frames: Vec<FrameOut>,
    frame_size: (Option<u32>, Option<u32>),
    normalized: bool,
}

/// Run the export pipeline for one animation.
///
/// Holds the animation's lease for the whole run. On any error nothing is
/// published and the stored export record is left as it was.
pub fn run_export(
    storage: &Storage,
    config: &PipelineConfig,
    animation_id: &str,
    options: &ExportOptions,
    cancel: &CancelToken,
) -> Result<ExportOutcome, ExportError> {
    let _lease = storage.lease(animation_id);
    let mut animation = storage.load_animation(animation_id)?;
    let (source_filename, source_path) = locate_spritesheet(storage, &animation)?;

    tracing::info!(
        animation_id,
        normalize = options.normalize,
        remove_background = options.remove_background,
        mode = %options.background_removal_mode,
        alpha_threshold = options.alpha_threshold.unwrap_or(0),
        "export started"
    );

    let fps = if animation.fps == 0 { config.export.default_fps } else { animation.fps };
    let frame_count = if animation.generated_frames.is_empty() {
        animation.actual_frame_count.unwrap_or(0)
    } else {
        animation.generated_frames.len()
    };

    let frames_dir = storage.frames_dir(animation_id);
    let source_files = list_frame_files(&frames_dir)?;

    let mut work = WorkingSet {
        atlas: Payload::File(source_path),
        frames: source_files
            .iter()
            .map(|name| FrameOut {
                filename: name.clone(),
                frame_index: frame_index_from_name(name),
                payload: Payload::File(frames_dir.join(name)),
            })
            .collect(),
        frame_size: animation.frame_size(),
        normalized: false,
    };

    if options.normalize {
        let settings = config.canvas.settings().with_overrides(options.anchor, options.scale);
        match normalize_stage(&work.frames, &settings, animation.sheet_columns) {
            Ok(Some(normalized)) => work = normalized,
            Ok(None) => {
                tracing::warn!(animation_id, "no frames to normalize, exporting original spritesheet")
            }
            Err(e) => {
                tracing::warn!(animation_id, error = %e, "normalization failed, falling back to original")
            }
        }
    }
    cancel.check()?;

    let (width, height) = work.atlas.dimensions()?;
    let preferred = animation.sprite_size.unwrap_or(config.export.preferred_frame_size);
    let (frame_width, frame_height) = match work.frame_size {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        (w, h) => {
            let inferred = infer_frame_size(width, height, preferred);
            (w.filter(|v| *v > 0).unwrap_or(inferred), h.filter(|v| *v > 0).unwrap_or(inferred))
        }
    };

    let export_filename = if work.normalized { NORMALIZED_SPRITESHEET.to_string() } else { source_filename };
    let threshold = effective_threshold(options.alpha_threshold);
    let mode = options.background_removal_mode;

    if options.remove_background {
        let extract_options = ExtractOptions::sized(frame_width, frame_height).with_count(frame_count);
        let removed = remover_from_config(config)
            .map_err(ExportError::BackgroundRemoval)
            .and_then(|remover| {
                remove_background_stage(&mut work, remover.as_ref(), mode, threshold, &extract_options, cancel)
            });
        if let Err(e) = removed {
            tracing::error!(animation_id, mode = %mode, error = %e, "background removal failed during export");
            return Err(e);
        }
    } else if let Some(t) = threshold {
        work.atlas = Payload::Image(clamped(&work.atlas.load()?, t));
        for frame in &mut work.frames {
            cancel.check()?;
            frame.payload = Payload::Image(clamped(&frame.payload.load()?, t));
        }
    }
    cancel.check()?;

    // Per-frame removal recomposes the atlas, so describe what is written.
    let (image_width, image_height) = work.atlas.dimensions()?;
    let aseprite = build_aseprite(&AtlasDescription {
        image: export_filename.clone(),
        image_width,
        image_height,
        frame_width,
        frame_height,
        fps,
        frame_count: (frame_count > 0).then_some(frame_count),
    });

    let zip_name = options.zip_bundle.then(|| format!("export_{}.zip", animation_id));
    let exports_dir = storage.exports_dir(animation_id);
    let staging = staging_dir_for(&exports_dir)?;
    if let Err(e) = write_artifacts(&staging, &work, &export_filename, &aseprite, fps, zip_name.as_deref(), cancel) {
        discard_dir(&staging);
        return Err(e);
    }
    publish_dir(&staging, &exports_dir)?;

    let exported_at = Utc::now();
    let has_frames = !work.frames.is_empty();
    let export_url = |name: &str| storage.url(animation_id, &format!("{}/{}", EXPORTS_DIR, name));
    let png_sequence_url = has_frames.then(|| export_url(&format!("{}/", FRAMES_DIR)));

    animation.exports = Some(ExportRecord {
        spritesheet_url: export_url(&export_filename),
        aseprite_json_hash_url: export_url(HASH_JSON),
        aseprite_json_array_url: export_url(ARRAY_JSON),
        png_sequence_url: png_sequence_url.clone(),
        png_sequence_index_url: has_frames.then(|| export_url(&format!("{}/{}", FRAMES_DIR, FRAMES_INDEX))),
        zip_bundle_url: zip_name.as_deref().map(export_url),
        normalized: work.normalized,
        background_removed: options.remove_background,
        background_removal_mode: options.remove_background.then_some(mode),
        alpha_threshold: threshold,
        last_exported_at: exported_at,
    });
    animation.updated_at = exported_at;
    storage.save_animation(&animation)?;

    tracing::info!(
        animation_id,
        export_filename = %export_filename,
        normalized = work.normalized,
        background_removed = options.remove_background,
        frames = work.frames.len(),
        "export completed"
    );

    Ok(ExportOutcome {
        animation,
        artifacts: ExportArtifacts {
            spritesheet_path: exports_dir.join(&export_filename),
            spritesheet_filename: export_filename,
            hash_path: exports_dir.join(HASH_JSON),
            array_path: exports_dir.join(ARRAY_JSON),
            frames_dir: has_frames.then(|| exports_dir.join(FRAMES_DIR)),
            zip_path: zip_name.map(|name| exports_dir.join(name)),
            png_sequence_url,
            normalized: work.normalized,
            background_removed: options.remove_background,
            background_removal_mode: mode,
            alpha_threshold: threshold,
            export_dir: exports_dir,
        },
        aseprite,
        exported_at,
    })
}

/// Find the generated spritesheet file the animation points at.
fn locate_spritesheet(storage: &Storage, animation: &Animation) -> Result<(String, PathBuf), ExportError> {
    let url = animation
        .generated_spritesheet
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or(ExportError::NoSpritesheet)?;

    let filename = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .ok_or_else(|| ExportError::InvalidSpritesheetPath(url.to_string()))?;

    let path = storage.generated_dir(&animation.id).join(filename);
    if !path.is_file() {
        return Err(ExportError::SpritesheetMissing(path));
    }

    let is_png = path
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if !is_png {
        return Err(ExportError::NotPng);
    }

    Ok((filename.to_string(), path))
}

/// Normalize every frame onto the canvas and pack them into a new atlas.
///
/// Returns `None` when there are no frames to work from.
fn normalize_stage(
    frames: &[FrameOut],
    settings: &NormalizeSettings,
    columns: Option<u32>,
) -> Result<Option<WorkingSet>, ExportError> {
    if frames.is_empty() {
        return Ok(None);
    }

    let images = frames.iter().map(|f| f.payload.load()).collect::<Result<Vec<_>, _>>()?;
    let batch = normalize_batch(&images, settings)?;

    let columns = columns.filter(|c| *c > 0).unwrap_or_else(|| default_columns(frames.len()));
    let layout = SpritesheetLayout::for_frames(settings.canvas_width, settings.canvas_height, columns, frames.len());

    let indexed: Vec<(usize, RgbaImage)> =
        frames.iter().map(|f| f.frame_index).zip(batch.frames).collect();
    let atlas = compose_indexed(&indexed, &layout)?;

    let frames = frames
        .iter()
        .zip(indexed)
        .map(|(source, (frame_index, image))| FrameOut {
            filename: source.filename.clone(),
            frame_index,
            payload: Payload::Image(image),
        })
        .collect();

    Ok(Some(WorkingSet {
        atlas: Payload::Image(atlas),
        frames,
        frame_size: (Some(settings.canvas_width), Some(settings.canvas_height)),
        normalized: true,
    }))
}

/// Remove the background from the atlas or from each frame, clamping alpha
/// at the same granularity.
fn remove_background_stage(
    work: &mut WorkingSet,
    remover: &dyn BackgroundRemover,
    mode: BackgroundRemovalMode,
    threshold: Option<u8>,
    extract_options: &ExtractOptions,
    cancel: &CancelToken,
) -> Result<(), ExportError> {
    let has_frames = !work.frames.is_empty();
    let atlas = work.atlas.load()?;

    match mode {
        BackgroundRemovalMode::Spritesheet => {
            let mut cleaned = remover.remove(&atlas).map_err(ExportError::BackgroundRemoval)?;
            if let Some(t) = threshold {
                clamp_alpha(&mut cleaned, t);
            }

            if has_frames {
                work.frames = extract(&cleaned, extract_options)?
                    .into_iter()
                    .enumerate()
                    .map(|(i, image)| FrameOut {
                        filename: frame_filename(i),
                        frame_index: i,
                        payload: Payload::Image(image),
                    })
                    .collect();
            }
            work.atlas = Payload::Image(cleaned);
        }
        BackgroundRemovalMode::PerFrame => {
            let layout = extract_options.resolve(atlas.width(), atlas.height())?;

            let (names, indices, images): (Vec<String>, Vec<usize>, Vec<RgbaImage>) = if has_frames {
                let mut names = Vec::with_capacity(work.frames.len());
                let mut indices = Vec::with_capacity(work.frames.len());
                let mut images = Vec::with_capacity(work.frames.len());
                for frame in &work.frames {
                    cancel.check()?;
                    names.push(frame.filename.clone());
                    indices.push(frame.frame_index);
                    images.push(frame.payload.load()?);
                }
                (names, indices, images)
            } else {
                let images = extract(&atlas, extract_options)?;
                let count = images.len();
                ((0..count).map(frame_filename).collect(), (0..count).collect(), images)
            };
            cancel.check()?;

            let mut cleaned = remover.remove_each(&images).map_err(ExportError::BackgroundRemoval)?;
            if let Some(t) = threshold {
                for frame in &mut cleaned {
                    clamp_alpha(frame, t);
                }
            }

            let indexed: Vec<(usize, RgbaImage)> = indices.into_iter().zip(cleaned).collect();
            work.atlas = Payload::Image(compose_indexed(&indexed, &layout)?);

            if has_frames {
                work.frames = names
                    .into_iter()
                    .zip(indexed)
                    .map(|(filename, (frame_index, image))| FrameOut {
                        filename,
                        frame_index,
                        payload: Payload::Image(image),
                    })
                    .collect();
            }
        }
    }

    Ok(())
}

/// Write every artifact into `dir`.
fn write_artifacts(
    dir: &Path,
    work: &WorkingSet,
    export_filename: &str,
    aseprite: &AsepriteDocs,
    fps: u32,
    zip_name: Option<&str>,
    cancel: &CancelToken,
) -> Result<(), ExportError> {
    let spritesheet_path = dir.join(export_filename);
    work.atlas.write_to(&spritesheet_path)?;
    write_json(&dir.join(HASH_JSON), &aseprite.hash)?;
    write_json(&dir.join(ARRAY_JSON), &aseprite.array)?;

    let frames_dir = dir.join(FRAMES_DIR);
    if !work.frames.is_empty() {
        fs::create_dir_all(&frames_dir).map_err(FrameError::from)?;
        for frame in &work.frames {
            cancel.check()?;
            frame.payload.write_to(&frames_dir.join(&frame.filename))?;
        }
        let entries: Vec<(String, usize)> =
            work.frames.iter().map(|f| (f.filename.clone(), f.frame_index)).collect();
        write_json(&frames_dir.join(FRAMES_INDEX), &build_index(&entries, fps))?;
    }

    if let Some(zip_name) = zip_name {
        write_archive(&dir.join(zip_name), cancel, |archive| {
            archive.add_file(&spritesheet_path, export_filename)?;
            archive.add_file(&dir.join(HASH_JSON), HASH_JSON)?;
            archive.add_file(&dir.join(ARRAY_JSON), ARRAY_JSON)?;
            if frames_dir.is_dir() {
                archive.add_dir(&frames_dir, FRAMES_DIR)?;
            }
            Ok(())
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::write_frames;
    use crate::models::{AnimationStatus, GeneratedFrame};
    use crate::spritesheet::compose;
    use image::Rgba;
    use tempfile::TempDir;

    const MAGENTA: Rgba<u8> = Rgba([255, 0, 255, 255]);
    const BODY: Rgba<u8> = Rgba([20, 90, 160, 255]);

    fn sprite_frame(size: u32, shift: u32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(size, size, MAGENTA);
        for y in size / 2..size {
            for x in shift..shift + size / 4 {
                img.put_pixel(x, y, BODY);
            }
        }
        img
    }

    fn setup(frame_count: usize, columns: u32) -> (TempDir, Storage, Vec<RgbaImage>) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path(), "/api/storage");
        let frames: Vec<RgbaImage> = (0..frame_count).map(|i| sprite_frame(8, i as u32 % 4)).collect();

        write_frames(&frames, &storage.frames_dir("a1")).unwrap();
        let layout = SpritesheetLayout::for_frames(8, 8, columns, frame_count);
        let sheet = compose(&frames, &layout).unwrap();
        save_png(&sheet, &storage.generated_dir("a1").join("spritesheet_1.png")).unwrap();

        let mut animation = Animation::new("a1", "Walk Cycle", frame_count);
        animation.status = AnimationStatus::Complete;
        animation.spritesheet_layout = Some(layout);
        animation.generated_spritesheet = Some(storage.url("a1", "generated/spritesheet_1.png"));
        animation.generated_frames = (0..frame_count)
            .map(|i| GeneratedFrame {
                frame_index: i,
                url: storage.url("a1", &format!("generated/frames/{}", frame_filename(i))),
                is_keyframe: false,
                generated_at: Utc::now(),
                source: "generation".into(),
            })
            .collect();
        storage.save_animation(&animation).unwrap();

        (temp, storage, frames)
    }

    fn run(storage: &Storage, options: &ExportOptions) -> Result<ExportOutcome, ExportError> {
        run_export(storage, &PipelineConfig::default(), "a1", options, &CancelToken::new())
    }

    #[test]
    fn test_plain_export_copies_verbatim() {
        let (_temp, storage, _) = setup(4, 2);
        let outcome = run(&storage, &ExportOptions::default()).unwrap();

        let source = fs::read(storage.generated_dir("a1").join("spritesheet_1.png")).unwrap();
        let exported = fs::read(&outcome.artifacts.spritesheet_path).unwrap();
        assert_eq!(source, exported);

        assert_eq!(outcome.artifacts.spritesheet_filename, "spritesheet_1.png");
        assert_eq!(outcome.aseprite.array.frames.len(), 4);
        assert_eq!(outcome.aseprite.array.frames[3].data.frame.x, 8);
        assert_eq!(outcome.aseprite.array.frames[3].data.frame.y, 8);

        let record = outcome.animation.exports.unwrap();
        assert_eq!(record.spritesheet_url, "/api/storage/animations/a1/exports/spritesheet_1.png");
        assert_eq!(record.png_sequence_url.as_deref(), Some("/api/storage/animations/a1/exports/frames/"));
        assert!(!record.normalized);
        assert!(!record.background_removed);
        assert_eq!(record.background_removal_mode, None);
    }

    #[test]
    fn test_frames_folder_and_index_written() {
        let (_temp, storage, _) = setup(3, 3);
        let outcome = run(&storage, &ExportOptions::default()).unwrap();
        let frames_dir = outcome.artifacts.frames_dir.unwrap();
        assert!(frames_dir.join("frame_002.png").is_file());

        let index: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(frames_dir.join(FRAMES_INDEX)).unwrap()).unwrap();
        assert_eq!(index["frames"][2]["filename"], "frame_002.png");
        assert_eq!(index["frames"][2]["frameIndex"], 2);
        assert_eq!(index["meta"]["frameRate"], 12);
    }

    #[test]
    fn test_spritesheet_removal_with_threshold() {
        let (_temp, storage, _) = setup(4, 2);
        let options = ExportOptions {
            remove_background: true,
            alpha_threshold: Some(16),
            ..Default::default()
        };
        let outcome = run(&storage, &options).unwrap();

        let atlas = load_rgba(&outcome.artifacts.spritesheet_path).unwrap();
        assert!(atlas.pixels().all(|p| p.0[3] == 0 || p.0[3] == 255));
        assert_eq!(atlas.get_pixel(0, 0).0[3], 0);

        let record = outcome.animation.exports.unwrap();
        assert!(record.background_removed);
        assert_eq!(record.background_removal_mode, Some(BackgroundRemovalMode::Spritesheet));
        assert_eq!(record.alpha_threshold, Some(16));
    }

    #[test]
    fn test_per_frame_removal_matches_spritesheet_removal() {
        let (_temp, storage, _) = setup(4, 2);
        let sheet = run(&storage, &ExportOptions { remove_background: true, ..Default::default() }).unwrap();
        let sheet_atlas = load_rgba(&sheet.artifacts.spritesheet_path).unwrap();

        let per_frame = run(
            &storage,
            &ExportOptions {
                remove_background: true,
                background_removal_mode: BackgroundRemovalMode::PerFrame,
                ..Default::default()
            },
        )
        .unwrap();
        let frame_atlas = load_rgba(&per_frame.artifacts.spritesheet_path).unwrap();
        assert_eq!(sheet_atlas, frame_atlas);
    }

    #[test]
    fn test_normalize_produces_canvas_sized_cells() {
        let (_temp, storage, _) = setup(3, 3);
        let mut config = PipelineConfig::default();
        config.canvas.width = 16;
        config.canvas.height = 32;
        let options = ExportOptions { normalize: true, ..Default::default() };

        let outcome = run_export(&storage, &config, "a1", &options, &CancelToken::new()).unwrap();
        assert_eq!(outcome.artifacts.spritesheet_filename, NORMALIZED_SPRITESHEET);
        let atlas = load_rgba(&outcome.artifacts.spritesheet_path).unwrap();
        // ceil(sqrt(3)) = 2 columns, 2 rows
        assert_eq!(atlas.dimensions(), (32, 64));
        assert_eq!(outcome.aseprite.array.frames[0].data.frame.w, 16);
        assert!(outcome.animation.exports.unwrap().normalized);
    }

    #[test]
    fn test_normalize_failure_falls_back() {
        let (_temp, storage, _) = setup(2, 2);
        let mut config = PipelineConfig::default();
        config.canvas.scale = 2.0;
        let options = ExportOptions { normalize: true, ..Default::default() };

        let outcome = run_export(&storage, &config, "a1", &options, &CancelToken::new()).unwrap();
        assert_eq!(outcome.artifacts.spritesheet_filename, "spritesheet_1.png");
        assert!(!outcome.animation.exports.unwrap().normalized);
    }

    #[test]
    fn test_removal_failure_is_hard_and_publishes_nothing() {
        let (_temp, storage, _) = setup(2, 2);
        run(&storage, &ExportOptions::default()).unwrap();
        let before = storage.load_animation("a1").unwrap().exports;

        let mut config = PipelineConfig::default();
        config.background.remover = crate::config::RemoverKind::Command;
        config.background.command = vec!["sforge-missing-remover".into()];
        let options = ExportOptions { remove_background: true, ..Default::default() };

        let err = run_export(&storage, &config, "a1", &options, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(storage.load_animation("a1").unwrap().exports, before);
        assert!(storage.exports_dir("a1").join("spritesheet_1.png").is_file());
    }

    #[test]
    fn test_error_kinds() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path(), "/api/storage");
        let err = run(&storage, &ExportOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        storage.save_animation(&Animation::new("a1", "Empty", 0)).unwrap();
        let err = run(&storage, &ExportOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::NoSpritesheet));
        assert_eq!(err.kind().status(), 400);
    }

    #[test]
    fn test_zip_bundle_written() {
        let (_temp, storage, _) = setup(2, 2);
        let options = ExportOptions { zip_bundle: true, ..Default::default() };
        let outcome = run(&storage, &options).unwrap();
        let zip_path = outcome.artifacts.zip_path.unwrap();
        assert!(zip_path.is_file());
        assert_eq!(
            outcome.animation.exports.unwrap().zip_bundle_url.as_deref(),
            Some("/api/storage/animations/a1/exports/export_a1.zip")
        );
    }

    #[test]
    fn test_reexport_overwrites() {
        let (_temp, storage, _) = setup(2, 2);
        run(&storage, &ExportOptions { zip_bundle: true, ..Default::default() }).unwrap();
        run(&storage, &ExportOptions::default()).unwrap();
        assert!(!storage.exports_dir("a1").join("export_a1.zip").exists());
        let animation = storage.load_animation("a1").unwrap();
        assert!(animation.exports.unwrap().zip_bundle_url.is_none());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(ExportOptions::parse_mode(true, Some("frames")).unwrap(), BackgroundRemovalMode::PerFrame);
        assert_eq!(ExportOptions::parse_mode(false, Some("bogus")).unwrap(), BackgroundRemovalMode::Spritesheet);
        let err = ExportOptions::parse_mode(true, Some("bogus")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
