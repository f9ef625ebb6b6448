//! Rebuilding an animation's generated output from its raw frames.
//!
//! Raw frames live in `generated/frames_raw/`. A rebuild sequences them,
//! chroma-keys every output frame, replaces `generated/frames/` and writes a
//! fresh `spritesheet_<ts>_rebuild.png`.

use chrono::Utc;
use image::RgbaImage;
use std::path::PathBuf;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::config::PipelineConfig;
use crate::export::ErrorKind;
use crate::frames::{frame_filename, load_frames_dir, save_png, write_frames, FrameError};
use crate::models::{Animation, AnimationStatus};
use crate::sequence::write_sequence;
use crate::spritesheet::{compose_dir, SpritesheetError, SpritesheetLayout};
use crate::storage::{
    check_id, discard_dir, publish_dir, staging_dir_for, Storage, StorageError, FRAMES_DIR, GENERATED_DIR,
};

/// Source tag recorded on rebuilt frames.
pub const REBUILD_SOURCE: &str = "rebuild";

/// Error type for rebuilds
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RebuildError {
    #[error("Animation not found: {0}")]
    AnimationNotFound(String),
    #[error("No raw frames found for animation {0}.")]
    NoRawFrames(String),
    #[error("Raw frames must share one size: frame {index} is {found_w}x{found_h}, expected {expected_w}x{expected_h}")]
    MixedFrameSizes {
        index: usize,
        expected_w: u32,
        expected_h: u32,
        found_w: u32,
        found_h: u32,
    },
    #[error(transparent)]
    Layout(#[from] SpritesheetError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Storage(StorageError),
    #[error("Rebuild cancelled")]
    Cancelled,
}

impl RebuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RebuildError::AnimationNotFound(_) => ErrorKind::NotFound,
            RebuildError::NoRawFrames(_)
            | RebuildError::MixedFrameSizes { .. }
            | RebuildError::Layout(_)
            | RebuildError::Storage(StorageError::InvalidId(_)) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for RebuildError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AnimationNotFound(id) => RebuildError::AnimationNotFound(id),
            StorageError::Cancelled(_) => RebuildError::Cancelled,
            other => RebuildError::Storage(other),
        }
    }
}

impl From<Cancelled> for RebuildError {
    fn from(_: Cancelled) -> Self {
        RebuildError::Cancelled
    }
}

/// Replace an animation's raw frames with `frames`, in order.
pub fn ingest_raw_frames(
    storage: &Storage,
    animation_id: &str,
    frames: &[RgbaImage],
) -> Result<Vec<PathBuf>, RebuildError> {
    check_id(animation_id)?;
    let _lease = storage.lease(animation_id);
    if !storage.animation_exists(animation_id) {
        return Err(RebuildError::AnimationNotFound(animation_id.to_string()));
    }

    let raw_dir = storage.raw_frames_dir(animation_id);
    let staging = staging_dir_for(&raw_dir)?;
    if let Err(e) = write_frames(frames, &staging) {
        discard_dir(&staging);
        return Err(e.into());
    }
    publish_dir(&staging, &raw_dir)?;

    tracing::debug!(animation_id, frames = frames.len(), "raw frames ingested");
    Ok((0..frames.len()).map(|i| raw_dir.join(frame_filename(i))).collect())
}

/// Re-run sequencing and keying over the raw frames and recompose the
/// spritesheet. Clears the export record.
pub fn rebuild_from_raw(
    storage: &Storage,
    config: &PipelineConfig,
    animation_id: &str,
    cancel: &CancelToken,
) -> Result<Animation, RebuildError> {
    let _lease = storage.lease(animation_id);
    let mut animation = storage.load_animation(animation_id)?;

    let raw_dir = storage.raw_frames_dir(animation_id);
    let raw: Vec<RgbaImage> = if raw_dir.is_dir() {
        load_frames_dir(&raw_dir)?.into_iter().map(|(_, image)| image).collect()
    } else {
        Vec::new()
    };
    let Some(first) = raw.first() else {
        return Err(RebuildError::NoRawFrames(animation_id.to_string()));
    };
    let (frame_width, frame_height) = first.dimensions();
    if let Some((index, frame)) = raw.iter().enumerate().find(|(_, f)| f.dimensions() != (frame_width, frame_height)) {
        return Err(RebuildError::MixedFrameSizes {
            index,
            expected_w: frame_width,
            expected_h: frame_height,
            found_w: frame.width(),
            found_h: frame.height(),
        });
    }
    cancel.check()?;

    let key = config.chroma.chroma_key();
    let frames_dir = storage.frames_dir(animation_id);
    let staging = staging_dir_for(&frames_dir)?;
    let generated = match write_sequence(
        &raw,
        animation.loop_mode,
        &staging,
        REBUILD_SOURCE,
        |name| storage.url(animation_id, &format!("{}/{}/{}", GENERATED_DIR, FRAMES_DIR, name)),
        |frame| {
            key.apply(frame);
        },
    ) {
        Ok(generated) => generated,
        Err(e) => {
            discard_dir(&staging);
            return Err(e.into());
        }
    };

    let columns = animation.sheet_columns.filter(|c| *c > 0).unwrap_or(config.export.default_columns);
    let layout = SpritesheetLayout::for_frames(frame_width, frame_height, columns, generated.len());
    let sheet = match compose_dir(&staging, &layout) {
        Ok(sheet) => sheet,
        Err(e) => {
            discard_dir(&staging);
            return Err(e.into());
        }
    };
    if let Err(e) = cancel.check() {
        discard_dir(&staging);
        return Err(e.into());
    }

    let sheet_name = format!("spritesheet_{}_rebuild.png", Utc::now().timestamp_millis());
    save_png(&sheet, &storage.generated_dir(animation_id).join(&sheet_name))?;
    publish_dir(&staging, &frames_dir)?;

    let now = Utc::now();
    animation.actual_frame_count = Some(generated.len());
    animation.generated_frames = generated;
    animation.spritesheet_layout = Some(layout);
    animation.generated_spritesheet = Some(storage.url(animation_id, &format!("{}/{}", GENERATED_DIR, sheet_name)));
    animation.status = AnimationStatus::Complete;
    animation.generation_note = Some(format!(
        "Rebuilt from {} raw frames ({}).",
        raw.len(),
        animation.loop_mode
    ));
    animation.exports = None;
    animation.updated_at = now;
    storage.save_animation(&animation)?;

    tracing::info!(
        animation_id,
        raw = raw.len(),
        frames = animation.generated_frames.len(),
        spritesheet = %sheet_name,
        "rebuild completed"
    );
    Ok(animation)
}
