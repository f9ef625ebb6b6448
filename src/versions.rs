//! Version snapshots of an animation's generated output.
//!
//! A version owns full copies of the working `generated/` and `keyframes/`
//! trees plus a `version.json` document holding the animation's
//! generation-relevant fields with every URL moved into the version's
//! namespace. Loading a version copies the trees back and moves the URLs
//! back into the working namespace.
//!
//! ```text
//! animations/<id>/versions/<vid>/generated/...
//! animations/<id>/versions/<vid>/keyframes/...
//! animations/<id>/versions/<vid>/version.json
//! ```

use chrono::Utc;
use std::fs;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::export::ErrorKind;
use crate::models::{Animation, AnimationVersion, VersionDocument, VersionSource};
use crate::storage::{
    check_id, read_json, remove_dir_if_exists, write_json, DirSwap, Storage, StorageError,
    GENERATED_DIR, KEYFRAMES_DIR, VERSION_FILE,
};

/// Error type for version operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VersionError {
    #[error("Animation not found: {0}")]
    AnimationNotFound(String),
    #[error("Version not found: {0}")]
    VersionNotFound(String),
    #[error(transparent)]
    Storage(StorageError),
    #[error("Version operation cancelled")]
    Cancelled,
}

impl VersionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VersionError::AnimationNotFound(_) | VersionError::VersionNotFound(_) => ErrorKind::NotFound,
            VersionError::Storage(StorageError::InvalidId(_)) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for VersionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AnimationNotFound(id) => VersionError::AnimationNotFound(id),
            StorageError::Cancelled(_) => VersionError::Cancelled,
            other => VersionError::Storage(other),
        }
    }
}

impl From<Cancelled> for VersionError {
    fn from(_: Cancelled) -> Self {
        VersionError::Cancelled
    }
}

/// The version list and the active version id.
pub fn list_versions(
    storage: &Storage,
    animation_id: &str,
) -> Result<(Vec<AnimationVersion>, Option<String>), VersionError> {
    let animation = storage.load_animation(animation_id)?;
    Ok((animation.versions, animation.active_version_id))
}

/// Snapshot the working state into a new version and make it active.
///
/// An empty or blank `name` becomes `Version <n>`, where `n` is the next
/// value of the animation's monotonic version counter.
pub fn create_version(
    storage: &Storage,
    animation_id: &str,
    name: Option<&str>,
    source: VersionSource,
    cancel: &CancelToken,
) -> Result<(Animation, AnimationVersion), VersionError> {
    let _lease = storage.lease(animation_id);
    let mut animation = storage.load_animation(animation_id)?;

    let stored = animation.version_counter.unwrap_or(0);
    let counter = stored.max(animation.versions.len() as u32) + 1;
    let now = Utc::now();
    let version = AnimationVersion {
        id: uuid::Uuid::new_v4().to_string(),
        name: clean_name(name).unwrap_or_else(|| format!("Version {}", counter)),
        created_at: now,
        updated_at: None,
        source,
    };

    if let Err(e) = write_snapshot(storage, &animation, &version, cancel) {
        if let Err(rm) = remove_dir_if_exists(&storage.version_dir(animation_id, &version.id)) {
            tracing::warn!(animation_id, version_id = %version.id, error = %rm, "failed to clean up version");
        }
        return Err(e);
    }

    animation.versions.push(version.clone());
    animation.active_version_id = Some(version.id.clone());
    animation.version_counter = Some(counter);
    animation.updated_at = now;
    storage.save_animation(&animation)?;

    tracing::info!(animation_id, version_id = %version.id, name = %version.name, "version created");
    Ok((animation, version))
}

/// Rename a version and overwrite its snapshot with the current working
/// state. The version becomes active.
pub fn save_version(
    storage: &Storage,
    animation_id: &str,
    version_id: &str,
    name: Option<&str>,
    cancel: &CancelToken,
) -> Result<(Animation, AnimationVersion), VersionError> {
    let _lease = storage.lease(animation_id);
    let mut animation = storage.load_animation(animation_id)?;

    let index = animation
        .versions
        .iter()
        .position(|v| v.id == version_id)
        .ok_or_else(|| VersionError::VersionNotFound(version_id.to_string()))?;

    let now = Utc::now();
    let mut version = animation.versions[index].clone();
    if let Some(name) = clean_name(name) {
        version.name = name;
    }
    version.updated_at = Some(now);

    write_snapshot(storage, &animation, &version, cancel)?;

    animation.versions[index] = version.clone();
    animation.active_version_id = Some(version.id.clone());
    animation.updated_at = now;
    storage.save_animation(&animation)?;

    tracing::info!(animation_id, version_id, name = %version.name, "version saved");
    Ok((animation, version))
}

/// Restore a version into the working area.
///
/// The working `generated/` and `keyframes/` trees are replaced, the export
/// directory is emptied and the export record and generation job cleared.
/// The trees and `animation.json` change together: if any step fails the
/// working area is left as it was.
pub fn load_version(
    storage: &Storage,
    animation_id: &str,
    version_id: &str,
    cancel: &CancelToken,
) -> Result<Animation, VersionError> {
    let _lease = storage.lease(animation_id);
    check_id(version_id)?;
    let mut animation = storage.load_animation(animation_id)?;

    let version_dir = storage.version_dir(animation_id, version_id);
    let document_path = version_dir.join(VERSION_FILE);
    if !document_path.is_file() {
        return Err(VersionError::VersionNotFound(version_id.to_string()));
    }
    let document: VersionDocument = read_json(&document_path)?;

    let mut swap = DirSwap::new();
    swap.stage_copy(&version_dir.join(GENERATED_DIR), &storage.generated_dir(animation_id), cancel)?;
    swap.stage_copy(&version_dir.join(KEYFRAMES_DIR), &storage.keyframes_dir(animation_id), cancel)?;
    swap.stage_empty(&storage.exports_dir(animation_id))?;

    let remap = storage.remap(animation_id, version_id);
    animation.apply_snapshot(document.snapshot.map_urls(|url| remap.to_working(url)));
    animation.active_version_id = Some(version_id.to_string());
    animation.generation_job = None;
    animation.exports = None;
    animation.updated_at = Utc::now();
    swap.commit(|| storage.save_animation(&animation))?;

    tracing::info!(animation_id, version_id, "version loaded");
    Ok(animation)
}

/// Delete a version. If it was active, the most recent remaining version
/// becomes active.
pub fn delete_version(storage: &Storage, animation_id: &str, version_id: &str) -> Result<Animation, VersionError> {
    let _lease = storage.lease(animation_id);
    check_id(version_id)?;
    let mut animation = storage.load_animation(animation_id)?;

    let before = animation.versions.len();
    animation.versions.retain(|v| v.id != version_id);
    if animation.versions.len() == before {
        return Err(VersionError::VersionNotFound(version_id.to_string()));
    }

    if animation.active_version_id.as_deref() == Some(version_id) {
        animation.active_version_id = animation.versions.last().map(|v| v.id.clone());
    }
    animation.updated_at = Utc::now();
    storage.save_animation(&animation)?;
    remove_dir_if_exists(&storage.version_dir(animation_id, version_id))?;

    tracing::info!(animation_id, version_id, "version deleted");
    Ok(animation)
}

fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string)
}

/// Copy the working trees into the version and write its document.
fn write_snapshot(
    storage: &Storage,
    animation: &Animation,
    version: &AnimationVersion,
    cancel: &CancelToken,
) -> Result<(), VersionError> {
    let version_dir = storage.version_dir(&animation.id, &version.id);
    fs::create_dir_all(&version_dir).map_err(StorageError::from)?;

    let mut swap = DirSwap::new();
    swap.stage_copy(&storage.generated_dir(&animation.id), &version_dir.join(GENERATED_DIR), cancel)?;
    swap.stage_copy(&storage.keyframes_dir(&animation.id), &version_dir.join(KEYFRAMES_DIR), cancel)?;

    let remap = storage.remap(&animation.id, &version.id);
    let document = VersionDocument {
        id: version.id.clone(),
        name: version.name.clone(),
        created_at: version.created_at,
        updated_at: version.updated_at,
        source: version.source,
        snapshot: animation.snapshot().map_urls(|url| remap.to_version(url)),
    };
    swap.commit(|| write_json(&version_dir.join(VERSION_FILE), &document))?;
    Ok(())
}
