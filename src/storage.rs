//! File-backed animation storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! animations/<id>/animation.json
//! animations/<id>/generated/            spritesheets, frames/, frames_raw/
//! animations/<id>/keyframes/
//! animations/<id>/exports/              live export artifacts
//! animations/<id>/versions/<vid>/       version.json, generated/, keyframes/
//! exports/batch/                        batch archives
//! ```
//!
//! Documents are written to a temporary sibling and renamed into place.
//! Directory trees are built in a `.staging-<uuid>` sibling and published
//! with renames, so readers never observe a half-written tree.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::cancel::{CancelToken, Cancelled};
use crate::config::StorageConfig;
use crate::lease::{Lease, LeaseRegistry};
use crate::models::Animation;
use crate::paths::{AssetUrl, UrlRemap};

pub const ANIMATION_FILE: &str = "animation.json";
pub const GENERATED_DIR: &str = "generated";
pub const FRAMES_DIR: &str = "frames";
pub const RAW_FRAMES_DIR: &str = "frames_raw";
pub const KEYFRAMES_DIR: &str = "keyframes";
pub const EXPORTS_DIR: &str = "exports";
pub const VERSIONS_DIR: &str = "versions";
pub const VERSION_FILE: &str = "version.json";

const STAGING_PREFIX: &str = ".staging-";

/// Error type for storage operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Animation not found: {0}")]
    AnimationNotFound(String),
    #[error("Invalid identifier '{0}'")]
    InvalidId(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Handle to a storage root. Clones share one lease registry.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    url_prefix: String,
    leases: Arc<LeaseRegistry>,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            leases: Arc::new(LeaseRegistry::new()),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.root, &config.url_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Take the exclusive lease for an animation, blocking until it is free.
    pub fn lease(&self, animation_id: &str) -> Lease<'_> {
        self.leases.acquire(animation_id)
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    pub fn animation_dir(&self, id: &str) -> PathBuf {
        self.root.join("animations").join(id)
    }

    pub fn animation_file(&self, id: &str) -> PathBuf {
        self.animation_dir(id).join(ANIMATION_FILE)
    }

    pub fn generated_dir(&self, id: &str) -> PathBuf {
        self.animation_dir(id).join(GENERATED_DIR)
    }

    pub fn frames_dir(&self, id: &str) -> PathBuf {
        self.generated_dir(id).join(FRAMES_DIR)
    }

    pub fn raw_frames_dir(&self, id: &str) -> PathBuf {
        self.generated_dir(id).join(RAW_FRAMES_DIR)
    }

    pub fn keyframes_dir(&self, id: &str) -> PathBuf {
        self.animation_dir(id).join(KEYFRAMES_DIR)
    }

    pub fn exports_dir(&self, id: &str) -> PathBuf {
        self.animation_dir(id).join(EXPORTS_DIR)
    }

    pub fn version_dir(&self, id: &str, version_id: &str) -> PathBuf {
        self.animation_dir(id).join(VERSIONS_DIR).join(version_id)
    }

    pub fn batch_dir(&self) -> PathBuf {
        self.root.join(EXPORTS_DIR).join("batch")
    }

    /// Working-scope URL for a file below an animation's directory.
    pub fn url(&self, id: &str, relative: &str) -> String {
        AssetUrl::working(&self.url_prefix, id, relative).to_string()
    }

    /// URL remapper between an animation's working area and one version.
    pub fn remap<'a>(&'a self, id: &'a str, version_id: &'a str) -> UrlRemap<'a> {
        UrlRemap::new(&self.url_prefix, id, version_id)
    }

    /// Filesystem path for a storage URL, or `None` if it is not one.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        let relative = Path::new(relative);
        let safe = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }

    pub fn animation_exists(&self, id: &str) -> bool {
        self.animation_file(id).is_file()
    }

    pub fn load_animation(&self, id: &str) -> Result<Animation, StorageError> {
        check_id(id)?;
        let path = self.animation_file(id);
        if !path.is_file() {
            return Err(StorageError::AnimationNotFound(id.to_string()));
        }
        read_json(&path)
    }

    pub fn save_animation(&self, animation: &Animation) -> Result<(), StorageError> {
        check_id(&animation.id)?;
        write_json(&self.animation_file(&animation.id), animation)
    }

    /// IDs of every stored animation, sorted.
    pub fn list_animations(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join("animations");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().join(ANIMATION_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reject identifiers that would escape their directory.
pub fn check_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.starts_with(STAGING_PREFIX);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| StorageError::Json { path: path.to_path_buf(), source })
}

/// Pretty-print `value` to a temporary sibling, then rename it over `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let contents = serde_json::to_string_pretty(value)
        .map_err(|source| StorageError::Json { path: path.to_path_buf(), source })?;
    write_atomic(path, contents.as_bytes())
}

/// Write bytes to a temporary sibling, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    fs::write(&temp, contents)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, checking `cancel` between files.
///
/// Symlinks and other special files are skipped.
pub fn copy_dir(src: &Path, dst: &Path, cancel: &CancelToken) -> Result<u64, StorageError> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        cancel.check()?;
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copied += copy_dir(&entry.path(), &target, cancel)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// A fresh staging directory next to `dest`.
pub fn staging_dir_for(dest: &Path) -> Result<PathBuf, StorageError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let staging = parent.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
    fs::create_dir(&staging)?;
    Ok(staging)
}

/// Replace `dest` with `staging` using renames.
///
/// The old tree is moved aside first and restored if the swap fails.
pub fn publish_dir(staging: &Path, dest: &Path) -> Result<(), StorageError> {
    if let Some(backup) = swap_in(staging, dest)? {
        remove_quietly(&backup);
    }
    Ok(())
}

/// Move whatever sits at `dest` aside and rename `staging` into its place.
///
/// Returns the moved-aside path. On failure `dest` is put back.
fn swap_in(staging: &Path, dest: &Path) -> io::Result<Option<PathBuf>> {
    let backup = if fs::symlink_metadata(dest).is_ok() {
        let backup = dest.with_file_name(format!("{}old-{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        fs::rename(dest, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, dest) {
        tracing::error!(dest = %dest.display(), error = %e, "failed to publish directory");
        if let Some(backup) = &backup {
            if let Err(restore) = fs::rename(backup, dest) {
                tracing::error!(dest = %dest.display(), error = %restore, "failed to restore directory");
            }
        }
        return Err(e);
    }
    Ok(backup)
}

/// Remove a file or directory tree, logging failures.
fn remove_quietly(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove old output");
    }
}

/// Several directory replacements published as one unit.
///
/// Trees are built in staging siblings first. [`DirSwap::commit`] renames
/// them all into place and runs a final step; if any rename or that step
/// fails, every destination is put back the way it was. Staging left by a
/// dropped, uncommitted swap is discarded.
#[derive(Debug, Default)]
pub struct DirSwap {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl DirSwap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a full copy of `src` for `dest`; a missing `src` stages an
    /// empty directory.
    pub fn stage_copy(&mut self, src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), StorageError> {
        if fs::symlink_metadata(src).is_ok() && !src.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a directory", src.display()),
            )));
        }
        let staging = self.stage_empty(dest)?;
        if src.is_dir() {
            copy_dir(src, &staging, cancel)?;
        }
        Ok(())
    }

    /// Stage an empty directory for `dest`.
    pub fn stage_empty(&mut self, dest: &Path) -> Result<PathBuf, StorageError> {
        let staging = staging_dir_for(dest)?;
        self.staged.push((staging.clone(), dest.to_path_buf()));
        Ok(staging)
    }

    /// Publish every staged tree, then run `finish`.
    pub fn commit<T, E, F>(mut self, finish: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut pending = std::mem::take(&mut self.staged).into_iter();
        let mut published: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();

        while let Some((staging, dest)) = pending.next() {
            match swap_in(&staging, &dest) {
                Ok(backup) => published.push((dest, backup)),
                Err(e) => {
                    discard_dir(&staging);
                    for (staging, _) in pending.by_ref() {
                        discard_dir(&staging);
                    }
                    roll_back(published);
                    return Err(StorageError::from(e).into());
                }
            }
        }

        match finish() {
            Ok(value) => {
                for backup in published.into_iter().filter_map(|(_, backup)| backup) {
                    remove_quietly(&backup);
                }
                Ok(value)
            }
            Err(e) => {
                roll_back(published);
                Err(e)
            }
        }
    }
}

impl Drop for DirSwap {
    fn drop(&mut self) {
        for (staging, _) in self.staged.drain(..) {
            discard_dir(&staging);
        }
    }
}

/// Undo published swaps, newest first.
fn roll_back(published: Vec<(PathBuf, Option<PathBuf>)>) {
    for (dest, backup) in published.into_iter().rev() {
        remove_quietly(&dest);
        if let Some(backup) = backup {
            if let Err(e) = fs::rename(&backup, &dest) {
                tracing::error!(dest = %dest.display(), error = %e, "failed to roll back directory");
            }
        }
    }
}

/// Remove a directory tree, ignoring a missing one.
pub fn remove_dir_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Best-effort removal of abandoned staging output.
pub fn discard_dir(path: &Path) {
    if let Err(e) = remove_dir_if_exists(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove staging directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, Storage) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path(), "/api/storage/");
        (temp, storage)
    }

    #[test]
    fn test_layout_paths() {
        let (temp, storage) = storage();
        assert_eq!(storage.frames_dir("a"), temp.path().join("animations/a/generated/frames"));
        assert_eq!(storage.version_dir("a", "v"), temp.path().join("animations/a/versions/v"));
        assert_eq!(storage.batch_dir(), temp.path().join("exports/batch"));
    }

    #[test]
    fn test_url_and_path_for_url() {
        let (temp, storage) = storage();
        let url = storage.url("a", "exports/spritesheet.png");
        assert_eq!(url, "/api/storage/animations/a/exports/spritesheet.png");
        assert_eq!(storage.path_for_url(&url).unwrap(), temp.path().join("animations/a/exports/spritesheet.png"));
        assert!(storage.path_for_url("/api/storage/../etc/passwd").is_none());
        assert!(storage.path_for_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn test_load_missing_animation() {
        let (_temp, storage) = storage();
        assert!(matches!(storage.load_animation("nope"), Err(StorageError::AnimationNotFound(_))));
        assert!(matches!(storage.load_animation("../x"), Err(StorageError::InvalidId(_))));
    }

    #[test]
    fn test_save_and_list() {
        let (_temp, storage) = storage();
        storage.save_animation(&Animation::new("b", "B", 1)).unwrap();
        storage.save_animation(&Animation::new("a", "A", 1)).unwrap();
        assert_eq!(storage.list_animations().unwrap(), vec!["a", "b"]);
        assert_eq!(storage.load_animation("a").unwrap().name, "A");
    }

    #[test]
    fn test_write_json_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.json");
        write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json(&path, &serde_json::json!({"a": 2})).unwrap();
        let names: Vec<_> = fs::read_dir(temp.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1);
        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["a"], 2);
    }

    fn replace(src: &Path, dest: &Path, cancel: &CancelToken) -> Result<(), StorageError> {
        let mut swap = DirSwap::new();
        swap.stage_copy(src, dest, cancel)?;
        swap.commit(|| Ok(()))
    }

    fn staging_entries(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count()
    }

    #[test]
    fn test_swap_replaces_with_copy() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("nested/a.txt"), "a").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        replace(&src, &dest, &CancelToken::new()).unwrap();

        assert_eq!(fs::read_to_string(dest.join("nested/a.txt")).unwrap(), "a");
        assert!(!dest.join("stale.txt").exists());
        assert_eq!(staging_entries(temp.path()), 0);
    }

    #[test]
    fn test_swap_with_missing_source_empties_dest() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        replace(&temp.path().join("missing"), &dest, &CancelToken::new()).unwrap();
        assert!(dest.is_dir());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_copy_keeps_destination() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "keep").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = replace(&src, &dest, &cancel).unwrap_err();

        assert!(matches!(err, StorageError::Cancelled(_)));
        assert!(dest.join("keep.txt").exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_swap_rolls_back_when_finish_fails() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("new.txt"), "new").unwrap();
        let existing = temp.path().join("existing");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("old.txt"), "old").unwrap();
        let stray = temp.path().join("stray");
        fs::write(&stray, "file").unwrap();
        let fresh = temp.path().join("fresh");

        let mut swap = DirSwap::new();
        swap.stage_copy(&src, &existing, &CancelToken::new()).unwrap();
        swap.stage_empty(&stray).unwrap();
        swap.stage_empty(&fresh).unwrap();
        let result: Result<(), StorageError> =
            swap.commit(|| Err(StorageError::AnimationNotFound("a".into())));

        assert!(matches!(result, Err(StorageError::AnimationNotFound(_))));
        assert_eq!(fs::read_to_string(existing.join("old.txt")).unwrap(), "old");
        assert!(!existing.join("new.txt").exists());
        assert_eq!(fs::read_to_string(&stray).unwrap(), "file");
        assert!(!fresh.exists());
        assert_eq!(staging_entries(temp.path()), 0);
    }

    #[test]
    fn test_dropped_swap_discards_staging() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("dest");
        {
            let mut swap = DirSwap::new();
            swap.stage_empty(&dest).unwrap();
            assert_eq!(staging_entries(temp.path()), 1);
        }
        assert_eq!(staging_entries(temp.path()), 0);
        assert!(!dest.exists());
    }

    #[test]
    fn test_stage_copy_rejects_file_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::write(&src, "file").unwrap();
        let mut swap = DirSwap::new();
        assert!(matches!(
            swap.stage_copy(&src, &temp.path().join("dest"), &CancelToken::new()),
            Err(StorageError::Io(_))
        ));
    }
}
