//! Batch bundling: export several animations and pack them into one zip.
//!
//! Each successful export becomes a folder in the archive:
//!
//! ```text
//! <folder>/spritesheet.png
//! <folder>/spritesheet-array.json
//! <folder>/spritesheet-hash.json
//! <folder>/frames/...
//! ```
//!
//! Failed exports are reported but left out. Only a batch where nothing
//! succeeds is an error.

use chrono::Utc;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::cancel::{CancelToken, Cancelled};
use crate::config::PipelineConfig;
use crate::export::{run_export, ErrorKind, ExportOptions, ExportOutcome, ARRAY_JSON, HASH_JSON};
use crate::storage::FRAMES_DIR;

/// Longest folder or archive base name.
pub const MAX_NAME_LEN: usize = 50;

/// Image filename used inside every archive folder.
pub const BUNDLED_SPRITESHEET: &str = "spritesheet.png";

/// Error type for archive writing and batch export
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BundleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No animations selected.")]
    NoAnimations,
    /// Every export in the batch failed
    #[error("No animations could be exported.")]
    NoSuccessfulExports(Vec<BatchItemReport>),
    #[error("Failed to start batch workers: {0}")]
    ThreadPool(String),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl BundleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BundleError::NoAnimations | BundleError::NoSuccessfulExports(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

fn non_alnum() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static pattern is valid"))
}

/// Lowercase, collapse runs of anything outside `[a-z0-9]` to `_`, trim
/// underscores and cap at [`MAX_NAME_LEN`].
pub fn sanitize_name(value: &str) -> String {
    let lowered = value.to_lowercase();
    let replaced = non_alnum().replace_all(&lowered, "_");
    let mut name = replaced.trim_matches('_').to_string();
    name.truncate(MAX_NAME_LEN);
    name
}

/// Hands out unique archive folder names.
///
/// Resolution order for a taken name: `base`, `base_<id>`, `base_2`,
/// `base_3`, ...
#[derive(Debug, Default)]
pub struct FolderNamer {
    used: HashSet<String>,
}

impl FolderNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, name: &str, animation_id: &str) -> String {
        let safe_id = sanitize_name(animation_id);
        let safe_name = sanitize_name(name);
        let base = if !safe_name.is_empty() {
            safe_name
        } else if !safe_id.is_empty() {
            safe_id.clone()
        } else {
            "animation".to_string()
        };

        if self.used.insert(base.clone()) {
            return base;
        }

        if !safe_id.is_empty() && safe_id != base {
            let candidate = with_suffix(&base, &safe_id);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }

        let mut counter = 2usize;
        loop {
            let candidate = with_suffix(&base, &counter.to_string());
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// `base_suffix`, shortening `base` so the result fits [`MAX_NAME_LEN`].
fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_NAME_LEN.saturating_sub(suffix.len() + 1);
    let mut head = base.to_string();
    head.truncate(room);
    let mut name = format!("{}_{}", head, suffix);
    name.truncate(MAX_NAME_LEN);
    name
}

/// A zip archive being written.
pub struct Archive {
    writer: ZipWriter<File>,
    options: SimpleFileOptions,
    cancel: CancelToken,
}

impl Archive {
    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), BundleError> {
        self.writer.start_file(name, self.options)?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    pub fn add_file(&mut self, src: &Path, name: &str) -> Result<(), BundleError> {
        self.cancel.check()?;
        let bytes = fs::read(src)?;
        self.add_bytes(name, &bytes)
    }

    pub fn add_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<(), BundleError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.add_bytes(name, &bytes)
    }

    /// Add `dir` recursively under `prefix`, entries in name order.
    pub fn add_dir(&mut self, dir: &Path, prefix: &str) -> Result<(), BundleError> {
        self.writer.add_directory(format!("{}/", prefix), self.options)?;

        let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
            if entry.file_type()?.is_dir() {
                self.add_dir(&entry.path(), &name)?;
            } else {
                self.add_file(&entry.path(), &name)?;
            }
        }
        Ok(())
    }
}

/// Write a zip archive at `path`.
///
/// The archive is built under a `.partial` name and renamed into place only
/// after `build` succeeds and the archive is finalized. On failure or
/// cancellation the partial file is removed.
pub fn write_archive<F>(path: &Path, cancel: &CancelToken, build: F) -> Result<(), BundleError>
where
    F: FnOnce(&mut Archive) -> Result<(), BundleError>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let result = (|| {
        let mut archive = Archive {
            writer: ZipWriter::new(File::create(&partial)?),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            cancel: cancel.clone(),
        };
        build(&mut archive)?;
        cancel.check()?;
        archive.writer.finish()?.sync_all()?;
        fs::rename(&partial, path)?;
        Ok(())
    })();

    if let Err(e) = &result {
        tracing::error!(archive = %path.display(), error = %e, "failed to write archive");
        if let Err(rm) = fs::remove_file(&partial) {
            if rm.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %partial.display(), error = %rm, "failed to remove partial archive");
            }
        }
    }
    result
}

/// One animation's result within a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub animation_id: String,
    pub name: String,
    pub result: Result<ExportOutcome, String>,
}

/// Serializable per-animation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemReport {
    pub animation_id: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

/// What [`bundle`] wrote.
#[derive(Debug, Clone)]
pub struct BundleManifest {
    pub archive_path: PathBuf,
    pub exported: usize,
    pub failed: usize,
    pub reports: Vec<BatchItemReport>,
}

/// Pack the successful items into one archive at `archive_path`.
pub fn bundle(items: &[BatchItem], archive_path: &Path, cancel: &CancelToken) -> Result<BundleManifest, BundleError> {
    let mut namer = FolderNamer::new();
    let reports: Vec<BatchItemReport> = items
        .iter()
        .map(|item| BatchItemReport {
            animation_id: item.animation_id.clone(),
            name: item.name.clone(),
            success: item.result.is_ok(),
            error: item.result.as_ref().err().cloned(),
            folder: item.result.is_ok().then(|| namer.assign(&item.name, &item.animation_id)),
        })
        .collect();

    let exported = reports.iter().filter(|r| r.success).count();
    if exported == 0 {
        return Err(BundleError::NoSuccessfulExports(reports));
    }

    write_archive(archive_path, cancel, |archive| {
        for (item, report) in items.iter().zip(&reports) {
            let (Ok(outcome), Some(folder)) = (&item.result, &report.folder) else {
                continue;
            };
            let artifacts = &outcome.artifacts;
            let docs = outcome.aseprite.with_image(BUNDLED_SPRITESHEET);

            archive.add_file(&artifacts.spritesheet_path, &format!("{}/{}", folder, BUNDLED_SPRITESHEET))?;
            archive.add_json(&format!("{}/{}", folder, HASH_JSON), &docs.hash)?;
            archive.add_json(&format!("{}/{}", folder, ARRAY_JSON), &docs.array)?;
            if let Some(frames_dir) = artifacts.frames_dir.as_deref().filter(|d| d.is_dir()) {
                archive.add_dir(frames_dir, &format!("{}/{}", folder, FRAMES_DIR))?;
            }
        }
        Ok(())
    })?;

    Ok(BundleManifest {
        archive_path: archive_path.to_path_buf(),
        exported,
        failed: reports.len() - exported,
        reports,
    })
}

/// A batch export request.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub animation_ids: Vec<String>,
    /// Archive base name; sanitized, `batch` when empty
    pub name: Option<String>,
    pub options: ExportOptions,
}

/// Result of [`export_batch`].
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub archive_path: PathBuf,
    pub archive_url: String,
    pub exported: usize,
    pub failed: usize,
    pub results: Vec<BatchItemReport>,
}

fn build_pool(jobs: usize) -> Result<rayon::ThreadPool, BundleError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("sforge-batch-{}", i))
        .build()
        .map_err(|e| BundleError::ThreadPool(e.to_string()))
}

/// Export every requested animation in parallel and bundle the results into
/// `exports/batch/<name>_all_animations_<ts>.zip` below the storage root.
pub fn export_batch(
    storage: &crate::storage::Storage,
    config: &PipelineConfig,
    request: &BatchRequest,
    cancel: &CancelToken,
) -> Result<BatchOutcome, BundleError> {
    if request.animation_ids.is_empty() {
        return Err(BundleError::NoAnimations);
    }

    let pool = build_pool(config.batch_jobs())?;
    tracing::info!(animations = request.animation_ids.len(), jobs = pool.current_num_threads(), "batch export started");

    let items: Vec<BatchItem> = pool.install(|| {
        request
            .animation_ids
            .par_iter()
            .map(|id| match run_export(storage, config, id, &request.options, cancel) {
                Ok(outcome) => BatchItem {
                    animation_id: id.clone(),
                    name: outcome.animation.name.clone(),
                    result: Ok(outcome),
                },
                Err(e) => {
                    tracing::warn!(animation_id = %id, error = %e, "batch item failed");
                    let name = storage.load_animation(id).map(|a| a.name).unwrap_or_else(|_| id.clone());
                    BatchItem { animation_id: id.clone(), name, result: Err(e.to_string()) }
                }
            })
            .collect()
    });
    cancel.check()?;

    let safe_name = request
        .name
        .as_deref()
        .map(sanitize_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "batch".to_string());
    let archive_name = format!("{}_all_animations_{}.zip", safe_name, Utc::now().timestamp_millis());
    let archive_path = storage.batch_dir().join(&archive_name);

    let manifest = bundle(&items, &archive_path, cancel)?;
    tracing::info!(
        archive = %archive_name,
        exported = manifest.exported,
        failed = manifest.failed,
        "batch export completed"
    );

    Ok(BatchOutcome {
        archive_url: format!("{}/exports/batch/{}", storage.url_prefix().trim_end_matches('/'), archive_name),
        archive_path: manifest.archive_path,
        exported: manifest.exported,
        failed: manifest.failed,
        results: manifest.reports,
    })
}
