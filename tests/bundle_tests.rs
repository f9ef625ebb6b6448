//! Batch export tests: parallel exports, folder naming and archive layout.

use image::{Rgba, RgbaImage};
use std::fs::File;
use std::io::Read;
use tempfile::TempDir;

use spriteforge::bundle::{export_batch, BatchRequest, BundleError};
use spriteforge::cancel::CancelToken;
use spriteforge::config::PipelineConfig;
use spriteforge::export::ErrorKind;
use spriteforge::frames::{save_png, write_frames};
use spriteforge::models::Animation;
use spriteforge::spritesheet::{compose, SpritesheetLayout};
use spriteforge::storage::Storage;

fn seed(storage: &Storage, id: &str, name: &str) {
    let frames: Vec<RgbaImage> = (0..4).map(|i| RgbaImage::from_pixel(8, 8, Rgba([i * 50, 10, 10, 255]))).collect();
    write_frames(&frames, &storage.frames_dir(id)).unwrap();
    let layout = SpritesheetLayout::for_frames(8, 8, 2, 4);
    save_png(&compose(&frames, &layout).unwrap(), &storage.generated_dir(id).join("sheet.png")).unwrap();

    let mut animation = Animation::new(id, name, 4);
    animation.spritesheet_layout = Some(layout);
    animation.generated_spritesheet = Some(storage.url(id, "generated/sheet.png"));
    storage.save_animation(&animation).unwrap();
}

fn entry_names(path: &std::path::Path) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len()).map(|i| archive.by_index(i).unwrap().name().to_string()).collect()
}

#[test]
fn test_batch_bundles_successes_and_reports_failures() {
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path(), "/api/storage");
    seed(&storage, "a1", "Hero Walk");
    seed(&storage, "a2", "Hero Walk");
    storage.save_animation(&Animation::new("a3", "No Sheet", 4)).unwrap();

    let mut config = PipelineConfig::default();
    config.batch.jobs = 2;
    let request = BatchRequest {
        animation_ids: vec!["a1".into(), "a2".into(), "a3".into()],
        name: Some("Release Candidate!".into()),
        ..Default::default()
    };

    let outcome = export_batch(&storage, &config, &request, &CancelToken::new()).unwrap();
    assert_eq!(outcome.exported, 2);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.archive_path.starts_with(storage.batch_dir()));

    let archive_name = outcome.archive_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(archive_name.starts_with("release_candidate_all_animations_"));
    assert_eq!(outcome.archive_url, format!("/api/storage/exports/batch/{}", archive_name));

    let failed = outcome.results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.animation_id, "a3");
    assert_eq!(failed.name, "No Sheet");
    assert!(failed.error.as_deref().unwrap().contains("No generated spritesheet"));

    let names = entry_names(&outcome.archive_path);
    assert!(names.contains(&"hero_walk/spritesheet.png".to_string()));
    assert!(names.contains(&"hero_walk_a2/spritesheet.png".to_string()));
    assert!(names.contains(&"hero_walk/frames/frame_003.png".to_string()));
    assert!(names.contains(&"hero_walk/frames/index.json".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("no_sheet")));

    let mut archive = zip::ZipArchive::new(File::open(&outcome.archive_path).unwrap()).unwrap();
    let mut json = String::new();
    archive.by_name("hero_walk/spritesheet-hash.json").unwrap().read_to_string(&mut json).unwrap();
    let hash: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(hash["meta"]["image"], "spritesheet.png");
}

#[test]
fn test_batch_with_no_successes_fails() {
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path(), "/api/storage");
    storage.save_animation(&Animation::new("a1", "Empty", 4)).unwrap();

    let request = BatchRequest { animation_ids: vec!["a1".into(), "ghost".into()], ..Default::default() };
    let err = export_batch(&storage, &PipelineConfig::default(), &request, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    match err {
        BundleError::NoSuccessfulExports(results) => {
            assert_eq!(results.len(), 2);
            assert_eq!(results[1].name, "ghost");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!storage.batch_dir().exists() || std::fs::read_dir(storage.batch_dir()).unwrap().count() == 0);
}

#[test]
fn test_batch_default_name() {
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path(), "/api/storage");
    seed(&storage, "a1", "Idle");

    let request = BatchRequest { animation_ids: vec!["a1".into()], name: Some("???".into()), ..Default::default() };
    let outcome = export_batch(&storage, &PipelineConfig::default(), &request, &CancelToken::new()).unwrap();
    let name = outcome.archive_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("batch_all_animations_"));
}
