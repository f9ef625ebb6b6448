//! Frame files: naming, discovery, and PNG load/save

use glob::glob;
use image::RgbaImage;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Error type for frame file operations
#[derive(Debug, Error)]
pub enum FrameError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Invalid directory pattern
    #[error("Invalid frame directory '{0}'")]
    Pattern(String),
}

/// Filename for the frame at `index`: `frame_000.png`, `frame_001.png`, ...
pub fn frame_filename(index: usize) -> String {
    format!("{}.png", frame_stem(index))
}

/// Filename without extension, as used by Aseprite metadata.
pub fn frame_stem(index: usize) -> String {
    format!("frame_{:03}", index)
}

fn frame_index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"frame_(\d+)").expect("static pattern is valid"))
}

/// Parse the numeric index out of a frame filename.
///
/// Names without a `frame_<digits>` part are treated as index 0.
pub fn frame_index_from_name(name: &str) -> usize {
    frame_index_pattern()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Keep only `.png` names and order them by frame index.
///
/// The sort is stable, so names sharing an index keep their input order.
pub fn sort_frame_files(mut names: Vec<String>) -> Vec<String> {
    names.retain(|n| n.ends_with(".png"));
    names.sort_by_key(|n| frame_index_from_name(n));
    names
}

/// List the frame files in a directory, ordered by frame index.
///
/// A missing directory yields an empty list.
pub fn list_frame_files(dir: &Path) -> Result<Vec<String>, FrameError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!("{}/*.png", glob::Pattern::escape(&dir.display().to_string()));
    let entries = glob(&pattern).map_err(|_| FrameError::Pattern(dir.display().to_string()))?;

    let names = entries
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    Ok(sort_frame_files(names))
}

/// Load an image file as RGBA.
pub fn load_rgba(path: &Path) -> Result<RgbaImage, FrameError> {
    Ok(image::open(path)?.to_rgba8())
}

/// Load every frame in a directory, in frame order.
pub fn load_frames_dir(dir: &Path) -> Result<Vec<(String, RgbaImage)>, FrameError> {
    list_frame_files(dir)?
        .into_iter()
        .map(|name| {
            let image = load_rgba(&dir.join(&name))?;
            Ok((name, image))
        })
        .collect()
}

/// Save an RGBA image to a PNG file, creating parent directories.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), FrameError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    image.save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

/// Write frames as `frame_NNN.png` into `dir`, returning the written paths.
pub fn write_frames(frames: &[RgbaImage], dir: &Path) -> Result<Vec<PathBuf>, FrameError> {
    std::fs::create_dir_all(dir)?;
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let path = dir.join(frame_filename(i));
            save_png(frame, &path)?;
            Ok(path)
        })
        .collect()
}

/// Read the width and height of a PNG from its header without decoding.
pub fn png_dimensions(path: &Path) -> Result<(u32, u32), FrameError> {
    Ok(image::image_dimensions(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn test_frame_filename_padding() {
        assert_eq!(frame_filename(0), "frame_000.png");
        assert_eq!(frame_filename(42), "frame_042.png");
        assert_eq!(frame_filename(1234), "frame_1234.png");
        assert_eq!(frame_stem(7), "frame_007");
    }

    #[test]
    fn test_frame_index_from_name() {
        assert_eq!(frame_index_from_name("frame_010.png"), 10);
        assert_eq!(frame_index_from_name("clip_frame_3.png"), 3);
        assert_eq!(frame_index_from_name("cover.png"), 0);
    }

    #[test]
    fn test_sort_frame_files_numeric_order() {
        let names = vec![
            "frame_10.png".to_string(),
            "index.json".to_string(),
            "frame_2.png".to_string(),
            "frame_001.png".to_string(),
        ];
        assert_eq!(
            sort_frame_files(names),
            vec!["frame_001.png", "frame_2.png", "frame_10.png"]
        );
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let files = list_frame_files(&temp.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_write_and_load_frames() {
        let temp = TempDir::new().unwrap();
        let frames = vec![
            RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])),
            RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255])),
        ];
        write_frames(&frames, temp.path()).unwrap();
        std::fs::write(temp.path().join("index.json"), "{}").unwrap();

        let loaded = load_frames_dir(temp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, "frame_000.png");
        assert_eq!(loaded[1].1, frames[1]);
        assert_eq!(png_dimensions(&temp.path().join("frame_001.png")).unwrap(), (2, 2));
    }
}
