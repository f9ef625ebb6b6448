//! Standalone image commands: layout, compose, extract, key, clamp and
//! normalize. These work on plain files and never touch animation storage.

use std::path::Path;
use std::process::ExitCode;

use crate::alpha::{clamp_alpha, clamp_alpha_threshold};
use crate::chroma::ChromaKey;
use crate::color::parse_key_color;
use crate::frames::{load_frames_dir, load_rgba, save_png, write_frames};
use crate::metadata::{build_aseprite, AtlasDescription};
use crate::normalize::{normalize_batch, Anchor};
use crate::spritesheet::{compose, default_columns, extract_to_dir, ExtractOptions, SpritesheetLayout};
use crate::storage::write_json;

use super::{Context, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};

/// Print the layout for `frames` cells as JSON.
pub fn run_layout(frames: usize, frame_width: u32, frame_height: Option<u32>, columns: Option<u32>) -> ExitCode {
    if frame_width == 0 || frame_height == Some(0) {
        eprintln!("Error: frame size must be positive");
        return ExitCode::from(EXIT_INVALID_ARGS);
    }
    let columns = columns.unwrap_or_else(|| default_columns(frames));
    let layout = SpritesheetLayout::for_frames(frame_width, frame_height.unwrap_or(frame_width), columns, frames);

    match serde_json::to_string_pretty(&layout) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

pub fn run_compose(
    ctx: &Context,
    frames_dir: &Path,
    output: &Path,
    columns: Option<u32>,
    metadata: bool,
    fps: Option<u32>,
) -> ExitCode {
    let frames: Vec<_> = match load_frames_dir(frames_dir) {
        Ok(frames) => frames.into_iter().map(|(_, image)| image).collect(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    let Some(first) = frames.first() else {
        eprintln!("Error: no frame PNGs found in '{}'", frames_dir.display());
        return ExitCode::from(EXIT_INVALID_ARGS);
    };

    let columns = columns.unwrap_or_else(|| default_columns(frames.len()));
    let layout = SpritesheetLayout::for_frames(first.width(), first.height(), columns, frames.len());
    let sheet = match compose(&frames, &layout) {
        Ok(sheet) => sheet,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    if let Err(e) = save_png(&sheet, output) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    if metadata {
        let image = output.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let docs = build_aseprite(&AtlasDescription {
            image,
            image_width: layout.width,
            image_height: layout.height,
            frame_width: layout.frame_width,
            frame_height: layout.frame_height,
            fps: fps.unwrap_or(ctx.config.export.default_fps),
            frame_count: Some(frames.len()),
        });
        let array_path = output.with_file_name(format!("{}-array.json", file_stem(output)));
        let hash_path = output.with_file_name(format!("{}-hash.json", file_stem(output)));
        if let Err(e) = write_json(&array_path, &docs.array).and_then(|_| write_json(&hash_path, &docs.hash)) {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    }

    println!(
        "{}: {} frames, {}x{} grid, {}x{}",
        output.display(),
        frames.len(),
        layout.columns,
        layout.rows,
        layout.width,
        layout.height
    );
    ExitCode::from(EXIT_SUCCESS)
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "spritesheet".to_string())
}

pub fn run_extract(
    input: &Path,
    output: &Path,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    frames: Option<usize>,
) -> ExitCode {
    let atlas = match load_rgba(input) {
        Ok(atlas) => atlas,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let options = ExtractOptions { frame_width, frame_height, frame_count: frames.filter(|n| *n > 0) };
    match extract_to_dir(&atlas, &options, output) {
        Ok((layout, written)) => {
            println!(
                "Extracted {} frames ({}x{}) into {}",
                written.len(),
                layout.frame_width,
                layout.frame_height,
                output.display()
            );
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_INVALID_ARGS)
        }
    }
}

pub fn run_key(ctx: &Context, input: &Path, output: &Path, color: Option<&str>, tolerance: Option<u8>) -> ExitCode {
    let mut key = ctx.config.chroma.chroma_key();
    if let Some(color) = color {
        match parse_key_color(color) {
            Ok(c) => key = ChromaKey::new(c, key.tolerance),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_INVALID_ARGS);
            }
        }
    }
    if let Some(tolerance) = tolerance {
        key.tolerance = tolerance;
    }

    let mut image = match load_rgba(input) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    let cleared = key.apply(&mut image);
    if let Err(e) = save_png(&image, output) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    println!("Keyed {} pixels ({} ±{}) -> {}", cleared, key.color, key.tolerance, output.display());
    ExitCode::from(EXIT_SUCCESS)
}

pub fn run_clamp(input: &Path, output: &Path, threshold: f64) -> ExitCode {
    let Some(threshold) = clamp_alpha_threshold(threshold) else {
        eprintln!("Error: threshold must be a finite number");
        return ExitCode::from(EXIT_INVALID_ARGS);
    };

    let mut image = match load_rgba(input) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    if threshold > 0 {
        clamp_alpha(&mut image, threshold);
    }
    if let Err(e) = save_png(&image, output) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    println!("Clamped alpha at {} -> {}", threshold, output.display());
    ExitCode::from(EXIT_SUCCESS)
}

pub fn run_normalize(
    ctx: &Context,
    frames_dir: &Path,
    output: &Path,
    width: Option<u32>,
    height: Option<u32>,
    anchor: Option<&str>,
    scale: Option<f64>,
    per_frame_bounds: bool,
) -> ExitCode {
    let anchor = match anchor.map(str::parse::<Anchor>).transpose() {
        Ok(anchor) => anchor,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let mut settings = ctx.config.canvas.settings().with_overrides(anchor, scale);
    if let Some(width) = width {
        settings.canvas_width = width;
    }
    if let Some(height) = height {
        settings.canvas_height = height;
    }
    if per_frame_bounds {
        settings.consistent_bounds = false;
    }

    let frames: Vec<_> = match load_frames_dir(frames_dir) {
        Ok(frames) => frames.into_iter().map(|(_, image)| image).collect(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let batch = match normalize_batch(&frames, &settings) {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };
    if let Err(e) = write_frames(&batch.frames, output) {
        eprintln!("Error: {}", e);
        return ExitCode::from(EXIT_ERROR);
    }

    println!(
        "Normalized {} frames onto {}x{} ({}) -> {}",
        batch.frames.len(),
        settings.canvas_width,
        settings.canvas_height,
        settings.anchor,
        output.display()
    );
    ExitCode::from(EXIT_SUCCESS)
}
