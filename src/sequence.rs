//! Frame sequencing - orders raw frames and optionally mirrors them into a
//! ping-pong loop.

use chrono::Utc;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::frames::{frame_filename, save_png, FrameError};
use crate::models::GeneratedFrame;

/// How a raw frame run is turned into a playback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Frames play in order and wrap
    #[default]
    Loop,
    /// Frames play forward then back, without repeating the end frames
    Pingpong,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Loop => write!(f, "loop"),
            LoopMode::Pingpong => write!(f, "pingpong"),
        }
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loop" => Ok(LoopMode::Loop),
            "pingpong" | "ping-pong" => Ok(LoopMode::Pingpong),
            other => Err(format!("unknown loop mode '{}', expected loop or pingpong", other)),
        }
    }
}

/// Number of frames a sequence of `n` raw frames expands to.
pub fn sequence_len(n: usize, mode: LoopMode) -> usize {
    match mode {
        LoopMode::Loop => n,
        LoopMode::Pingpong if n <= 2 => n,
        LoopMode::Pingpong => 2 * n - 2,
    }
}

/// Expand raw items into a playback sequence.
///
/// For `pingpong`, `[f0..fn-1]` becomes `[f0..fn-1, fn-2..f1]`.
///
/// # Examples
///
/// ```
/// use spriteforge::sequence::{build_sequence, LoopMode};
///
/// let seq = build_sequence(&[0, 1, 2, 3], LoopMode::Pingpong);
/// assert_eq!(seq, vec![0, 1, 2, 3, 2, 1]);
/// ```
pub fn build_sequence<T: Clone>(items: &[T], mode: LoopMode) -> Vec<T> {
    let mut out = items.to_vec();
    if mode == LoopMode::Pingpong && items.len() > 2 {
        out.extend(items[1..items.len() - 1].iter().rev().cloned());
    }
    out
}

/// Write a sequenced run of frames into `out_dir` as `frame_NNN.png`.
///
/// `prepare` runs on every output frame before it is written (for example to
/// chroma-key it). Returns one [`GeneratedFrame`] per written file with a
/// dense zero-based index and the URL produced by `url_for(filename)`.
pub fn write_sequence<F, U>(
    raw: &[RgbaImage],
    mode: LoopMode,
    out_dir: &Path,
    source: &str,
    url_for: U,
    mut prepare: F,
) -> Result<Vec<GeneratedFrame>, FrameError>
where
    F: FnMut(&mut RgbaImage),
    U: Fn(&str) -> String,
{
    std::fs::create_dir_all(out_dir)?;

    let order: Vec<usize> = build_sequence(&(0..raw.len()).collect::<Vec<_>>(), mode);
    let mut generated = Vec::with_capacity(order.len());

    for (index, &raw_index) in order.iter().enumerate() {
        let mut frame = raw[raw_index].clone();
        prepare(&mut frame);

        let filename = frame_filename(index);
        save_png(&frame, &out_dir.join(&filename))?;

        generated.push(GeneratedFrame {
            frame_index: index,
            url: url_for(&filename),
            is_keyframe: false,
            generated_at: Utc::now(),
            source: source.to_string(),
        });
    }

    tracing::debug!(raw = raw.len(), total = generated.len(), mode = %mode, "sequence written");
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::load_frames_dir;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn test_loop_is_identity() {
        assert_eq!(build_sequence(&[1, 2, 3], LoopMode::Loop), vec![1, 2, 3]);
    }

    #[test]
    fn test_pingpong_short_inputs() {
        let empty: [u8; 0] = [];
        assert!(build_sequence(&empty, LoopMode::Pingpong).is_empty());
        assert_eq!(build_sequence(&[7], LoopMode::Pingpong), vec![7]);
        assert_eq!(build_sequence(&[7, 8], LoopMode::Pingpong), vec![7, 8]);
    }

    #[test]
    fn test_pingpong_lengths() {
        for n in 0..12 {
            let items: Vec<usize> = (0..n).collect();
            let seq = build_sequence(&items, LoopMode::Pingpong);
            assert_eq!(seq.len(), sequence_len(n, LoopMode::Pingpong));
            if n > 2 {
                assert_eq!(seq.len(), 2 * n - 2);
            } else {
                assert_eq!(seq.len(), n);
            }
        }
    }

    #[test]
    fn test_pingpong_five_frames() {
        let seq = build_sequence(&[0, 1, 2, 3, 4], LoopMode::Pingpong);
        assert_eq!(seq, vec![0, 1, 2, 3, 4, 3, 2, 1]);
        assert_eq!(seq[7], seq[1]);
        assert_eq!(seq[0], 0);
        assert_eq!(seq[4], 4);
    }

    #[test]
    fn test_loop_mode_parse() {
        assert_eq!("pingpong".parse::<LoopMode>().unwrap(), LoopMode::Pingpong);
        assert_eq!(" LOOP ".parse::<LoopMode>().unwrap(), LoopMode::Loop);
        assert!("bounce".parse::<LoopMode>().is_err());
    }

    #[test]
    fn test_write_sequence_dense_indices() {
        let temp = TempDir::new().unwrap();
        let raw: Vec<RgbaImage> = (0..3u8)
            .map(|i| RgbaImage::from_pixel(2, 2, Rgba([i * 50, 0, 0, 255])))
            .collect();

        let frames = write_sequence(
            &raw,
            LoopMode::Pingpong,
            temp.path(),
            "rebuild",
            |name| format!("/files/{}", name),
            |_| {},
        )
        .unwrap();

        assert_eq!(frames.len(), 4);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_index, i);
            assert_eq!(frame.source, "rebuild");
        }
        assert_eq!(frames[3].url, "/files/frame_003.png");

        let written = load_frames_dir(temp.path()).unwrap();
        assert_eq!(written[3].1, raw[1]);
    }
}
