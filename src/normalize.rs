//! Canvas normalization - redraws frames onto a fixed canvas.
//!
//! Content is cropped to its alpha bounds, scaled so it fills `scale` of the
//! canvas height (shrunk further if it would overflow the width), then placed
//! so its anchor point touches the canvas anchor point.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for normalization
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NormalizeError {
    /// Settings cannot produce a canvas
    #[error("Invalid normalization settings: {0}")]
    InvalidSettings(String),
    /// Nothing to normalize
    #[error("No frames to normalize")]
    Empty,
}

/// Canvas reference point the content is aligned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    /// Feet at bottom center (platformers)
    #[default]
    BottomCenter,
    /// Sprite center (top-down games)
    Center,
    BottomLeft,
    BottomRight,
    /// Head at top center (hanging sprites)
    TopCenter,
}

impl Anchor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::BottomCenter => "bottom-center",
            Anchor::Center => "center",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomRight => "bottom-right",
            Anchor::TopCenter => "top-center",
        }
    }

    /// Top-left position of `content` sized content on a `canvas` sized canvas.
    ///
    /// Content wider or taller than the canvas yields negative offsets.
    pub fn position(&self, content: (u32, u32), canvas: (u32, u32)) -> (i64, i64) {
        let (cw, ch) = (content.0 as i64, content.1 as i64);
        let (w, h) = (canvas.0 as i64, canvas.1 as i64);
        let centered_x = ((w - cw) as f64 / 2.0).round() as i64;

        match self {
            Anchor::BottomCenter => (centered_x, h - ch),
            Anchor::Center => (centered_x, ((h - ch) as f64 / 2.0).round() as i64),
            Anchor::BottomLeft => (0, h - ch),
            Anchor::BottomRight => (w - cw, h - ch),
            Anchor::TopCenter => (centered_x, 0),
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "bottom-center" => Ok(Anchor::BottomCenter),
            "center" => Ok(Anchor::Center),
            "bottom-left" => Ok(Anchor::BottomLeft),
            "bottom-right" => Ok(Anchor::BottomRight),
            "top-center" => Ok(Anchor::TopCenter),
            other => Err(format!("unknown anchor '{}'", other)),
        }
    }
}

/// Inputs to the normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeSettings {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub anchor: Anchor,
    /// Fraction of canvas height the content fills, in `(0, 1]`
    pub scale: f64,
    /// Nearest-neighbor resampling instead of Lanczos3
    pub pixel_art: bool,
    /// Use one bounding box, the union of every frame's, for the whole batch
    pub consistent_bounds: bool,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self {
            canvas_width: 256,
            canvas_height: 512,
            anchor: Anchor::BottomCenter,
            scale: 0.8,
            pixel_art: true,
            consistent_bounds: true,
        }
    }
}

impl NormalizeSettings {
    /// Apply per-character anchor/scale overrides.
    pub fn with_overrides(mut self, anchor: Option<Anchor>, scale: Option<f64>) -> Self {
        if let Some(anchor) = anchor {
            self.anchor = anchor;
        }
        if let Some(scale) = scale {
            self.scale = scale;
        }
        self
    }

    fn validate(&self) -> Result<(), NormalizeError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(NormalizeError::InvalidSettings(format!(
                "canvas {}x{}",
                self.canvas_width, self.canvas_height
            )));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(NormalizeError::InvalidSettings(format!("scale {}", self.scale)));
        }
        Ok(())
    }

    fn filter(&self) -> FilterType {
        if self.pixel_art {
            FilterType::Nearest
        } else {
            FilterType::Lanczos3
        }
    }
}

/// Bounding box of non-transparent content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ContentBounds {
    /// Smallest box containing both.
    pub fn union(&self, other: &ContentBounds) -> ContentBounds {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        ContentBounds { x, y, width: right - x, height: bottom - y }
    }
}

/// Find the alpha > 0 bounding box. A fully transparent image yields the
/// whole image.
pub fn detect_content_bounds(image: &RgbaImage) -> ContentBounds {
    let (width, height) = image.dimensions();
    let mut min = (u32::MAX, u32::MAX);
    let mut max = (0u32, 0u32);
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] > 0 {
            found = true;
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
    }

    if !found {
        return ContentBounds { x: 0, y: 0, width, height };
    }

    ContentBounds { x: min.0, y: min.1, width: max.0 - min.0 + 1, height: max.1 - min.1 + 1 }
}

/// Size the content is scaled to on the canvas.
pub fn target_size(bounds: &ContentBounds, settings: &NormalizeSettings) -> (u32, u32) {
    let aspect = bounds.width.max(1) as f64 / bounds.height.max(1) as f64;
    let mut height = (settings.canvas_height as f64 * settings.scale).round();
    let mut width = (height * aspect).round();

    if width > settings.canvas_width as f64 {
        width = settings.canvas_width as f64;
        height = (width / aspect).round();
    }

    ((width as u32).max(1), (height as u32).max(1))
}

/// Normalize one frame using `bounds`, or its own content bounds if `None`.
pub fn normalize_frame(
    frame: &RgbaImage,
    settings: &NormalizeSettings,
    bounds: Option<ContentBounds>,
) -> Result<RgbaImage, NormalizeError> {
    settings.validate()?;
    let bounds = bounds.unwrap_or_else(|| detect_content_bounds(frame));

    let content = imageops::crop_imm(frame, bounds.x, bounds.y, bounds.width, bounds.height).to_image();
    let (w, h) = target_size(&bounds, settings);
    let scaled = imageops::resize(&content, w, h, settings.filter());

    let (x, y) = settings
        .anchor
        .position((w, h), (settings.canvas_width, settings.canvas_height));

    let mut canvas = RgbaImage::from_pixel(settings.canvas_width, settings.canvas_height, Rgba([0, 0, 0, 0]));
    imageops::replace(&mut canvas, &scaled, x, y);
    Ok(canvas)
}

/// Result of normalizing a batch.
#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub frames: Vec<RgbaImage>,
    /// Per-frame content bounds, before normalization
    pub bounds: Vec<ContentBounds>,
    /// Shared bounds used for every frame, when consistent bounds is on
    pub unified: Option<ContentBounds>,
}

/// Normalize a batch of frames.
pub fn normalize_batch(
    frames: &[RgbaImage],
    settings: &NormalizeSettings,
) -> Result<NormalizedBatch, NormalizeError> {
    settings.validate()?;
    if frames.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let bounds: Vec<ContentBounds> = frames.iter().map(detect_content_bounds).collect();
    let unified = if settings.consistent_bounds {
        bounds.iter().copied().reduce(|a, b| a.union(&b))
    } else {
        None
    };

    let normalized = frames
        .iter()
        .zip(&bounds)
        .map(|(frame, own)| normalize_frame(frame, settings, Some(unified.unwrap_or(*own))))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::debug!(
        frames = normalized.len(),
        canvas_w = settings.canvas_width,
        canvas_h = settings.canvas_height,
        anchor = %settings.anchor,
        unified = unified.is_some(),
        "normalized frames"
    );

    Ok(NormalizedBatch { frames: normalized, bounds, unified })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn frame_with_box(w: u32, h: u32, x: u32, y: u32, bw: u32, bh: u32) -> RgbaImage {
        let mut img = RgbaImage::new(w, h);
        for py in y..y + bh {
            for px in x..x + bw {
                img.put_pixel(px, py, RED);
            }
        }
        img
    }

    fn opaque_bounds(img: &RgbaImage) -> ContentBounds {
        detect_content_bounds(img)
    }

    #[test]
    fn test_detect_bounds() {
        let img = frame_with_box(20, 20, 3, 5, 4, 6);
        assert_eq!(opaque_bounds(&img), ContentBounds { x: 3, y: 5, width: 4, height: 6 });
    }

    #[test]
    fn test_detect_bounds_transparent_is_whole_image() {
        let img = RgbaImage::new(7, 9);
        assert_eq!(opaque_bounds(&img), ContentBounds { x: 0, y: 0, width: 7, height: 9 });
    }

    #[test]
    fn test_anchor_positions() {
        let content = (10, 20);
        let canvas = (100, 200);
        assert_eq!(Anchor::BottomCenter.position(content, canvas), (45, 180));
        assert_eq!(Anchor::Center.position(content, canvas), (45, 90));
        assert_eq!(Anchor::BottomLeft.position(content, canvas), (0, 180));
        assert_eq!(Anchor::BottomRight.position(content, canvas), (90, 180));
        assert_eq!(Anchor::TopCenter.position(content, canvas), (45, 0));
    }

    #[test]
    fn test_target_size_fills_height() {
        let settings = NormalizeSettings::default();
        let bounds = ContentBounds { x: 0, y: 0, width: 10, height: 20 };
        // 512 * 0.8 = 409.6 -> 410; width = 205
        assert_eq!(target_size(&bounds, &settings), (205, 410));
    }

    #[test]
    fn test_target_size_clamps_wide_content() {
        let settings = NormalizeSettings::default();
        let bounds = ContentBounds { x: 0, y: 0, width: 40, height: 10 };
        assert_eq!(target_size(&bounds, &settings), (256, 64));
    }

    #[test]
    fn test_normalize_frame_bottom_center() {
        let settings = NormalizeSettings {
            canvas_width: 40,
            canvas_height: 40,
            scale: 0.5,
            ..NormalizeSettings::default()
        };
        let frame = frame_with_box(16, 16, 2, 2, 4, 4);
        let out = normalize_frame(&frame, &settings, None).unwrap();

        assert_eq!(out.dimensions(), (40, 40));
        // Content becomes 20x20 and touches the bottom edge, centered.
        assert_eq!(opaque_bounds(&out), ContentBounds { x: 10, y: 20, width: 20, height: 20 });
    }

    #[test]
    fn test_pixel_art_keeps_hard_alpha() {
        let settings = NormalizeSettings { canvas_width: 64, canvas_height: 64, ..Default::default() };
        let frame = frame_with_box(8, 8, 1, 1, 3, 5);
        let out = normalize_frame(&frame, &settings, None).unwrap();
        assert!(out.pixels().all(|p| p.0[3] == 0 || p.0[3] == 255));
    }

    #[test]
    fn test_rejects_bad_scale() {
        let settings = NormalizeSettings { scale: 0.0, ..Default::default() };
        let frame = frame_with_box(4, 4, 0, 0, 2, 2);
        assert!(matches!(
            normalize_frame(&frame, &settings, None),
            Err(NormalizeError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_consistent_bounds_prevent_jitter() {
        let settings = NormalizeSettings {
            canvas_width: 64,
            canvas_height: 64,
            scale: 1.0,
            ..Default::default()
        };
        // Same sprite, one frame with an extra raised arm pixel row.
        let a = frame_with_box(16, 16, 4, 8, 4, 8);
        let b = frame_with_box(16, 16, 4, 4, 4, 12);

        let batch = normalize_batch(&[a, b], &settings).unwrap();
        assert_eq!(batch.unified, Some(ContentBounds { x: 4, y: 4, width: 4, height: 12 }));

        // Both frames share one scale, so the body's bottom edge and width match.
        let ba = opaque_bounds(&batch.frames[0]);
        let bb = opaque_bounds(&batch.frames[1]);
        assert_eq!(ba.width, bb.width);
        assert_eq!(ba.y + ba.height, bb.y + bb.height);
        assert!(ba.height < bb.height);
    }

    #[test]
    fn test_per_frame_bounds_when_disabled() {
        let settings = NormalizeSettings {
            canvas_width: 32,
            canvas_height: 32,
            scale: 1.0,
            consistent_bounds: false,
            ..Default::default()
        };
        let a = frame_with_box(16, 16, 4, 8, 4, 8);
        let b = frame_with_box(16, 16, 4, 4, 4, 12);
        let batch = normalize_batch(&[a, b], &settings).unwrap();
        assert!(batch.unified.is_none());
        assert_eq!(opaque_bounds(&batch.frames[0]).height, 32);
        assert_eq!(opaque_bounds(&batch.frames[1]).height, 32);
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            normalize_batch(&[], &NormalizeSettings::default()),
            Err(NormalizeError::Empty)
        ));
    }

    #[test]
    fn test_anchor_parse() {
        assert_eq!("bottom_left".parse::<Anchor>().unwrap(), Anchor::BottomLeft);
        assert!("middle".parse::<Anchor>().is_err());
    }
}
