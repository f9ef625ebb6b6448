//! Spritesheet composition and extraction - packs frames into a fixed grid
//! atlas and slices an atlas back into frames.
//!
//! Frame `i` always occupies cell `(i % columns, i / columns)`: row-major,
//! left to right, top to bottom.

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::frames::{frame_filename, load_rgba, save_png, FrameError};

/// Transparent color used for empty cells
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Frame sizes tried, after the preferred one, when inferring a grid.
const FRAME_SIZE_CANDIDATES: [u32; 7] = [96, 64, 48, 32, 24, 16, 8];

/// Error type for spritesheet operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpritesheetError {
    /// Layout cannot describe a grid
    #[error("Invalid spritesheet layout: {0}")]
    InvalidLayout(String),
    /// A frame does not match the layout's cell size
    #[error("Frame {index} is {found_w}x{found_h}, expected {expected_w}x{expected_h}")]
    DimensionMismatch {
        index: usize,
        expected_w: u32,
        expected_h: u32,
        found_w: u32,
        found_h: u32,
    },
    /// More frames than the grid has cells
    #[error("{count} frames do not fit a grid of {capacity} cells")]
    TooManyFrames { count: usize, capacity: usize },
    /// Frame file error
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Grid geometry of a spritesheet.
///
/// Always derived, never hand-edited: `width == columns * frame_width`,
/// `height == rows * frame_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpritesheetLayout {
    pub frame_width: u32,
    pub frame_height: u32,
    pub columns: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}

impl SpritesheetLayout {
    /// Layout for `frame_count` frames in `columns` columns.
    ///
    /// Columns are clamped to at least 1, and rows to at least 1 so an empty
    /// animation still has a one-cell sheet.
    ///
    /// # Examples
    ///
    /// ```
    /// use spriteforge::spritesheet::SpritesheetLayout;
    ///
    /// let layout = SpritesheetLayout::for_frames(48, 48, 4, 8);
    /// assert_eq!((layout.columns, layout.rows), (4, 2));
    /// assert_eq!((layout.width, layout.height), (192, 96));
    /// ```
    pub fn for_frames(frame_width: u32, frame_height: u32, columns: u32, frame_count: usize) -> Self {
        let columns = columns.max(1);
        let rows = (frame_count as u32).div_ceil(columns).max(1);
        Self {
            frame_width,
            frame_height,
            columns,
            rows,
            width: columns * frame_width,
            height: rows * frame_height,
        }
    }

    /// Layout of an existing atlas sliced into `frame_width` x `frame_height`
    /// cells. Partial trailing cells are ignored and fall outside the layout.
    pub fn from_atlas(
        atlas_width: u32,
        atlas_height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self, SpritesheetError> {
        let columns = if frame_width > 0 { atlas_width / frame_width } else { 0 };
        let rows = if frame_height > 0 { atlas_height / frame_height } else { 0 };

        if atlas_width == 0 || atlas_height == 0 || columns == 0 || rows == 0 {
            return Err(SpritesheetError::InvalidLayout(format!(
                "{}x{} atlas cannot hold {}x{} frames",
                atlas_width, atlas_height, frame_width, frame_height
            )));
        }

        Ok(Self {
            frame_width,
            frame_height,
            columns,
            rows,
            width: columns * frame_width,
            height: rows * frame_height,
        })
    }

    /// Number of cells in the grid.
    pub fn capacity(&self) -> usize {
        (self.columns * self.rows) as usize
    }

    /// Top-left pixel of the cell holding frame `index`.
    pub fn cell_origin(&self, index: usize) -> (u32, u32) {
        let index = index as u32;
        ((index % self.columns) * self.frame_width, (index / self.columns) * self.frame_height)
    }

    fn validate(&self) -> Result<(), SpritesheetError> {
        if self.frame_width == 0 || self.frame_height == 0 || self.columns == 0 || self.rows == 0 {
            return Err(SpritesheetError::InvalidLayout(format!(
                "{}x{} frames in {}x{} cells",
                self.frame_width, self.frame_height, self.columns, self.rows
            )));
        }
        Ok(())
    }
}

/// Column count used when an animation has none configured: `ceil(sqrt(n))`.
pub fn default_columns(frame_count: usize) -> u32 {
    ((frame_count as f64).sqrt().ceil() as u32).max(1)
}

/// Infer a square frame size from atlas dimensions.
///
/// Returns the first of `preferred, 96, 64, 48, 32, 24, 16, 8` that divides
/// both dimensions, or `preferred` if none does.
pub fn infer_frame_size(atlas_width: u32, atlas_height: u32, preferred: u32) -> u32 {
    std::iter::once(preferred)
        .chain(FRAME_SIZE_CANDIDATES)
        .find(|&size| size > 0 && atlas_width % size == 0 && atlas_height % size == 0)
        .unwrap_or(preferred)
}

/// Largest square frame size whose grid over the atlas holds `frame_count`
/// frames exactly tiled.
fn square_size_for_count(atlas_width: u32, atlas_height: u32, frame_count: usize) -> Option<u32> {
    let mut a = atlas_width;
    let mut b = atlas_height;
    while b != 0 {
        (a, b) = (b, a % b);
    }
    let gcd = a;

    (1..=gcd)
        .rev()
        .filter(|size| gcd % size == 0)
        .find(|size| ((atlas_width / size) * (atlas_height / size)) as usize >= frame_count)
}

/// Render frames into a spritesheet with the given layout.
///
/// Every frame must be exactly `frame_width` x `frame_height`; mismatches fail
/// rather than stretch. Cells past the last frame stay transparent.
///
/// # Examples
///
/// ```
/// use image::{Rgba, RgbaImage};
/// use spriteforge::spritesheet::{compose, SpritesheetLayout};
///
/// let frame = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
/// let frames = vec![frame.clone(), frame.clone(), frame];
///
/// let layout = SpritesheetLayout::for_frames(2, 2, 2, frames.len());
/// let sheet = compose(&frames, &layout).unwrap();
/// assert_eq!(sheet.dimensions(), (4, 4));
/// assert_eq!(sheet.get_pixel(2, 2).0[3], 0); // empty fourth cell
/// ```
pub fn compose(frames: &[RgbaImage], layout: &SpritesheetLayout) -> Result<RgbaImage, SpritesheetError> {
    layout.validate()?;

    if frames.len() > layout.capacity() {
        return Err(SpritesheetError::TooManyFrames {
            count: frames.len(),
            capacity: layout.capacity(),
        });
    }

    for (index, frame) in frames.iter().enumerate() {
        check_frame_size(index, frame, layout)?;
    }

    let mut sheet = RgbaImage::from_pixel(layout.width, layout.height, TRANSPARENT);
    for (index, frame) in frames.iter().enumerate() {
        let (x, y) = layout.cell_origin(index);
        imageops::replace(&mut sheet, frame, x as i64, y as i64);
    }

    Ok(sheet)
}

/// Render frames that carry their own frame index.
///
/// Frame `(i, img)` goes into cell `i`; indices past the grid are dropped and
/// unused cells stay transparent.
pub fn compose_indexed(
    frames: &[(usize, RgbaImage)],
    layout: &SpritesheetLayout,
) -> Result<RgbaImage, SpritesheetError> {
    layout.validate()?;

    let mut sheet = RgbaImage::from_pixel(layout.width, layout.height, TRANSPARENT);
    for (index, frame) in frames {
        check_frame_size(*index, frame, layout)?;
        if *index >= layout.capacity() {
            tracing::debug!(index, capacity = layout.capacity(), "frame outside grid dropped");
            continue;
        }
        let (x, y) = layout.cell_origin(*index);
        imageops::replace(&mut sheet, frame, x as i64, y as i64);
    }

    Ok(sheet)
}

/// Render a spritesheet from `frame_NNN.png` files in `frames_dir`.
///
/// Indices with no file are skipped and their cells left transparent.
pub fn compose_dir(frames_dir: &Path, layout: &SpritesheetLayout) -> Result<RgbaImage, SpritesheetError> {
    layout.validate()?;

    let mut sheet = RgbaImage::from_pixel(layout.width, layout.height, TRANSPARENT);
    let mut placed = 0usize;

    for index in 0..layout.capacity() {
        let path = frames_dir.join(frame_filename(index));
        if !path.is_file() {
            continue;
        }
        let frame = load_rgba(&path)?;
        check_frame_size(index, &frame, layout)?;

        let (x, y) = layout.cell_origin(index);
        imageops::replace(&mut sheet, &frame, x as i64, y as i64);
        placed += 1;
    }

    tracing::debug!(dir = %frames_dir.display(), placed, cells = layout.capacity(), "composed spritesheet");
    Ok(sheet)
}

fn check_frame_size(
    index: usize,
    frame: &RgbaImage,
    layout: &SpritesheetLayout,
) -> Result<(), SpritesheetError> {
    let (w, h) = frame.dimensions();
    if w != layout.frame_width || h != layout.frame_height {
        return Err(SpritesheetError::DimensionMismatch {
            index,
            expected_w: layout.frame_width,
            expected_h: layout.frame_height,
            found_w: w,
            found_h: h,
        });
    }
    Ok(())
}

/// How to slice an atlas into frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Explicit frame width
    pub frame_width: Option<u32>,
    /// Explicit frame height
    pub frame_height: Option<u32>,
    /// Number of frames to extract; also used to infer a square frame size
    /// when no explicit size is given
    pub frame_count: Option<usize>,
}

impl ExtractOptions {
    pub fn sized(frame_width: u32, frame_height: u32) -> Self {
        Self { frame_width: Some(frame_width), frame_height: Some(frame_height), frame_count: None }
    }

    pub fn with_count(mut self, frame_count: usize) -> Self {
        self.frame_count = Some(frame_count).filter(|n| *n > 0);
        self
    }

    /// Resolve the layout these options describe over an atlas.
    pub fn resolve(&self, atlas_width: u32, atlas_height: u32) -> Result<SpritesheetLayout, SpritesheetError> {
        let (fw, fh) = match (self.frame_width, self.frame_height) {
            (Some(w), Some(h)) => (w, h),
            (Some(s), None) | (None, Some(s)) => (s, s),
            (None, None) => {
                let count = self.frame_count.ok_or_else(|| {
                    SpritesheetError::InvalidLayout("need a frame size or a frame count".to_string())
                })?;
                let size = square_size_for_count(atlas_width, atlas_height, count).ok_or_else(|| {
                    SpritesheetError::InvalidLayout(format!(
                        "no square frame size fits {} frames in {}x{}",
                        count, atlas_width, atlas_height
                    ))
                })?;
                (size, size)
            }
        };
        SpritesheetLayout::from_atlas(atlas_width, atlas_height, fw, fh)
    }
}

/// Slice an atlas into frames in row-major order.
pub fn extract(atlas: &RgbaImage, options: &ExtractOptions) -> Result<Vec<RgbaImage>, SpritesheetError> {
    let layout = options.resolve(atlas.width(), atlas.height())?;
    let count = options.frame_count.map_or(layout.capacity(), |n| n.min(layout.capacity()));

    Ok((0..count)
        .map(|index| {
            let (x, y) = layout.cell_origin(index);
            imageops::crop_imm(atlas, x, y, layout.frame_width, layout.frame_height).to_image()
        })
        .collect())
}

/// A frame file written by [`extract_to_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub frame_index: usize,
    pub filename: String,
    pub path: PathBuf,
}

/// Slice an atlas and write each frame as `frame_NNN.png` into `out_dir`.
pub fn extract_to_dir(
    atlas: &RgbaImage,
    options: &ExtractOptions,
    out_dir: &Path,
) -> Result<(SpritesheetLayout, Vec<ExtractedFrame>), SpritesheetError> {
    let layout = options.resolve(atlas.width(), atlas.height())?;
    let frames = extract(atlas, options)?;
    std::fs::create_dir_all(out_dir).map_err(FrameError::from)?;

    let mut written = Vec::with_capacity(frames.len());
    for (frame_index, frame) in frames.iter().enumerate() {
        let filename = frame_filename(frame_index);
        let path = out_dir.join(&filename);
        save_png(frame, &path)?;
        written.push(ExtractedFrame { frame_index, filename, path });
    }

    Ok((layout, written))
}
