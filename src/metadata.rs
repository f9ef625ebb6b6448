//! Aseprite-compatible spritesheet metadata and the frame-sequence index.
//!
//! Both Aseprite encodings are built from one frame list so they always
//! describe the same geometry: the array form keeps frame order, the hash
//! form keys each entry by its filename.

use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use serde_json::Value;

use crate::frames::frame_stem;

/// Application name written into `meta.app`
pub const APP_NAME: &str = "Sprite Forge";
/// Metadata format version written into `meta.version`
pub const APP_VERSION: &str = "1.0";

/// Per-frame duration in milliseconds for a frame rate.
///
/// # Examples
///
/// ```
/// use spriteforge::metadata::frame_duration_ms;
///
/// assert_eq!(frame_duration_ms(12), 83);
/// assert_eq!(frame_duration_ms(0), 1000);
/// ```
pub fn frame_duration_ms(fps: u32) -> u32 {
    (1000.0 / fps.max(1) as f64).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

/// Geometry and timing of one frame, shared by both encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    pub frame: Rect,
    pub rotated: bool,
    pub trimmed: bool,
    pub sprite_source_size: Rect,
    pub source_size: Size,
    pub duration: u32,
}

/// Array-form entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsepriteFrame {
    pub filename: String,
    #[serde(flatten)]
    pub data: FrameData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsepriteMeta {
    pub app: String,
    pub version: String,
    pub image: String,
    pub size: Size,
    pub scale: String,
    #[serde(default)]
    pub frame_tags: Vec<Value>,
    #[serde(default)]
    pub layers: Vec<Value>,
    #[serde(default)]
    pub slices: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsepriteArray {
    pub frames: Vec<AsepriteFrame>,
    pub meta: AsepriteMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsepriteHash {
    /// Keyed by filename, in frame order
    pub frames: IndexMap<String, FrameData>,
    pub meta: AsepriteMeta,
}

/// Both encodings of one atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct AsepriteDocs {
    pub array: AsepriteArray,
    pub hash: AsepriteHash,
}

impl AsepriteDocs {
    /// Copy of both documents with `meta.image` pointing at `image`.
    pub fn with_image(&self, image: &str) -> AsepriteDocs {
        let mut docs = self.clone();
        docs.array.meta.image = image.to_string();
        docs.hash.meta.image = image.to_string();
        docs
    }
}

/// What the metadata describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasDescription {
    /// Image filename written into `meta.image`
    pub image: String,
    pub image_width: u32,
    pub image_height: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    /// Stop after this many frames; `None` covers every cell
    pub frame_count: Option<usize>,
}

/// Build the array-form frame list, row-major, stopping at `frame_count`.
pub fn build_frames(atlas: &AtlasDescription) -> Vec<AsepriteFrame> {
    let (fw, fh) = (atlas.frame_width, atlas.frame_height);
    let columns = (atlas.image_width / fw.max(1)).max(1);
    let rows = (atlas.image_height / fh.max(1)).max(1);
    let duration = frame_duration_ms(atlas.fps);
    let cells = (columns * rows) as usize;
    let count = atlas.frame_count.map_or(cells, |n| n.min(cells));

    (0..count)
        .map(|index| {
            let x = (index as u32 % columns) * fw;
            let y = (index as u32 / columns) * fh;
            AsepriteFrame {
                filename: frame_stem(index),
                data: FrameData {
                    frame: Rect { x, y, w: fw, h: fh },
                    rotated: false,
                    trimmed: false,
                    sprite_source_size: Rect { x: 0, y: 0, w: fw, h: fh },
                    source_size: Size { w: fw, h: fh },
                    duration,
                },
            }
        })
        .collect()
}

/// Build both Aseprite encodings for an atlas.
pub fn build_aseprite(atlas: &AtlasDescription) -> AsepriteDocs {
    let frames = build_frames(atlas);
    let meta = AsepriteMeta {
        app: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        image: atlas.image.clone(),
        size: Size { w: atlas.image_width, h: atlas.image_height },
        scale: "1".to_string(),
        frame_tags: Vec::new(),
        layers: Vec::new(),
        slices: Vec::new(),
    };

    let hash = AsepriteHash {
        frames: frames.iter().map(|f| (f.filename.clone(), f.data.clone())).collect(),
        meta: meta.clone(),
    };

    AsepriteDocs { array: AsepriteArray { frames, meta }, hash }
}

/// Entry in the frame-sequence index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub filename: String,
    pub frame_index: usize,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMeta {
    pub frame_rate: u32,
}

/// The `frames/index.json` companion document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameIndex {
    pub frames: Vec<IndexEntry>,
    pub meta: IndexMeta,
}

/// Build the frame-sequence index from `(filename, frame_index)` pairs.
pub fn build_index(files: &[(String, usize)], fps: u32) -> FrameIndex {
    let duration = frame_duration_ms(fps);
    FrameIndex {
        frames: files
            .iter()
            .map(|(filename, frame_index)| IndexEntry {
                filename: filename.clone(),
                frame_index: *frame_index,
                duration,
            })
            .collect(),
        meta: IndexMeta { frame_rate: fps },
    }
}
