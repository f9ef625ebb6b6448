//! Spriteforge - animation asset pipeline
//!
//! This library turns ordered frame images into game-ready assets:
//! - Sequence raw frames (loop or ping-pong) and pack them into spritesheets
//! - Remove chroma-key backgrounds and hard-clip alpha
//! - Normalize frames onto a fixed, anchored canvas
//! - Emit Aseprite-compatible JSON metadata and frame indexes
//! - Snapshot and restore versions of an animation's generated output
//! - Bundle many animations into one archive

pub mod alpha;
pub mod background;
pub mod bundle;
pub mod cancel;
pub mod chroma;
pub mod cli;
pub mod color;
pub mod config;
pub mod export;
pub mod frames;
pub mod lease;
pub mod metadata;
pub mod models;
pub mod normalize;
pub mod paths;
pub mod rebuild;
pub mod sequence;
pub mod spritesheet;
pub mod storage;
pub mod versions;
