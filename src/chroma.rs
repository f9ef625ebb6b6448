//! Chroma keying - per-pixel color-distance alpha masking.
//!
//! A pixel is keyed out (alpha set to 0) when each of its RGB channels is
//! within `tolerance` of the key color. All other pixels are left untouched,
//! which makes the transform idempotent and independent of pixel order.

use image::RgbaImage;

use crate::color::KeyColor;

/// Default per-channel tolerance, out of 255.
pub const DEFAULT_TOLERANCE: u8 = 12;

/// Chroma key settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromaKey {
    pub color: KeyColor,
    pub tolerance: u8,
}

impl Default for ChromaKey {
    fn default() -> Self {
        Self { color: KeyColor::MAGENTA, tolerance: DEFAULT_TOLERANCE }
    }
}

impl ChromaKey {
    pub fn new(color: KeyColor, tolerance: u8) -> Self {
        Self { color, tolerance }
    }

    /// Whether an RGB triple falls inside the key window.
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        r.abs_diff(self.color.r()) <= self.tolerance
            && g.abs_diff(self.color.g()) <= self.tolerance
            && b.abs_diff(self.color.b()) <= self.tolerance
    }

    /// Key out matching pixels in place. Returns the number of pixels keyed.
    pub fn apply(&self, image: &mut RgbaImage) -> usize {
        let mut keyed = 0;
        for pixel in image.pixels_mut() {
            let [r, g, b, a] = pixel.0;
            if a != 0 && self.matches(r, g, b) {
                pixel.0[3] = 0;
                keyed += 1;
            }
        }
        keyed
    }

    /// Return a keyed copy of `image`.
    pub fn keyed(&self, image: &RgbaImage) -> RgbaImage {
        let mut out = image.clone();
        self.apply(&mut out);
        out
    }
}
