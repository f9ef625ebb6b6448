//! Alpha clamping - hard-clips alpha to fully transparent or fully opaque.
//!
//! Boundary rule: a pixel whose alpha is **at or below** the threshold becomes
//! transparent (0); anything above becomes opaque (255). With threshold `t`
//! no pixel can end up with alpha in `(0, 255)`, and raising `t` can only move
//! pixels from opaque to transparent.

use image::RgbaImage;

/// Clamp every pixel's alpha against `threshold` in place.
pub fn clamp_alpha(image: &mut RgbaImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        pixel.0[3] = if pixel.0[3] <= threshold { 0 } else { 255 };
    }
}

/// Return a clamped copy of `image`.
pub fn clamped(image: &RgbaImage, threshold: u8) -> RgbaImage {
    let mut out = image.clone();
    clamp_alpha(&mut out, threshold);
    out
}

/// Sanitize a user-supplied threshold.
///
/// Rounds to the nearest integer and clamps into `[0, 255]`. Non-finite input
/// yields `None`.
///
/// # Examples
///
/// ```
/// use spriteforge::alpha::clamp_alpha_threshold;
///
/// assert_eq!(clamp_alpha_threshold(16.4), Some(16));
/// assert_eq!(clamp_alpha_threshold(-3.0), Some(0));
/// assert_eq!(clamp_alpha_threshold(999.0), Some(255));
/// assert_eq!(clamp_alpha_threshold(f64::NAN), None);
/// ```
pub fn clamp_alpha_threshold(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    Some(value.round().clamp(0.0, 255.0) as u8)
}

/// A threshold that is present and nonzero; `0` means "not applied".
pub fn effective_threshold(threshold: Option<u8>) -> Option<u8> {
    threshold.filter(|t| *t > 0)
}

/// Count pixels with alpha 255.
pub fn opaque_count(image: &RgbaImage) -> usize {
    image.pixels().filter(|p| p.0[3] == 255).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn alpha_ramp() -> RgbaImage {
        let mut img = RgbaImage::new(256, 1);
        for x in 0..256u32 {
            img.put_pixel(x, 0, Rgba([10, 20, 30, x as u8]));
        }
        img
    }

    #[test]
    fn test_boundary_maps_to_transparent() {
        let img = clamped(&alpha_ramp(), 16);
        assert_eq!(img.get_pixel(16, 0).0[3], 0);
        assert_eq!(img.get_pixel(17, 0).0[3], 255);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_output_is_binary() {
        let img = clamped(&alpha_ramp(), 100);
        assert!(img.pixels().all(|p| p.0[3] == 0 || p.0[3] == 255));
    }

    #[test]
    fn test_rgb_untouched() {
        let img = clamped(&alpha_ramp(), 100);
        assert_eq!(&img.get_pixel(5, 0).0[..3], &[10, 20, 30]);
    }

    #[test]
    fn test_idempotent() {
        let once = clamped(&alpha_ramp(), 40);
        let twice = clamped(&once, 40);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_monotonic_in_threshold() {
        let source = alpha_ramp();
        let mut previous = usize::MAX;
        for t in (0..=255u32).step_by(5) {
            let count = opaque_count(&clamped(&source, t as u8));
            assert!(count <= previous);
            previous = count;
        }
    }

    #[test]
    fn test_effective_threshold() {
        assert_eq!(effective_threshold(None), None);
        assert_eq!(effective_threshold(Some(0)), None);
        assert_eq!(effective_threshold(Some(16)), Some(16));
    }
}
