//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::backend::Dimensions;

/// Largest width a generated variant may have, unless configured otherwise.
pub const DEFAULT_MAX_WIDTH: u32 = 1920;

/// Width of the generated variant: the intrinsic width capped at `max_width`.
///
/// Never upscales.
///
/// # Examples
/// ```
/// # use siena::imaging::target_width;
/// assert_eq!(target_width(3840, 1920), 1920);
/// assert_eq!(target_width(800, 1920), 800);
/// ```
pub fn target_width(intrinsic_width: u32, max_width: u32) -> u32 {
    intrinsic_width.min(max_width)
}

/// Output dimensions for a source of `original` size capped at `max_width`.
///
/// Height keeps the source aspect ratio, rounded to the nearest pixel and
/// never below 1. Returns `None` when the source has no usable width.
pub fn target_dimensions(original: Dimensions, max_width: u32) -> Option<Dimensions> {
    if original.width == 0 || max_width == 0 {
        return None;
    }
    let width = target_width(original.width, max_width);
    if width == original.width {
        return Some(Dimensions {
            width,
            height: original.height.max(1),
        });
    }
    let ratio = width as f64 / original.width as f64;
    let height = ((original.height as f64 * ratio).round() as u32).max(1);
    Some(Dimensions { width, height })
}
