//! Exact-threshold grayscale classifier.
//!
//! Luminance is `r*0.3 + g*0.59 + b*0.11` evaluated in `f32`, left to right,
//! then truncated toward zero. Only the saturated extremes are counted:
//! luminance 0 is BLACK, 255 is WHITE, everything else is OTHER.
//!
//! The single-precision evaluation is load-bearing. In `f64`, (1, 1, 1)
//! sums to 0.9999999999999999 and truncates to 0 (BLACK); in `f32` it is
//! exactly 1.0 (OTHER). The WGSL kernel in [`super::shaders`] uses the same
//! constants and evaluation order.

use serde::Serialize;

pub const RED_WEIGHT: f32 = 0.3;
pub const GREEN_WEIGHT: f32 = 0.59;
pub const BLUE_WEIGHT: f32 = 0.11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Black,
    White,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Category::Black => "black",
            Category::White => "white",
            Category::Other => "other",
        })
    }
}

/// Truncated weighted luminance in `0..=255`.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u32 {
    let l = r as f32 * RED_WEIGHT + g as f32 * GREEN_WEIGHT + b as f32 * BLUE_WEIGHT;
    l as u32
}

#[inline]
pub fn classify(r: u8, g: u8, b: u8) -> Category {
    match luminance(r, g, b) {
        0 => Category::Black,
        255 => Category::White,
        _ => Category::Other,
    }
}
