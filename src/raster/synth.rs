//! Synthetic test patterns with known black/white populations.

use serde::{Deserialize, Serialize};

use super::{Image, Pixel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// Alternating black and white square cells
    Checkerboard,
    /// Every pixel (0, 0, 0)
    SolidBlack,
    /// Every pixel (255, 255, 255)
    SolidWhite,
    /// Red ramps across, green down, blue along the diagonal
    Gradient,
}

/// Render `pattern` at the given size. `cell` only affects the checkerboard.
pub fn render(pattern: Pattern, width: u32, height: u32, cell: u32) -> Image {
    match pattern {
        Pattern::Checkerboard => checkerboard(width, height, cell),
        Pattern::SolidBlack => solid(width, height, Pixel::BLACK),
        Pattern::SolidWhite => solid(width, height, Pixel::WHITE),
        Pattern::Gradient => gradient(width, height),
    }
}

pub fn solid(width: u32, height: u32, pixel: Pixel) -> Image {
    from_fn(width, height, |_, _| pixel)
}

/// Black cell at the origin; a `cell` of 0 is treated as 1.
pub fn checkerboard(width: u32, height: u32, cell: u32) -> Image {
    let cell = cell.max(1);
    from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Pixel::BLACK
        } else {
            Pixel::WHITE
        }
    })
}

/// Black at the origin, white at the far corner, mostly OTHER in between.
pub fn gradient(width: u32, height: u32) -> Image {
    from_fn(width, height, |x, y| {
        Pixel::new(
            ramp(x, width),
            ramp(y, height),
            ramp(x.saturating_add(y), width.saturating_add(height).saturating_sub(1)),
        )
    })
}

fn ramp(pos: u32, extent: u32) -> u8 {
    let span = u64::from(extent.max(2) - 1);
    (u64::from(pos) * 255 / span).min(255) as u8
}

fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> Pixel) -> Image {
    let pixels = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| f(x, y))
        .collect();
    Image {
        width,
        height,
        pixels,
    }
}
