//! Decoded RGB images: the read-only input shared by every reduction path.

pub mod flatten;
pub mod synth;

use std::path::Path;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("pixel count {actual} does not match {width}x{height}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("failed to write image {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// One 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Pixel {
    pub const BLACK: Pixel = Pixel::new(0, 0, 0);
    pub const WHITE: Pixel = Pixel::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Row-major W x H grid of pixels. No alpha, no row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<Pixel>,
}

impl Image {
    pub fn new(width: u32, height: u32, pixels: Vec<Pixel>) -> Result<Self, RasterError> {
        if pixels.len() as u64 != width as u64 * height as u64 {
            return Err(RasterError::DimensionMismatch {
                width,
                height,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    /// Decode any format the `image` crate understands. Alpha is discarded.
    pub fn open(path: &Path) -> Result<Self, RasterError> {
        let decoded = image::open(path).map_err(|source| RasterError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        let image = Self::from(decoded.to_rgb8());
        info!(
            path = %path.display(),
            width = image.width,
            height = image.height,
            "decoded image"
        );
        Ok(image)
    }

    pub fn save(&self, path: &Path) -> Result<(), RasterError> {
        let encoded = image::RgbImage::from_raw(self.width, self.height, flatten::flatten(self))
            .ok_or(RasterError::DimensionMismatch {
                width: self.width,
                height: self.height,
                actual: self.pixels.len(),
            })?;
        encoded.save(path).map_err(|source| RasterError::Encode {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> u64 {
        self.pixels.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Row `y` as a slice of `width` pixels.
    pub fn row(&self, y: u32) -> &[Pixel] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.pixels[start..start + w]
    }
}

impl From<image::RgbImage> for Image {
    fn from(rgb: image::RgbImage) -> Self {
        let (width, height) = rgb.dimensions();
        let pixels = rgb
            .pixels()
            .map(|p| Pixel::new(p.0[0], p.0[1], p.0[2]))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Image::new(2, 2, vec![Pixel::BLACK; 3]).unwrap_err();
        assert!(matches!(
            err,
            RasterError::DimensionMismatch { width: 2, height: 2, actual: 3 }
        ));
    }

    #[test]
    fn test_zero_width_is_empty() {
        let image = Image::new(0, 7, Vec::new()).unwrap();
        assert!(image.is_empty());
        assert_eq!(image.pixel_count(), 0);
    }

    #[test]
    fn test_row_slices_are_row_major() {
        let pixels = (0..6).map(|i| Pixel::new(i, 0, 0)).collect();
        let image = Image::new(3, 2, pixels).unwrap();
        assert_eq!(image.row(1)[0], Pixel::new(3, 0, 0));
        assert_eq!(image.row(1).len(), 3);
    }

    #[test]
    fn test_save_then_open_preserves_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pattern.png");
        let image = synth::checkerboard(5, 3, 1);
        image.save(&path).unwrap();

        let decoded = Image::open(&path).unwrap();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_open_missing_file_is_decode_error() {
        let err = Image::open(Path::new("/nonexistent/definitely-missing.png")).unwrap_err();
        assert!(matches!(err, RasterError::Decode { .. }));
        assert!(err.to_string().contains("definitely-missing.png"));
    }
}
