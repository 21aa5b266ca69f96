use std::time::Instant;

use crate::accel::{classify, AccelError, Backend, CounterPair, PhaseTimings, PixelReducer, Reduction};
use crate::raster::Image;

/// Scalar CPU reference implementation: one thread, one pass, plain counters.
pub fn count_pixels(image: &Image) -> CounterPair {
    let mut counts = CounterPair::default();
    for px in image.pixels() {
        counts.record(classify(px.r, px.g, px.b));
    }
    counts
}

/// Reference reducer used to verify the parallel backends.
#[derive(Debug, Default)]
pub struct ScalarReducer;

impl PixelReducer for ScalarReducer {
    fn backend(&self) -> Backend {
        Backend::Scalar
    }

    fn reduce(&self, image: &Image) -> Result<Reduction, AccelError> {
        let start = Instant::now();
        let counts = count_pixels(image);
        Ok(Reduction {
            backend: Backend::Scalar,
            counts,
            timings: PhaseTimings {
                setup: None,
                compute: start.elapsed(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{synth, Pixel};

    #[test]
    fn test_single_pixels() {
        let black = Image::new(1, 1, vec![Pixel::BLACK]).unwrap();
        let white = Image::new(1, 1, vec![Pixel::WHITE]).unwrap();
        assert_eq!(count_pixels(&black), CounterPair::new(1, 0));
        assert_eq!(count_pixels(&white), CounterPair::new(0, 1));
        assert_eq!(count_pixels(&Image::empty()), CounterPair::default());
    }

    #[test]
    fn test_checkerboard() {
        let image = synth::checkerboard(16, 16, 4);
        assert_eq!(count_pixels(&image), CounterPair::new(128, 128));
    }
}
