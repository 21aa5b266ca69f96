//! Multi-threaded host reduction over row partitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::accel::{
    classify, AccelError, Backend, Category, CounterPair, PhaseTimings, PixelReducer, Reduction,
};
use crate::raster::Image;

/// How per-row results reach the global counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostStrategy {
    /// Atomic increment of a shared counter per counted pixel
    #[default]
    Atomic,
    /// Thread-local counters merged after the join
    Fold,
}

/// Host Reduction Engine: one partition per image row on a bounded rayon pool.
pub struct HostReductionEngine {
    pool: rayon::ThreadPool,
    strategy: HostStrategy,
}

impl HostReductionEngine {
    /// `threads == 0` means one worker per logical core.
    pub fn new(threads: usize, strategy: HostStrategy) -> Result<Self, AccelError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("pixelbench-host-{i}"))
            .build()
            .map_err(|e| AccelError::WorkerPool(e.to_string()))?;
        debug!(
            threads = pool.current_num_threads(),
            ?strategy,
            "host worker pool ready"
        );
        Ok(Self { pool, strategy })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn strategy(&self) -> HostStrategy {
        self.strategy
    }

    /// Count BLACK / WHITE pixels. Returns after every row has been visited.
    pub fn count(&self, image: &Image) -> CounterPair {
        if image.is_empty() {
            return CounterPair::default();
        }
        self.pool.install(|| match self.strategy {
            HostStrategy::Atomic => count_atomic(image),
            HostStrategy::Fold => count_fold(image),
        })
    }
}

fn count_atomic(image: &Image) -> CounterPair {
    let black = AtomicU64::new(0);
    let white = AtomicU64::new(0);

    (0..image.height()).into_par_iter().for_each(|y| {
        for px in image.row(y) {
            match classify(px.r, px.g, px.b) {
                Category::Black => {
                    black.fetch_add(1, Ordering::Relaxed);
                }
                Category::White => {
                    white.fetch_add(1, Ordering::Relaxed);
                }
                Category::Other => {}
            }
        }
    });

    // for_each joins every task before returning, so relaxed adds are all visible here.
    CounterPair::new(black.into_inner(), white.into_inner())
}

fn count_fold(image: &Image) -> CounterPair {
    (0..image.height())
        .into_par_iter()
        .fold(CounterPair::default, |mut acc, y| {
            for px in image.row(y) {
                acc.record(classify(px.r, px.g, px.b));
            }
            acc
        })
        .reduce(CounterPair::default, CounterPair::merge)
}

impl PixelReducer for HostReductionEngine {
    fn backend(&self) -> Backend {
        Backend::Host
    }

    fn describe(&self) -> String {
        let strategy = match self.strategy {
            HostStrategy::Atomic => "atomic",
            HostStrategy::Fold => "fold",
        };
        format!("rayon pool, {} threads, {strategy} counters", self.threads())
    }

    fn reduce(&self, image: &Image) -> Result<Reduction, AccelError> {
        let start = Instant::now();
        let counts = self.count(image);
        Ok(Reduction {
            backend: Backend::Host,
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
    use crate::accel::cpu;
    use crate::raster::{synth, Pixel};

    fn engines() -> Vec<HostReductionEngine> {
        vec![
            HostReductionEngine::new(4, HostStrategy::Atomic).unwrap(),
            HostReductionEngine::new(4, HostStrategy::Fold).unwrap(),
        ]
    }

    #[test]
    fn test_empty_image() {
        for engine in engines() {
            assert_eq!(engine.count(&Image::empty()), CounterPair::default());
            let no_rows = Image::new(12, 0, Vec::new()).unwrap();
            assert_eq!(engine.count(&no_rows), CounterPair::default());
        }
    }

    #[test]
    fn test_one_pixel_images() {
        for engine in engines() {
            let black = Image::new(1, 1, vec![Pixel::BLACK]).unwrap();
            let white = Image::new(1, 1, vec![Pixel::WHITE]).unwrap();
            assert_eq!(engine.count(&black), CounterPair::new(1, 0));
            assert_eq!(engine.count(&white), CounterPair::new(0, 1));
        }
    }

    #[test]
    fn test_matches_scalar_reference_and_conserves_pixels() {
        let image = synth::gradient(300, 200);
        let reference = cpu::count_pixels(&image);
        for engine in engines() {
            let counts = engine.count(&image);
            assert_eq!(counts, reference, "{:?}", engine.strategy());
            let other = image
                .pixels()
                .iter()
                .filter(|p| classify(p.r, p.g, p.b) == Category::Other)
                .count() as u64;
            assert_eq!(counts.black + counts.white + other, image.pixel_count());
        }
    }

    #[test]
    fn test_contended_counters_are_exact() {
        let image = synth::checkerboard(1024, 1024, 1);
        for engine in engines() {
            let first = engine.count(&image);
            let second = engine.count(&image);
            assert_eq!(first, CounterPair::new(512 * 1024, 512 * 1024));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_zero_threads_uses_default_pool() {
        let engine = HostReductionEngine::new(0, HostStrategy::Atomic).unwrap();
        assert!(engine.threads() >= 1);
    }
}
