//! pixelbench -- exact black/white pixel counting, GPU compute vs multi-threaded host.
//!
//! The library classifies every pixel of an RGB image by its weighted
//! luminance and counts the saturated BLACK and WHITE ones, either on a
//! compute device or on a rayon pool, and benchmarks the two paths against
//! each other.

pub mod accel;
pub mod bench;
pub mod config;
pub mod raster;

pub use accel::{classify, luminance, AccelerationManager, Backend, Category, CounterPair};
pub use bench::{BenchmarkHarness, SessionReport};
pub use config::Config;
pub use raster::{Image, Pixel};
