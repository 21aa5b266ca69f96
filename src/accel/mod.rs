//! Acceleration layer -- GPU compute / emulated device / multi-threaded host / scalar reference.
//!
//! Every backend implements the same reduction: classify each pixel of an
//! [`Image`] and count the BLACK and WHITE ones exactly. Backends are picked
//! at run time by the [`AccelerationManager`].

pub mod classify;
pub mod cpu;
pub mod device;
pub mod emulated;
pub mod gpu;
pub mod host;
pub mod manager;
pub mod shaders;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::raster::Image;

pub use classify::{classify, luminance, Category};
pub use manager::AccelerationManager;

/// Which acceleration path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// wgpu compute shader on a real adapter
    Gpu,
    /// Device interface executed by host threads
    Emulated,
    /// rayon row-partitioned loop
    Host,
    /// Single-threaded reference, verification only
    Scalar,
}

impl Backend {
    /// Whether this backend goes through the device collaborator interface.
    pub fn is_device(self) -> bool {
        matches!(self, Backend::Gpu | Backend::Emulated)
    }

    pub fn path_name(self) -> &'static str {
        if self.is_device() {
            "device"
        } else {
            "host"
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Gpu => "gpu",
            Backend::Emulated => "emulated",
            Backend::Host => "host",
            Backend::Scalar => "scalar",
        };
        f.write_str(name)
    }
}

/// Phase of a single reduction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Flatten + allocate + upload
    Setup,
    /// Launch + completion barrier
    Compute,
    /// Counter download
    Readback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Setup => "setup",
            Phase::Compute => "compute",
            Phase::Readback => "readback",
        })
    }
}

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("no compute device available: {0}")]
    DeviceUnavailable(String),

    #[error("device allocation of {bytes} bytes failed: {reason}")]
    DeviceAlloc { bytes: u64, reason: String },

    #[error("host to device transfer failed: {0}")]
    Transfer(String),

    #[error("kernel build failed: {0}")]
    KernelBuild(String),

    #[error("launch of {work_items} work items failed: {reason}")]
    DeviceLaunch { work_items: u64, reason: String },

    #[error("counter readback failed: {0}")]
    Readback(String),

    #[error("host worker pool could not be built: {0}")]
    WorkerPool(String),
}

impl AccelError {
    /// Phase in which this error surfaces during a run.
    pub fn phase(&self) -> Phase {
        match self {
            AccelError::DeviceUnavailable(_)
            | AccelError::DeviceAlloc { .. }
            | AccelError::Transfer(_)
            | AccelError::KernelBuild(_)
            | AccelError::WorkerPool(_) => Phase::Setup,
            AccelError::DeviceLaunch { .. } => Phase::Compute,
            AccelError::Readback(_) => Phase::Readback,
        }
    }
}

/// Exact BLACK / WHITE totals for one reduction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterPair {
    pub black: u64,
    pub white: u64,
}

impl CounterPair {
    pub fn new(black: u64, white: u64) -> Self {
        Self { black, white }
    }

    /// Pixels that were neither BLACK nor WHITE.
    pub fn other(&self, pixel_count: u64) -> u64 {
        pixel_count.saturating_sub(self.black + self.white)
    }

    pub fn record(&mut self, category: Category) {
        match category {
            Category::Black => self.black += 1,
            Category::White => self.white += 1,
            Category::Other => {}
        }
    }

    pub fn merge(self, other: CounterPair) -> CounterPair {
        CounterPair {
            black: self.black + other.black,
            white: self.white + other.white,
        }
    }
}

/// Wall-clock split of one run. Host runs have no setup phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub setup: Option<Duration>,
    pub compute: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.setup.unwrap_or_default() + self.compute
    }
}

/// Outcome of one successful reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reduction {
    pub backend: Backend,
    pub counts: CounterPair,
    pub timings: PhaseTimings,
}

/// A strategy that visits every pixel exactly once and counts BLACK / WHITE.
///
/// Implementations are interchangeable and selected at run time, see
/// [`AccelerationManager::reducer`].
pub trait PixelReducer: Send + Sync {
    fn backend(&self) -> Backend;

    /// Human-readable description of the executing hardware.
    fn describe(&self) -> String {
        self.backend().to_string()
    }

    fn reduce(&self, image: &Image) -> Result<Reduction, AccelError>;
}
