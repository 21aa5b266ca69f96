//! Device collaborator interface and the Device Reduction Engine built on it.
//!
//! A run is split into two scoped phases:
//!
//! 1. [`DeviceReductionEngine::stage`] flattens the image, allocates the pixel
//!    and counter buffers and uploads the pixels.
//! 2. [`DeviceReductionEngine::execute`] launches one work item per pixel,
//!    waits on the completion barrier and reads the counters back.
//!
//! Buffers are owned values; dropping one releases its device allocation, so
//! every exit path (including `?` on an error) frees whatever was acquired.

use std::time::Instant;

use tracing::{debug, info};

use crate::accel::{AccelError, Backend, CounterPair, PhaseTimings, PixelReducer, Reduction};
use crate::raster::{flatten, Image};

/// Number of logical counters the kernel writes.
pub const COUNTER_SLOTS: usize = 2;
pub const BLACK_SLOT: usize = 0;
pub const WHITE_SLOT: usize = 1;

/// Minimal accelerator capability the reduction needs.
pub trait ComputeDevice: Send + Sync {
    /// Device-resident allocation. Dropping it releases the memory.
    type Buffer: Send + Sync;
    /// Compiled classification kernel, built once per engine.
    type Kernel: Send + Sync;

    fn backend(&self) -> Backend;

    fn describe(&self) -> String;

    fn build_kernel(&self) -> Result<Self::Kernel, AccelError>;

    /// Allocate `byte_count` bytes of pixel storage. Fails with
    /// [`AccelError::DeviceAlloc`] when the device cannot hold it.
    fn allocate_buffer(&self, byte_count: u64) -> Result<Self::Buffer, AccelError>;

    /// Copy `bytes` into the start of `buffer`.
    fn upload(&self, buffer: &Self::Buffer, bytes: &[u8]) -> Result<(), AccelError>;

    /// Allocate `slots` zero-initialized 64-bit counters.
    fn allocate_counter(&self, slots: usize) -> Result<Self::Buffer, AccelError>;

    /// Enqueue `work_items` independent invocations of `kernel`.
    fn launch(
        &self,
        kernel: &Self::Kernel,
        work_items: u64,
        input: &Self::Buffer,
        counter: &Self::Buffer,
    ) -> Result<(), AccelError>;

    /// Block until all launched work and pending transfers have completed.
    fn synchronize(&self) -> Result<(), AccelError>;

    /// Copy a counter buffer back to the host.
    fn read_back(&self, counter: &Self::Buffer) -> Result<Vec<u64>, AccelError>;

    fn release(&self, buffer: Self::Buffer) {
        drop(buffer);
    }
}

/// Buffers acquired for one device run.
pub struct StagedRun<D: ComputeDevice> {
    input: D::Buffer,
    counters: D::Buffer,
    work_items: u64,
}

impl<D: ComputeDevice> StagedRun<D> {
    pub fn work_items(&self) -> u64 {
        self.work_items
    }
}

/// Device Reduction Engine: one work item per pixel, atomic counter slots.
pub struct DeviceReductionEngine<D: ComputeDevice> {
    device: D,
    kernel: D::Kernel,
}

impl<D: ComputeDevice> DeviceReductionEngine<D> {
    pub fn new(device: D) -> Result<Self, AccelError> {
        let kernel = device.build_kernel()?;
        info!(device = %device.describe(), "device reduction engine ready");
        Ok(Self { device, kernel })
    }

    /// Flatten `image` and make it resident on the device together with a
    /// zeroed counter pair. Returns once the upload has completed.
    pub fn stage(&self, image: &Image) -> Result<StagedRun<D>, AccelError> {
        let flat = flatten::flatten(image);
        let input = self.device.allocate_buffer(flat.len() as u64)?;
        self.device.upload(&input, &flat)?;
        let counters = self.device.allocate_counter(COUNTER_SLOTS)?;
        self.device.synchronize()?;
        debug!(bytes = flat.len(), "pixels resident on device");
        Ok(StagedRun {
            input,
            counters,
            work_items: image.pixel_count(),
        })
    }

    /// Launch, wait for the completion barrier, then read the counters.
    pub fn execute(&self, staged: &StagedRun<D>) -> Result<CounterPair, AccelError> {
        self.device.launch(
            &self.kernel,
            staged.work_items,
            &staged.input,
            &staged.counters,
        )?;
        self.device.synchronize()?;

        let slots = self.device.read_back(&staged.counters)?;
        if slots.len() < COUNTER_SLOTS {
            return Err(AccelError::Readback(format!(
                "expected {COUNTER_SLOTS} counter slots, got {}",
                slots.len()
            )));
        }
        Ok(CounterPair::new(slots[BLACK_SLOT], slots[WHITE_SLOT]))
    }

    /// Release both buffers of a finished run.
    pub fn release(&self, staged: StagedRun<D>) {
        self.device.release(staged.input);
        self.device.release(staged.counters);
    }
}

impl<D: ComputeDevice> PixelReducer for DeviceReductionEngine<D> {
    fn backend(&self) -> Backend {
        self.device.backend()
    }

    fn describe(&self) -> String {
        self.device.describe()
    }

    fn reduce(&self, image: &Image) -> Result<Reduction, AccelError> {
        let setup_start = Instant::now();
        let staged = self.stage(image)?;
        let setup = setup_start.elapsed();

        let compute_start = Instant::now();
        let counts = self.execute(&staged)?;
        let compute = compute_start.elapsed();

        self.release(staged);
        Ok(Reduction {
            backend: self.device.backend(),
            counts,
            timings: PhaseTimings {
                setup: Some(setup),
                compute,
            },
        })
    }
}
