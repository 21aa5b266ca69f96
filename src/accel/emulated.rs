//! Host-emulated accelerator.
//!
//! Implements [`ComputeDevice`] on the CPU: buffers live in host memory and a
//! launch runs the kernel entry point once per work-item index on the rayon
//! global pool, with 64-bit atomic counter slots. Useful on machines without a
//! GPU adapter, and for exercising allocation / launch failures in tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use tracing::trace;

use crate::accel::device::{ComputeDevice, BLACK_SLOT, WHITE_SLOT};
use crate::accel::{classify, AccelError, Backend, Category};
use crate::raster::flatten::BYTES_PER_PIXEL;

/// Tracks live emulated allocations.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    live_buffers: AtomicUsize,
    peak_buffers: AtomicUsize,
    live_bytes: AtomicU64,
}

impl AllocationLedger {
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live buffers seen so far.
    pub fn peak_buffers(&self) -> usize {
        self.peak_buffers.load(Ordering::SeqCst)
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::SeqCst)
    }

    fn acquire(&self, bytes: u64) {
        let live = self.live_buffers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_buffers.fetch_max(live, Ordering::SeqCst);
        self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn release(&self, bytes: u64) {
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

enum Storage {
    Bytes(RwLock<Vec<u8>>),
    Counters(Vec<AtomicU64>),
}

pub struct EmulatedBuffer {
    storage: Storage,
    bytes: u64,
    ledger: Arc<AllocationLedger>,
}

impl Drop for EmulatedBuffer {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
        trace!(bytes = self.bytes, "emulated buffer released");
    }
}

/// Entry point invoked once per work item: `(pixels, index, counters)`.
pub type WorkItemFn = fn(&[u8], u64, &[AtomicU64]);

pub struct EmulatedKernel {
    entry: WorkItemFn,
}

/// Classify pixel `index` and bump its counter slot.
fn classify_work_item(pixels: &[u8], index: u64, counters: &[AtomicU64]) {
    let base = index as usize * BYTES_PER_PIXEL;
    match classify(pixels[base], pixels[base + 1], pixels[base + 2]) {
        Category::Black => {
            counters[BLACK_SLOT].fetch_add(1, Ordering::Relaxed);
        }
        Category::White => {
            counters[WHITE_SLOT].fetch_add(1, Ordering::Relaxed);
        }
        Category::Other => {}
    }
}

#[derive(Default)]
pub struct EmulatedDevice {
    memory_limit: Option<u64>,
    fail_launch: bool,
    fail_upload: bool,
    ledger: Arc<AllocationLedger>,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any allocation that would push live bytes above `bytes`.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Make every launch fail.
    pub fn with_launch_failure(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Make every host-to-device copy fail.
    pub fn with_upload_failure(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub fn ledger(&self) -> Arc<AllocationLedger> {
        Arc::clone(&self.ledger)
    }

    fn reserve(&self, bytes: u64, storage: Storage) -> Result<EmulatedBuffer, AccelError> {
        if let Some(limit) = self.memory_limit {
            let live = self.ledger.live_bytes();
            if live + bytes > limit {
                return Err(AccelError::DeviceAlloc {
                    bytes,
                    reason: format!("emulated budget exhausted ({live} of {limit} bytes in use)"),
                });
            }
        }
        self.ledger.acquire(bytes);
        Ok(EmulatedBuffer {
            storage,
            bytes,
            ledger: Arc::clone(&self.ledger),
        })
    }
}

impl ComputeDevice for EmulatedDevice {
    type Buffer = EmulatedBuffer;
    type Kernel = EmulatedKernel;

    fn backend(&self) -> Backend {
        Backend::Emulated
    }

    fn describe(&self) -> String {
        format!(
            "host-emulated device ({} threads)",
            rayon::current_num_threads()
        )
    }

    fn build_kernel(&self) -> Result<EmulatedKernel, AccelError> {
        Ok(EmulatedKernel {
            entry: classify_work_item,
        })
    }

    fn allocate_buffer(&self, byte_count: u64) -> Result<EmulatedBuffer, AccelError> {
        let len = usize::try_from(byte_count).map_err(|_| AccelError::DeviceAlloc {
            bytes: byte_count,
            reason: "exceeds host address space".to_string(),
        })?;
        self.reserve(byte_count, Storage::Bytes(RwLock::new(vec![0u8; len])))
    }

    fn upload(&self, buffer: &EmulatedBuffer, bytes: &[u8]) -> Result<(), AccelError> {
        let Storage::Bytes(storage) = &buffer.storage else {
            return Err(AccelError::Transfer("target is a counter buffer".to_string()));
        };
        if self.fail_upload {
            return Err(AccelError::Transfer("upload failure injected".to_string()));
        }
        let mut storage = storage
            .write()
            .map_err(|_| AccelError::Transfer("buffer lock poisoned".to_string()))?;
        if bytes.len() > storage.len() {
            return Err(AccelError::Transfer(format!(
                "{} bytes do not fit a {} byte buffer",
                bytes.len(),
                storage.len()
            )));
        }
        storage[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn allocate_counter(&self, slots: usize) -> Result<EmulatedBuffer, AccelError> {
        let counters = (0..slots).map(|_| AtomicU64::new(0)).collect();
        self.reserve(slots as u64 * 8, Storage::Counters(counters))
    }

    fn launch(
        &self,
        kernel: &EmulatedKernel,
        work_items: u64,
        input: &EmulatedBuffer,
        counter: &EmulatedBuffer,
    ) -> Result<(), AccelError> {
        let fail = |reason: &str| AccelError::DeviceLaunch {
            work_items,
            reason: reason.to_string(),
        };
        if self.fail_launch {
            return Err(fail("launch failure injected"));
        }
        let (Storage::Bytes(pixels), Storage::Counters(counters)) =
            (&input.storage, &counter.storage)
        else {
            return Err(fail("buffer kinds do not match the kernel signature"));
        };
        if counters.len() <= WHITE_SLOT {
            return Err(fail("counter buffer has too few slots"));
        }
        let pixels = pixels.read().map_err(|_| fail("buffer lock poisoned"))?;
        if (pixels.len() as u64) < work_items * BYTES_PER_PIXEL as u64 {
            return Err(fail("work items exceed the pixel buffer"));
        }

        let pixels: &[u8] = &pixels;
        let entry = kernel.entry;
        (0..work_items)
            .into_par_iter()
            .for_each(|k| entry(pixels, k, counters));
        Ok(())
    }

    fn synchronize(&self) -> Result<(), AccelError> {
        // Launches run to completion before returning.
        Ok(())
    }

    fn read_back(&self, counter: &EmulatedBuffer) -> Result<Vec<u64>, AccelError> {
        match &counter.storage {
            Storage::Counters(slots) => Ok(slots.iter().map(|c| c.load(Ordering::Acquire)).collect()),
            Storage::Bytes(_) => Err(AccelError::Readback(
                "source is not a counter buffer".to_string(),
            )),
        }
    }
}
