//! wgpu compute backend (Vulkan / Metal / DX12 / GL, whatever the adapter offers).

use std::borrow::Cow;

use serde::Serialize;
use tracing::{debug, error, info};
use wgpu::util::DeviceExt;

use crate::accel::device::ComputeDevice;
use crate::accel::shaders::{self, WORDS_PER_COUNTER};
use crate::accel::{AccelError, Backend};

/// Adapter and kernel parameters for [`WgpuDevice::new`].
#[derive(Debug, Clone, Copy)]
pub struct GpuOptions {
    pub power_preference: wgpu::PowerPreference,
    pub workgroup_size: u32,
}

impl Default for GpuOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            workgroup_size: 256,
        }
    }
}

/// Summary of one adapter, for `pixelbench devices`.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterSummary {
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub driver: String,
}

impl From<wgpu::AdapterInfo> for AdapterSummary {
    fn from(info: wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name,
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            driver: format!("{} {}", info.driver, info.driver_info).trim().to_string(),
        }
    }
}

/// List every adapter wgpu can see on this machine.
pub fn enumerate_adapters() -> Vec<AdapterSummary> {
    let instance = wgpu::Instance::default();
    instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .map(|adapter| AdapterSummary::from(adapter.get_info()))
        .collect()
}

/// Launch uniform; layout matches `LaunchParams` in the WGSL kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LaunchParams {
    pixel_count: u32,
    row_pitch: u32,
    _pad: [u32; 2],
}

/// A wgpu buffer destroyed when dropped.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        debug!(bytes = self.size, "GPU buffer released");
    }
}

pub struct GpuKernel {
    pipeline: wgpu::ComputePipeline,
    workgroup_size: u32,
}

/// GPU device manager
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
    workgroup_size: u32,
}

impl WgpuDevice {
    /// Pick an adapter and open a device on it.
    pub fn new(options: &GpuOptions) -> Result<Self, AccelError> {
        pollster::block_on(Self::new_async(options))
    }

    async fn new_async(options: &GpuOptions) -> Result<Self, AccelError> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| AccelError::DeviceUnavailable("no wgpu adapter found".to_string()))?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        if options.workgroup_size > limits.max_compute_invocations_per_workgroup
            || options.workgroup_size > limits.max_compute_workgroup_size_x
        {
            return Err(AccelError::KernelBuild(format!(
                "workgroup size {} exceeds adapter limit of {}",
                options.workgroup_size,
                limits
                    .max_compute_invocations_per_workgroup
                    .min(limits.max_compute_workgroup_size_x)
            )));
        }

        // Ask for everything the adapter supports so large images fit one binding.
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pixelbench device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| AccelError::DeviceUnavailable(format!("failed to create device: {e}")))?;

        device.on_uncaptured_error(Box::new(|err: wgpu::Error| {
            error!(%err, "uncaptured wgpu error");
        }));

        info!(
            adapter = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "GPU device ready"
        );

        Ok(Self {
            device,
            queue,
            info,
            limits,
            workgroup_size: options.workgroup_size,
        })
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        (value, out_of_memory.or(validation))
    }

    fn create_buffer(
        &self,
        label: &'static str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> Result<GpuBuffer, wgpu::Error> {
        let (buffer, err) = self.scoped(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        });
        let buffer = GpuBuffer { buffer, size };
        match err {
            Some(err) => Err(err),
            None => Ok(buffer),
        }
    }

    fn max_binding_size(&self) -> u64 {
        u64::from(self.limits.max_storage_buffer_binding_size).min(self.limits.max_buffer_size)
    }
}

/// Round up to the copy alignment, never below one word.
fn padded_size(byte_count: u64) -> u64 {
    byte_count
        .max(wgpu::COPY_BUFFER_ALIGNMENT)
        .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

/// Fold `work_items` into an `(x, y)` workgroup grid within `max_dim` per axis.
fn dispatch_grid(work_items: u64, workgroup_size: u32, max_dim: u32) -> Option<(u32, u32)> {
    let groups = work_items.div_ceil(u64::from(workgroup_size));
    let x = groups.min(u64::from(max_dim)).max(1);
    let y = groups.div_ceil(x);
    if y > u64::from(max_dim) {
        return None;
    }
    Some((x as u32, y as u32))
}

impl ComputeDevice for WgpuDevice {
    type Buffer = GpuBuffer;
    type Kernel = GpuKernel;

    fn backend(&self) -> Backend {
        Backend::Gpu
    }

    fn describe(&self) -> String {
        format!(
            "{} ({:?}, {:?}, workgroup {})",
            self.info.name, self.info.backend, self.info.device_type, self.workgroup_size
        )
    }

    fn build_kernel(&self) -> Result<GpuKernel, AccelError> {
        let source = shaders::classify_shader(self.workgroup_size);
        let (pipeline, err) = self.scoped(|| {
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("pixelbench classify shader"),
                    source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
                });
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("pixelbench classify pipeline"),
                    layout: None,
                    module: &module,
                    entry_point: shaders::CLASSIFY_ENTRY_POINT,
                    compilation_options: Default::default(),
                    cache: None,
                })
        });
        if let Some(err) = err {
            return Err(AccelError::KernelBuild(err.to_string()));
        }
        Ok(GpuKernel {
            pipeline,
            workgroup_size: self.workgroup_size,
        })
    }

    fn allocate_buffer(&self, byte_count: u64) -> Result<GpuBuffer, AccelError> {
        let size = padded_size(byte_count);
        let max = self.max_binding_size();
        if size > max {
            return Err(AccelError::DeviceAlloc {
                bytes: byte_count,
                reason: format!("exceeds the device binding limit of {max} bytes"),
            });
        }
        self.create_buffer(
            "pixelbench pixels",
            size,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )
        .map_err(|e| AccelError::DeviceAlloc {
            bytes: byte_count,
            reason: e.to_string(),
        })
    }

    fn upload(&self, buffer: &GpuBuffer, bytes: &[u8]) -> Result<(), AccelError> {
        if bytes.len() as u64 > buffer.size {
            return Err(AccelError::Transfer(format!(
                "{} bytes do not fit a {} byte buffer",
                bytes.len(),
                buffer.size
            )));
        }
        // write_buffer wants 4-byte multiples; the last partial word is zero-padded.
        let aligned = bytes.len() - bytes.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let ((), err) = self.scoped(|| {
            if aligned > 0 {
                self.queue.write_buffer(&buffer.buffer, 0, &bytes[..aligned]);
            }
            if aligned < bytes.len() {
                let mut tail = [0u8; wgpu::COPY_BUFFER_ALIGNMENT as usize];
                tail[..bytes.len() - aligned].copy_from_slice(&bytes[aligned..]);
                self.queue.write_buffer(&buffer.buffer, aligned as u64, &tail);
            }
        });
        match err {
            Some(err) => Err(AccelError::Transfer(err.to_string())),
            None => Ok(()),
        }
    }

    fn allocate_counter(&self, slots: usize) -> Result<GpuBuffer, AccelError> {
        let size = (slots * WORDS_PER_COUNTER * std::mem::size_of::<u32>()) as u64;
        let counters = self
            .create_buffer(
                "pixelbench counters",
                padded_size(size),
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            )
            .map_err(|e| AccelError::DeviceAlloc {
                bytes: size,
                reason: e.to_string(),
            })?;
        let zeros = vec![0u8; counters.size as usize];
        self.upload(&counters, &zeros)?;
        Ok(counters)
    }

    fn launch(
        &self,
        kernel: &GpuKernel,
        work_items: u64,
        input: &GpuBuffer,
        counter: &GpuBuffer,
    ) -> Result<(), AccelError> {
        if work_items == 0 {
            return Ok(());
        }
        let fail = |reason: String| AccelError::DeviceLaunch { work_items, reason };

        // Byte offsets 3k are computed in u32 inside the kernel.
        let pixel_count = u32::try_from(work_items)
            .ok()
            .filter(|&n| u64::from(n) * 3 <= u64::from(u32::MAX))
            .ok_or_else(|| fail("pixel count exceeds 32-bit kernel addressing".to_string()))?;
        let (groups_x, groups_y) = dispatch_grid(
            work_items,
            kernel.workgroup_size,
            self.limits.max_compute_workgroups_per_dimension,
        )
        .ok_or_else(|| fail("dispatch grid exceeds device limits".to_string()))?;

        let params = LaunchParams {
            pixel_count,
            row_pitch: groups_x * kernel.workgroup_size,
            _pad: [0; 2],
        };

        let ((), err) = self.scoped(|| {
            let params_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("pixelbench launch params"),
                    contents: bytemuck::bytes_of(&params),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let layout = kernel.pipeline.get_bind_group_layout(0);
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pixelbench classify bindings"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: input.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: counter.buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("pixelbench classify encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("pixelbench classify pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&kernel.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            self.queue.submit(Some(encoder.finish()));
        });
        if let Some(err) = err {
            return Err(fail(err.to_string()));
        }

        debug!(work_items, groups_x, groups_y, "classify kernel submitted");
        Ok(())
    }

    fn synchronize(&self) -> Result<(), AccelError> {
        // Submitting nothing still flushes queued write_buffer calls.
        self.queue.submit(std::iter::empty());
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_back(&self, counter: &GpuBuffer) -> Result<Vec<u64>, AccelError> {
        let staging = self
            .create_buffer(
                "pixelbench counter staging",
                counter.size,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            )
            .map_err(|e| AccelError::Readback(e.to_string()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixelbench readback encoder"),
            });
        encoder.copy_buffer_to_buffer(&counter.buffer, 0, &staging.buffer, 0, counter.size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        pollster::block_on(receiver.receive())
            .ok_or_else(|| AccelError::Readback("map callback was dropped".to_string()))?
            .map_err(|e| AccelError::Readback(format!("buffer mapping failed: {e}")))?;

        let words: Vec<u32> = {
            let data = slice.get_mapped_range();
            data.chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        };
        staging.buffer.unmap();

        Ok(words
            .chunks_exact(WORDS_PER_COUNTER)
            .map(|w| u64::from(w[0]) | (u64::from(w[1]) << 32))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::cpu;
    use crate::accel::device::DeviceReductionEngine;
    use crate::accel::{CounterPair, PixelReducer};
    use crate::raster::{synth, Image, Pixel};

    fn gpu_or_skip() -> Option<WgpuDevice> {
        match WgpuDevice::new(&GpuOptions::default()) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                None
            }
        }
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 4);
        assert_eq!(padded_size(3), 4);
        assert_eq!(padded_size(4), 4);
        assert_eq!(padded_size(13), 16);
    }

    #[test]
    fn test_dispatch_grid_folds_into_second_axis() {
        assert_eq!(dispatch_grid(1, 256, 65535), Some((1, 1)));
        assert_eq!(dispatch_grid(256 * 10, 256, 65535), Some((10, 1)));
        // 4096 x 4096 needs 65536 groups of 256.
        assert_eq!(dispatch_grid(4096 * 4096, 256, 65535), Some((65535, 2)));
        assert_eq!(dispatch_grid(u64::MAX / 2, 256, 65535), None);
    }

    #[test]
    fn test_launch_params_layout() {
        assert_eq!(std::mem::size_of::<LaunchParams>(), 16);
    }

    #[test]
    fn test_gpu_matches_reference() {
        let Some(device) = gpu_or_skip() else { return };
        let engine = DeviceReductionEngine::new(device).unwrap();
        for image in [
            Image::empty(),
            Image::new(1, 1, vec![Pixel::BLACK]).unwrap(),
            Image::new(1, 1, vec![Pixel::WHITE]).unwrap(),
            synth::gradient(333, 77),
            synth::checkerboard(1000, 999, 3),
        ] {
            let reduction = engine.reduce(&image).unwrap();
            assert_eq!(reduction.counts, cpu::count_pixels(&image));
        }
    }

    #[test]
    fn test_gpu_counter_carry() {
        let Some(device) = gpu_or_skip() else { return };
        let counters = device.allocate_counter(2).unwrap();
        // lo word of slot 0 one below wrap
        let seeded = [0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        device.upload(&counters, &seeded).unwrap();
        let kernel = device.build_kernel().unwrap();
        let input = device.allocate_buffer(6).unwrap();
        device.upload(&input, &[0, 0, 0, 0, 0, 0]).unwrap();
        device.launch(&kernel, 2, &input, &counters).unwrap();
        device.synchronize().unwrap();
        let slots = device.read_back(&counters).unwrap();
        assert_eq!(
            CounterPair::new(slots[0], slots[1]),
            CounterPair::new(u64::from(u32::MAX) + 2, 0)
        );
    }
}
