use tracing::{debug, info, warn};

use crate::accel::cpu::{self, ScalarReducer};
use crate::accel::device::DeviceReductionEngine;
use crate::accel::emulated::EmulatedDevice;
use crate::accel::gpu::{GpuOptions, WgpuDevice};
use crate::accel::host::HostReductionEngine;
use crate::accel::{AccelError, Backend, CounterPair, PixelReducer, Reduction};
use crate::config::{Config, DevicePreference, DeviceSettings, HostSettings};
use crate::raster::Image;

/// A reduction plus its verdict against the scalar reference, if one was checked.
#[derive(Debug, Clone, Copy)]
pub struct Execution {
    pub reduction: Reduction,
    pub matches_reference: Option<bool>,
}

/// Manager to handle backend selection and dispatch
pub struct AccelerationManager {
    device: DeviceSettings,
    host: HostSettings,
    verify: bool,
}

impl AccelerationManager {
    pub fn new(config: &Config) -> Self {
        info!(
            device = ?config.device.backend,
            host_threads = config.host.threads,
            host_strategy = ?config.host.strategy,
            verify = config.bench.verify,
            "AccelerationManager initialized"
        );
        Self {
            device: config.device.clone(),
            host: config.host.clone(),
            verify: config.bench.verify,
        }
    }

    fn gpu_options(&self) -> GpuOptions {
        GpuOptions {
            power_preference: self.device.power_preference.into(),
            workgroup_size: self.device.workgroup_size,
        }
    }

    /// Build a reducer for an explicit backend.
    pub fn reducer(&self, backend: Backend) -> Result<Box<dyn PixelReducer>, AccelError> {
        let reducer: Box<dyn PixelReducer> = match backend {
            Backend::Gpu => Box::new(DeviceReductionEngine::new(WgpuDevice::new(
                &self.gpu_options(),
            )?)?),
            Backend::Emulated => Box::new(DeviceReductionEngine::new(EmulatedDevice::new())?),
            Backend::Host => Box::new(HostReductionEngine::new(
                self.host.threads,
                self.host.strategy,
            )?),
            Backend::Scalar => Box::new(ScalarReducer),
        };
        Ok(reducer)
    }

    /// Device-path reducer per the configured preference.
    ///
    /// `Ok(None)` means the device path is skipped: either it is switched
    /// off, or `auto` found no adapter and the caller should run host only.
    pub fn device_reducer(&self) -> Result<Option<Box<dyn PixelReducer>>, AccelError> {
        match self.device.backend {
            DevicePreference::Off => {
                debug!("device path disabled by configuration");
                Ok(None)
            }
            DevicePreference::Gpu => self.reducer(Backend::Gpu).map(Some),
            DevicePreference::Emulated => self.reducer(Backend::Emulated).map(Some),
            DevicePreference::Auto => match self.reducer(Backend::Gpu) {
                Ok(reducer) => Ok(Some(reducer)),
                Err(AccelError::DeviceUnavailable(reason)) => {
                    warn!(%reason, "no GPU adapter available, running the host path only");
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    }

    pub fn host_reducer(&self) -> Result<Box<dyn PixelReducer>, AccelError> {
        self.reducer(Backend::Host)
    }

    /// Scalar reference count for `image`, when verification is enabled.
    pub fn reference(&self, image: &Image) -> Option<CounterPair> {
        self.verify.then(|| cpu::count_pixels(image))
    }

    /// Run `reducer` once and compare with `reference` when given.
    pub fn execute(
        &self,
        reducer: &dyn PixelReducer,
        image: &Image,
        reference: Option<&CounterPair>,
    ) -> Result<Execution, AccelError> {
        let reduction = reducer.reduce(image)?;

        let matches_reference = reference.map(|expected| {
            let matches = reduction.counts == *expected;
            if matches {
                debug!(backend = %reduction.backend, "verification against scalar reference passed");
            } else {
                warn!(
                    backend = %reduction.backend,
                    got = ?reduction.counts,
                    expected = ?expected,
                    "acceleration mismatch against scalar reference"
                );
            }
            matches
        });

        Ok(Execution {
            reduction,
            matches_reference,
        })
    }
}
