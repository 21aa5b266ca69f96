//! Benchmark harness: repeated device and host runs on one image.

pub mod report;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::accel::manager::Execution;
use crate::accel::{AccelError, AccelerationManager, Backend, CounterPair, Phase, PixelReducer};
use crate::config::{BenchSettings, Config};
use crate::raster::Image;

pub const DEVICE_PATH: &str = "device";
pub const HOST_PATH: &str = "host";

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("{path} path failed during {phase} (run {run}): {source}")]
    RunFailed {
        path: &'static str,
        run: u32,
        phase: Phase,
        #[source]
        source: AccelError,
    },

    #[error(
        "{path} run {run} disagrees with the scalar reference: got black={} white={}, expected black={} white={}",
        .counts.black, .counts.white, .expected.black, .expected.white
    )]
    ReferenceMismatch {
        path: &'static str,
        run: u32,
        counts: CounterPair,
        expected: CounterPair,
    },

    #[error(
        "device and host paths disagree: device black={} white={}, host black={} white={}",
        .device.black, .device.white, .host.black, .host.white
    )]
    Disagreement {
        device: CounterPair,
        host: CounterPair,
    },
}

/// Result of one repetition. Failed runs carry no counts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Ok {
        #[serde(flatten)]
        counts: CounterPair,
        /// Allocation + transfer; absent on the host path.
        setup_ms: Option<f64>,
        /// Launch + barrier + readback on the device path, whole run on the host path.
        compute_ms: f64,
        total_ms: f64,
        matches_reference: Option<bool>,
    },
    Failed {
        phase: Phase,
        error: String,
    },
}

impl From<&Execution> for RunOutcome {
    fn from(execution: &Execution) -> Self {
        let timings = execution.reduction.timings;
        RunOutcome::Ok {
            counts: execution.reduction.counts,
            setup_ms: timings.setup.map(millis),
            compute_ms: millis(timings.compute),
            total_ms: millis(timings.total()),
            matches_reference: execution.matches_reference,
        }
    }
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run: u32,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

/// All runs of one path.
#[derive(Debug, Clone, Serialize)]
pub struct PathReport {
    pub path: &'static str,
    /// Absent when the reducer could not be constructed.
    pub backend: Option<Backend>,
    pub hardware: Option<String>,
    pub runs: Vec<RunRecord>,
}

impl PathReport {
    /// Counts of every successful run, in order.
    pub fn successes(&self) -> Vec<CounterPair> {
        self.runs
            .iter()
            .filter_map(|record| match &record.outcome {
                RunOutcome::Ok { counts, .. } => Some(*counts),
                RunOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn has_failure(&self) -> bool {
        self.runs
            .iter()
            .any(|record| matches!(record.outcome, RunOutcome::Failed { .. }))
    }
}

/// Cross-path verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Agreement {
    Agree { counts: CounterPair },
    Disagree { device: CounterPair, host: CounterPair },
    /// One of the paths produced no successful run.
    Incomplete,
}

impl Agreement {
    fn between(device: Option<&PathReport>, host: Option<&PathReport>) -> Self {
        let device = device.map(PathReport::successes).unwrap_or_default();
        let host = host.map(PathReport::successes).unwrap_or_default();
        let Some(&first) = device.first() else {
            return Agreement::Incomplete;
        };
        if host.is_empty() {
            return Agreement::Incomplete;
        }
        for &d in &device {
            for &h in &host {
                if d != h {
                    return Agreement::Disagree { device: d, host: h };
                }
            }
        }
        Agreement::Agree { counts: first }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub pixels: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub image: ImageSummary,
    /// Scalar reference counts when verification is on.
    pub reference: Option<CounterPair>,
    pub device: Option<PathReport>,
    pub host: Option<PathReport>,
    pub agreement: Agreement,
    #[serde(skip)]
    failures: Vec<BenchError>,
}

impl SessionReport {
    /// Failed runs, reference mismatches and cross-path disagreement, in the order seen.
    pub fn failures(&self) -> &[BenchError] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct BenchmarkHarness {
    manager: AccelerationManager,
    device_runs: u32,
    host_runs: u32,
}

impl BenchmarkHarness {
    pub fn new(manager: AccelerationManager, settings: &BenchSettings) -> Self {
        Self {
            manager,
            device_runs: settings.device_runs,
            host_runs: settings.host_runs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(AccelerationManager::new(config), &config.bench)
    }

    /// Run both paths on `image`. Never aborts early: failures end their
    /// own path and are collected in the report.
    pub fn run(&self, source: &str, image: &Image) -> SessionReport {
        let started_at = Utc::now();
        info!(
            %source,
            width = image.width(),
            height = image.height(),
            device_runs = self.device_runs,
            host_runs = self.host_runs,
            "benchmark session started"
        );

        let reference = self.manager.reference(image);
        let mut failures = Vec::new();

        let device = if self.device_runs == 0 {
            None
        } else {
            match self.manager.device_reducer() {
                Ok(Some(reducer)) => Some(self.measure(
                    DEVICE_PATH,
                    reducer.as_ref(),
                    image,
                    self.device_runs,
                    reference.as_ref(),
                    &mut failures,
                )),
                Ok(None) => None,
                Err(e) => Some(unavailable(DEVICE_PATH, e, &mut failures)),
            }
        };

        let host = if self.host_runs == 0 {
            None
        } else {
            match self.manager.host_reducer() {
                Ok(reducer) => Some(self.measure(
                    HOST_PATH,
                    reducer.as_ref(),
                    image,
                    self.host_runs,
                    reference.as_ref(),
                    &mut failures,
                )),
                Err(e) => Some(unavailable(HOST_PATH, e, &mut failures)),
            }
        };

        let agreement = Agreement::between(device.as_ref(), host.as_ref());
        if let Agreement::Disagree { device, host } = agreement {
            error!(?device, ?host, "device and host paths disagree");
            failures.push(BenchError::Disagreement { device, host });
        }

        info!(?agreement, failures = failures.len(), "benchmark session finished");
        SessionReport {
            started_at,
            image: ImageSummary {
                source: source.to_string(),
                width: image.width(),
                height: image.height(),
                pixels: image.pixel_count(),
            },
            reference,
            device,
            host,
            agreement,
            failures,
        }
    }

    /// Up to `runs` repetitions; the first failure ends the path.
    fn measure(
        &self,
        path: &'static str,
        reducer: &dyn PixelReducer,
        image: &Image,
        runs: u32,
        reference: Option<&CounterPair>,
        failures: &mut Vec<BenchError>,
    ) -> PathReport {
        let mut records = Vec::with_capacity(runs as usize);
        for run in 1..=runs {
            match self.manager.execute(reducer, image, reference) {
                Ok(execution) => {
                    let reduction = &execution.reduction;
                    info!(
                        path,
                        run,
                        black = reduction.counts.black,
                        white = reduction.counts.white,
                        setup_ms = reduction.timings.setup.map(millis),
                        compute_ms = millis(reduction.timings.compute),
                        "run complete"
                    );
                    if let (Some(false), Some(expected)) = (execution.matches_reference, reference)
                    {
                        failures.push(BenchError::ReferenceMismatch {
                            path,
                            run,
                            counts: reduction.counts,
                            expected: *expected,
                        });
                    }
                    records.push(RunRecord {
                        run,
                        outcome: RunOutcome::from(&execution),
                    });
                }
                Err(source) => {
                    let phase = source.phase();
                    error!(path, run, %phase, error = %source, "run failed, ending this path");
                    records.push(RunRecord {
                        run,
                        outcome: RunOutcome::Failed {
                            phase,
                            error: source.to_string(),
                        },
                    });
                    failures.push(BenchError::RunFailed {
                        path,
                        run,
                        phase,
                        source,
                    });
                    break;
                }
            }
        }
        PathReport {
            path,
            backend: Some(reducer.backend()),
            hardware: Some(reducer.describe()),
            runs: records,
        }
    }
}

/// Report for a path whose reducer could not be built.
fn unavailable(path: &'static str, source: AccelError, failures: &mut Vec<BenchError>) -> PathReport {
    let phase = source.phase();
    error!(path, %phase, error = %source, "path could not be set up");
    let record = RunRecord {
        run: 1,
        outcome: RunOutcome::Failed {
            phase,
            error: source.to_string(),
        },
    };
    failures.push(BenchError::RunFailed {
        path,
        run: 1,
        phase,
        source,
    });
    PathReport {
        path,
        backend: None,
        hardware: None,
        runs: vec![record],
    }
}
