//! TOML configuration for pixelbench.
//!
//! Layered: an explicit `--config` path, then the `PIXELBENCH_CONFIG`
//! environment variable, then `./pixelbench.toml`, then compiled-in defaults.
//! CLI flags override individual values after loading.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::accel::host::HostStrategy;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PIXELBENCH_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "pixelbench.toml";

/// Largest workgroup the classify kernel is built for.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bench: BenchSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the configuration layers.
    ///
    /// An explicit path must load; the environment and local fallbacks are
    /// recorded as rejected when they cannot be read. Nothing is logged or
    /// validated here: call [`LoadedConfig::log`] once the subscriber is
    /// installed and [`Config::validate`] after CLI overrides.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<LoadedConfig> {
        match explicit {
            Some(path) => Ok(LoadedConfig {
                config: Self::load(path)?,
                origin: Some(path.to_path_buf()),
                rejected: Vec::new(),
            }),
            None => Ok(Self::discover(
                std::env::var_os(CONFIG_ENV).map(PathBuf::from),
                Path::new(LOCAL_CONFIG),
            )),
        }
    }

    fn discover(env_path: Option<PathBuf>, local: &Path) -> LoadedConfig {
        let mut rejected = Vec::new();

        if let Some(path) = env_path {
            match Self::load(&path) {
                Ok(config) => {
                    return LoadedConfig {
                        config,
                        origin: Some(path),
                        rejected,
                    }
                }
                Err(e) => rejected.push(RejectedConfig {
                    source: CONFIG_ENV,
                    path,
                    error: format!("{e:#}"),
                }),
            }
        }

        if local.exists() {
            match Self::load(local) {
                Ok(config) => {
                    return LoadedConfig {
                        config,
                        origin: Some(local.to_path_buf()),
                        rejected,
                    }
                }
                Err(e) => rejected.push(RejectedConfig {
                    source: "working directory",
                    path: local.to_path_buf(),
                    error: format!("{e:#}"),
                }),
            }
        }

        LoadedConfig {
            config: Self::default(),
            origin: None,
            rejected,
        }
    }

    /// Reject settings no run could honour.
    pub fn validate(&self) -> Result<()> {
        let wg = self.device.workgroup_size;
        if wg == 0 || wg > MAX_WORKGROUP_SIZE {
            bail!("device.workgroup_size must be between 1 and {MAX_WORKGROUP_SIZE}, got {wg}");
        }
        let device_runs = if self.device.backend == DevicePreference::Off {
            0
        } else {
            self.bench.device_runs
        };
        if device_runs == 0 && self.bench.host_runs == 0 {
            bail!("nothing to run: both device and host repetitions are zero");
        }
        Ok(())
    }
}

/// A config file that was found or named but could not be used.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedConfig {
    /// Layer that pointed at the file.
    pub source: &'static str,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of layer resolution, with the messages it could not log yet.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// File the config came from; `None` means compiled-in defaults.
    pub origin: Option<PathBuf>,
    pub rejected: Vec<RejectedConfig>,
}

impl LoadedConfig {
    /// Replay the load decisions through the installed subscriber.
    pub fn log(&self) {
        for r in &self.rejected {
            warn!(
                source = r.source,
                path = %r.path.display(),
                error = %r.error,
                "config file could not be loaded, trying fallback"
            );
        }
        match &self.origin {
            Some(path) => info!(path = %path.display(), "loaded pixelbench configuration"),
            None => debug!("no config file found, using compiled-in defaults"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bench
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    /// Repetitions of the device path.
    pub device_runs: u32,
    /// Repetitions of the host path.
    pub host_runs: u32,
    /// Check every run against the single-threaded reference count.
    pub verify: bool,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self {
            device_runs: 2,
            host_runs: 2,
            verify: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Which implementation backs the device path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DevicePreference {
    /// GPU when an adapter is present, otherwise host only
    #[default]
    Auto,
    /// GPU or fail
    Gpu,
    /// Device interface executed on host threads
    Emulated,
    /// Skip the device path
    Off,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(pref: PowerPreference) -> Self {
        match pref {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub backend: DevicePreference,
    /// Invocations per workgroup in the classify kernel.
    pub workgroup_size: u32,
    pub power_preference: PowerPreference,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            backend: DevicePreference::Auto,
            workgroup_size: MAX_WORKGROUP_SIZE,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Worker threads; 0 means one per logical core.
    pub threads: usize,
    pub strategy: HostStrategy,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.bench.device_runs, 2);
        assert_eq!(cfg.bench.host_runs, 2);
        assert!(cfg.bench.verify);
        assert_eq!(cfg.device.backend, DevicePreference::Auto);
        assert_eq!(cfg.device.workgroup_size, 256);
        assert_eq!(cfg.host.threads, 0);
        assert_eq!(cfg.host.strategy, HostStrategy::Atomic);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Text);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[bench]
device_runs = 5
host_runs = 3
verify = false

[device]
backend = "emulated"
workgroup_size = 64
power_preference = "low-power"

[host]
threads = 8
strategy = "fold"

[logging]
level = "debug"
format = "json"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.bench.device_runs, 5);
        assert_eq!(cfg.bench.host_runs, 3);
        assert!(!cfg.bench.verify);
        assert_eq!(cfg.device.backend, DevicePreference::Emulated);
        assert_eq!(cfg.device.workgroup_size, 64);
        assert_eq!(cfg.device.power_preference, PowerPreference::LowPower);
        assert_eq!(cfg.host.threads, 8);
        assert_eq!(cfg.host.strategy, HostStrategy::Fold);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let cfg: Config = toml::from_str(include_str!("../pixelbench.example.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[host]\nthreads = 2\n").unwrap();
        assert_eq!(cfg.host.threads, 2);
        assert_eq!(cfg.bench, BenchSettings::default());
        assert_eq!(cfg.device, DeviceSettings::default());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(toml::from_str::<Config>("[device]\nbackend = \"cuda\"\n").is_err());
    }

    #[test]
    fn test_validate_workgroup_bounds() {
        let mut cfg = Config::default();
        cfg.device.workgroup_size = 0;
        assert!(cfg.validate().is_err());
        cfg.device.workgroup_size = 512;
        assert!(cfg.validate().is_err());
        cfg.device.workgroup_size = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_session() {
        let mut cfg = Config::default();
        cfg.bench.host_runs = 0;
        cfg.device.backend = DevicePreference::Off;
        assert!(cfg.validate().is_err());
        cfg.device.backend = DevicePreference::Emulated;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_explicit_path_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(Config::load_or_default(Some(&missing)).is_err());

        let present = dir.path().join("pixelbench.toml");
        std::fs::write(&present, "[bench]\nhost_runs = 7\n").unwrap();
        let loaded = Config::load_or_default(Some(&present)).unwrap();
        assert_eq!(loaded.config.bench.host_runs, 7);
        assert_eq!(loaded.origin.as_deref(), Some(present.as_path()));
        assert!(loaded.rejected.is_empty());
    }

    #[test]
    fn test_invalid_values_load_and_fail_validation_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[device]\nworkgroup_size = 0\n").unwrap();
        let loaded = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded.config.device.workgroup_size, 0);
        assert!(loaded.config.validate().is_err());
    }

    #[test]
    fn test_empty_session_config_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host-off.toml");
        std::fs::write(&path, "[bench]\nhost_runs = 0\n[device]\nbackend = \"off\"\n").unwrap();
        let mut cfg = Config::load_or_default(Some(&path)).unwrap().config;
        assert!(cfg.validate().is_err());
        cfg.bench.host_runs = 1;
        cfg.validate().unwrap();
    }

    #[test]
    fn test_discover_records_unreadable_env_file_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("missing.toml");
        let local = dir.path().join("pixelbench.toml");
        std::fs::write(&local, "[bench]\ndevice_runs = 9\n").unwrap();

        let loaded = Config::discover(Some(env_path.clone()), &local);
        assert_eq!(loaded.config.bench.device_runs, 9);
        assert_eq!(loaded.origin.as_deref(), Some(local.as_path()));
        assert_eq!(loaded.rejected.len(), 1);
        assert_eq!(loaded.rejected[0].source, CONFIG_ENV);
        assert_eq!(loaded.rejected[0].path, env_path);
        assert!(loaded.rejected[0].error.contains("failed to read config file"));
    }

    #[test]
    fn test_discover_records_broken_local_file_and_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("pixelbench.toml");
        std::fs::write(&local, "[bench\n").unwrap();

        let loaded = Config::discover(None, &local);
        assert_eq!(loaded.config, Config::default());
        assert!(loaded.origin.is_none());
        assert_eq!(loaded.rejected.len(), 1);
        assert!(loaded.rejected[0].error.contains("failed to parse config file"));
    }

    #[test]
    fn test_discover_without_files_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::discover(None, &dir.path().join("pixelbench.toml"));
        assert_eq!(loaded.config, Config::default());
        assert!(loaded.origin.is_none());
        assert!(loaded.rejected.is_empty());
    }
}
