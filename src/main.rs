use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use pixelbench::accel::gpu;
use pixelbench::accel::host::HostStrategy;
use pixelbench::bench::{report, BenchmarkHarness};
use pixelbench::config::{Config, DevicePreference, LogFormat, LoggingSettings};
use pixelbench::raster::synth::{self, Pattern};
use pixelbench::raster::Image;

#[derive(Parser)]
#[command(
    name = "pixelbench",
    about = "Exact black/white pixel counting benchmark: GPU compute vs multi-threaded host",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML); falls back to $PIXELBENCH_CONFIG, then ./pixelbench.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count BLACK / WHITE pixels of an image on the device and host paths
    Bench {
        /// Image file (any format the decoder understands)
        image: PathBuf,

        /// Device path implementation
        #[arg(long, value_enum)]
        device: Option<DevicePreference>,

        /// Repetitions of the device path
        #[arg(long)]
        device_runs: Option<u32>,

        /// Repetitions of the host path
        #[arg(long)]
        host_runs: Option<u32>,

        /// Host worker threads (0 = one per logical core)
        #[arg(long)]
        threads: Option<usize>,

        /// Host counter strategy
        #[arg(long, value_enum)]
        strategy: Option<HostStrategy>,

        /// GPU workgroup size
        #[arg(long)]
        workgroup_size: Option<u32>,

        /// Skip verification against the single-threaded reference
        #[arg(long)]
        no_verify: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Classify a single RGB triple
    Classify { r: u8, g: u8, b: u8 },

    /// List GPU adapters visible to wgpu
    Devices {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Write a synthetic test image
    Generate {
        /// Output file; format follows the extension
        output: PathBuf,

        #[arg(long, value_enum, default_value = "checkerboard")]
        pattern: Pattern,

        #[arg(long, default_value = "1024")]
        width: u32,

        #[arg(long, default_value = "1024")]
        height: u32,

        /// Checkerboard cell edge in pixels
        #[arg(long, default_value = "1")]
        cell: u32,
    },
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    // Logs go to stderr so report output on stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = Config::load_or_default(cli.config.as_deref())?;
    init_tracing(&loaded.config.logging);
    loaded.log();
    let mut config = loaded.config;

    match cli.command {
        Commands::Bench {
            image,
            device,
            device_runs,
            host_runs,
            threads,
            strategy,
            workgroup_size,
            no_verify,
            json,
        } => {
            if let Some(device) = device {
                config.device.backend = device;
            }
            if let Some(runs) = device_runs {
                config.bench.device_runs = runs;
            }
            if let Some(runs) = host_runs {
                config.bench.host_runs = runs;
            }
            if let Some(threads) = threads {
                config.host.threads = threads;
            }
            if let Some(strategy) = strategy {
                config.host.strategy = strategy;
            }
            if let Some(size) = workgroup_size {
                config.device.workgroup_size = size;
            }
            if no_verify {
                config.bench.verify = false;
            }
            config.validate()?;

            let decoded = Image::open(&image)
                .with_context(|| format!("failed to load image {}", image.display()))?;
            let harness = BenchmarkHarness::from_config(&config);
            let session = harness.run(&image.display().to_string(), &decoded);

            if json {
                println!("{}", report::to_json(&session)?);
            } else {
                print!("{}", report::format_summary(&session));
            }

            if !session.is_clean() {
                for failure in session.failures() {
                    eprintln!("error: {failure}");
                }
                bail!(
                    "benchmark finished with {} problem(s)",
                    session.failures().len()
                );
            }
        }
        Commands::Classify { r, g, b } => {
            let luminance = pixelbench::luminance(r, g, b);
            let category = pixelbench::classify(r, g, b);
            println!("rgb({r}, {g}, {b}) -> luminance {luminance} -> {category}");
        }
        Commands::Devices { json } => {
            let adapters = gpu::enumerate_adapters();
            if json {
                println!("{}", serde_json::to_string_pretty(&adapters)?);
            } else if adapters.is_empty() {
                println!("No GPU adapters found; the device path can still run with --device emulated.");
            } else {
                println!("{:<40} | {:<8} | {:<14} | Driver", "Adapter", "Backend", "Type");
                println!("{:-<40}-|-{:-<8}-|-{:-<14}-|-{:-<20}", "", "", "", "");
                for adapter in &adapters {
                    println!(
                        "{:<40} | {:<8} | {:<14} | {}",
                        adapter.name, adapter.backend, adapter.device_type, adapter.driver
                    );
                }
            }
        }
        Commands::Generate {
            output,
            pattern,
            width,
            height,
            cell,
        } => {
            tracing::info!(?pattern, width, height, cell, output = %output.display(), "Generating test image");
            let image = synth::render(pattern, width, height, cell);
            image
                .save(&output)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!(
                "Wrote {}x{} {:?} image to {}",
                width,
                height,
                pattern,
                output.display()
            );
        }
    }

    Ok(())
}
