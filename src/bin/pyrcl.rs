/// pyrcl – OpenCL image-pyramid derivative benchmark.
///
///   pyrcl                               → reference batch, per-level images
///   pyrcl -l buffer -m single -m 4 -s 2 → two methods at sigma size 2
///   pyrcl -i photo.png --verify         → real image, check against CPU
///   pyrcl --config batch.json -f json   → batch from file, JSON report
///   pyrcl --list-devices                → print OpenCL devices and exit
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;

use pyrcl::bench::{format_report, run_batch, verify_levels};
use pyrcl::config::{BenchConfig, ReportFormat};
use pyrcl::controller::{Layout, PyramidController};
use pyrcl::filter::BorderMode;
use pyrcl::host_image::HostImage;
use pyrcl::method::Method;
use pyrcl::pyramid::NUMBER_OCTAVES;

#[derive(Debug, Parser)]
#[command(name = "pyrcl", version, about = "OpenCL image-pyramid derivative benchmark")]
struct Cli {
    /// JSON batch description; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage layout: images, cubes or buffer.
    #[arg(short, long)]
    layout: Option<Layout>,

    /// Method name or id; repeat for several.
    #[arg(short, long = "method")]
    methods: Vec<Method>,

    /// Derivative kernel size family (1..=4); repeat for several.
    #[arg(short, long = "sigma")]
    sigma_sizes: Vec<usize>,

    /// Timed runs per method and sigma size.
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Border mode: replicate or reflect101.
    #[arg(short, long)]
    border: Option<BorderMode>,

    /// Source image; a synthetic pattern when absent.
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Synthetic source width.
    #[arg(long)]
    width: Option<usize>,

    /// Synthetic source height.
    #[arg(long)]
    height: Option<usize>,

    /// Prefer a CPU device over GPUs.
    #[arg(long)]
    cpu: bool,

    /// Log per-launch device time (debug level).
    #[arg(long)]
    profile: bool,

    /// Compile kernels with warnings as errors and debug info.
    #[arg(long)]
    debug_build: bool,

    /// Report format: table, mathematica, javascript or json.
    #[arg(short, long)]
    format: Option<ReportFormat>,

    /// Compare device results with the CPU reference.
    #[arg(long)]
    verify: bool,

    /// Write every pyramid level as PNG into this directory.
    #[arg(long)]
    save_levels: Option<PathBuf>,

    /// Print the available OpenCL devices and exit.
    #[arg(long)]
    list_devices: bool,
}

impl Cli {
    fn into_config(self) -> Result<(BenchConfig, Option<PathBuf>, bool)> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::from_json_file(path)?,
            None => BenchConfig::default(),
        };
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if !self.methods.is_empty() {
            config.methods = self.methods;
        }
        if !self.sigma_sizes.is_empty() {
            config.sigma_sizes = self.sigma_sizes;
        }
        if let Some(n) = self.iterations {
            config.iterations = n;
        }
        if let Some(border) = self.border {
            config.border = border;
        }
        if self.image.is_some() {
            config.image = self.image;
        }
        if let Some(w) = self.width {
            config.width = w;
        }
        if let Some(h) = self.height {
            config.height = h;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        config.prefer_gpu &= !self.cpu;
        config.profiling |= self.profile;
        config.debug_build |= self.debug_build;
        config.verify |= self.verify;
        config.validate()?;
        Ok((config, self.save_levels, self.list_devices))
    }
}

fn load_source(config: &BenchConfig) -> Result<HostImage> {
    let img = match &config.image {
        Some(path) => HostImage::load(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => HostImage::synthetic(config.width, config.height),
    };
    let aligned = img.crop_aligned(1 << (NUMBER_OCTAVES - 1));
    if (aligned.width(), aligned.height()) != (img.width(), img.height()) {
        log::warn!(
            "cropped source from {}x{} to {}x{}",
            img.width(),
            img.height(),
            aligned.width(),
            aligned.height()
        );
    }
    if aligned.width() == 0 || aligned.height() == 0 {
        bail!("source image is smaller than one 8x8 block");
    }
    Ok(aligned)
}

#[cfg(feature = "opencl")]
fn list_devices() {
    let devices = pyrcl::opencl::probe_devices();
    if devices.is_empty() {
        println!("no OpenCL devices");
        return;
    }
    for (i, d) in devices.iter().enumerate() {
        println!(
            "{i}: {} ({}) {} work-group {} memory {} MiB",
            d.name,
            d.vendor,
            if d.is_gpu { "GPU" } else { "CPU/other" },
            d.max_work_group_size,
            d.global_mem_size >> 20
        );
    }
}

#[cfg(feature = "opencl")]
fn make_controller(config: &BenchConfig) -> Result<Box<dyn PyramidController>> {
    use pyrcl::opencl::{ClBackend, CubesController, FlatController, ImagesController};
    use std::rc::Rc;

    let backend = Rc::new(
        ClBackend::with_options(config.prefer_gpu, config.profiling)
            .context("selecting an OpenCL device")?,
    );
    let (border, debug) = (config.border, config.debug_build);
    Ok(match config.layout {
        Layout::Images => Box::new(ImagesController::with_options(backend, border, debug)),
        Layout::Cubes => Box::new(CubesController::with_options(backend, border, debug)),
        Layout::Buffer => Box::new(FlatController::with_options(backend, border, debug)),
    })
}

#[cfg(not(feature = "opencl"))]
fn list_devices() {
    println!("built without the opencl feature");
}

#[cfg(not(feature = "opencl"))]
fn make_controller(_config: &BenchConfig) -> Result<Box<dyn PyramidController>> {
    bail!("pyrcl was built without the opencl feature")
}

fn run(cli: Cli) -> Result<()> {
    let (config, save_levels, list) = cli.into_config()?;
    if list {
        list_devices();
        return Ok(());
    }

    let source = load_source(&config)?;
    let mut controller = make_controller(&config)?;
    controller
        .init(&source)
        .with_context(|| format!("building the {} pyramid", config.layout))?;

    if config.verify {
        let err = verify_levels(&controller.read_levels()?, &source)?;
        log::info!("pyramid max error vs CPU reference: {err:.2e}");
    }
    if let Some(dir) = save_levels {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        for (i, level) in controller.read_levels()?.iter().enumerate() {
            level.save_normalized(&dir.join(format!("level_{i:02}.png")))?;
        }
    }

    let report = run_batch(
        controller.as_mut(),
        &config,
        source.width(),
        source.height(),
    );
    print!("{}", format_report(&report, config.format)?);
    if report.samples.is_empty() {
        bail!("every configuration failed");
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
