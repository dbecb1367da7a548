use anyhow::{Context, Result, bail};
use burn::prelude::*;
use clap::Parser;
use hpb_generator::{
    GeneratorConfig,
    benchmark::GeneratorBenchmark,
    device::{CpuBackend, GpuBackend, cpu_device, gpu_device},
    layers::InitKind,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "infer", about = "Build a generator and run timed forward passes on synthetic input")]
struct Args {
    /// Architecture preset (resnet_9blocks, unet_256, HPB, ...)
    #[arg(long, default_value = "HPB")]
    arch: String,

    /// JSON generator config; overrides --arch
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weight blob to load (.json or bincode)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Write the generator's weights here after building
    #[arg(long)]
    export: Option<PathBuf>,

    /// Base channel width
    #[arg(long)]
    base: Option<usize>,

    /// Weight initialization (normal, xavier, kaiming)
    #[arg(long)]
    init: Option<String>,

    /// Square input size
    #[arg(long, default_value_t = 256)]
    size: usize,

    #[arg(long, default_value_t = 1)]
    batch: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Timed forward passes
    #[arg(long, default_value_t = 3)]
    runs: usize,

    /// Run on the WGPU backend instead of the CPU
    #[arg(long, default_value_t = false)]
    gpu: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GeneratorConfig::load_json(path)?,
        None => GeneratorConfig::from_tag(&args.arch)?,
    };
    if let Some(base) = args.base {
        config = config.with_base_channels(base);
    }
    if let Some(init) = &args.init {
        config = config.with_init(InitKind::from_tag(init)?);
    }

    if args.gpu {
        run::<GpuBackend>(&args, &config, gpu_device())
    } else {
        run::<CpuBackend>(&args, &config, cpu_device())
    }
}

fn run<B: Backend>(args: &Args, config: &GeneratorConfig, device: B::Device) -> Result<()> {
    if args.size == 0 || args.batch == 0 {
        bail!("input size and batch must be positive");
    }

    let mut generator = config
        .init::<B>(&device)
        .with_context(|| format!("failed to build {} generator", config.architecture.name()))?;

    if let Some(path) = &args.weights {
        generator = generator
            .load_weights(path)
            .with_context(|| format!("failed to load weights from {}", path.display()))?;
    }
    if let Some(path) = &args.export {
        generator
            .save_weights(path)
            .with_context(|| format!("failed to export weights to {}", path.display()))?;
    }

    let shape = [args.batch, config.input_channels, args.size, args.size];
    let bench = GeneratorBenchmark::new(device, shape, args.seed);
    let result = bench
        .run(config.architecture.name(), &generator, args.runs)
        .context("forward pass failed")?;

    println!("{}", bench.generate_report(&[result]));
    Ok(())
}
