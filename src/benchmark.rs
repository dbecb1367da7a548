//! Generator Benchmark
//!
//! Runs timed forward passes of one or more generator configurations on the
//! same seeded synthetic input and reports timing, size and output range.

use burn::{prelude::*, tensor::ElementConversion};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Instant;

use crate::config::GeneratorConfig;
use crate::error::Result;
use crate::generator::Generator;

/// Uniform values in `[-1, 1]`, reproducible from `seed`.
pub fn synthetic_input<B: Backend>(shape: [usize; 4], seed: u64, device: &B::Device) -> Tensor<B, 4> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len: usize = shape.iter().product();
    let values: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0f32..=1.0)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Benchmark results for a single generator
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub architecture: String,
    pub input_shape: [usize; 4],
    pub output_shape: [usize; 4],
    pub forward_time_ms: f64,
    pub memory_mb: f64,
    pub param_count: usize,
    pub output_min: f32,
    pub output_max: f32,
    pub runs: usize,
}

impl BenchmarkResult {
    pub fn in_range(&self) -> bool {
        self.output_min >= -1.0 && self.output_max <= 1.0
    }
}

pub struct GeneratorBenchmark<B: Backend> {
    device: B::Device,
    input: Tensor<B, 4>,
}

impl<B: Backend> GeneratorBenchmark<B> {
    pub fn new(device: B::Device, shape: [usize; 4], seed: u64) -> Self {
        let input = synthetic_input(shape, seed, &device);
        Self { device, input }
    }

    pub fn input(&self) -> &Tensor<B, 4> {
        &self.input
    }

    /// Time `runs` forward passes; the first pass is not counted.
    pub fn run(&self, name: &str, generator: &Generator<B>, runs: usize) -> Result<BenchmarkResult> {
        let runs = runs.max(1);
        let mut output = generator.forward(self.input.clone())?;

        let start = Instant::now();
        for _ in 0..runs {
            output = generator.forward(self.input.clone())?;
            // reading a scalar back waits for the device
            let _ = output.clone().sum().into_scalar();
        }
        let forward_time_ms = start.elapsed().as_secs_f64() * 1000.0 / runs as f64;

        let param_count = generator.num_params();
        let result = BenchmarkResult {
            architecture: name.to_string(),
            input_shape: self.input.dims(),
            output_shape: output.dims(),
            forward_time_ms,
            memory_mb: (param_count * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0),
            param_count,
            output_min: output.clone().min().into_scalar().elem::<f32>(),
            output_max: output.max().into_scalar().elem::<f32>(),
            runs,
        };
        log::info!("{name}: {:.2} ms per forward", result.forward_time_ms);
        Ok(result)
    }

    /// Build and time every configuration.
    pub fn compare(&self, configs: &[(String, GeneratorConfig)], runs: usize) -> Result<Vec<BenchmarkResult>> {
        configs
            .iter()
            .map(|(name, config)| {
                let generator = config.init::<B>(&self.device)?;
                self.run(name, &generator, runs)
            })
            .collect()
    }

    /// Generate comparison report
    pub fn generate_report(&self, results: &[BenchmarkResult]) -> String {
        let mut report = String::new();
        report.push_str("Generator Benchmark Report\n");
        report.push_str("==========================\n\n");

        for result in results {
            report.push_str(&format!(
                "Architecture: {}\n\
                 Input: {:?} -> Output: {:?}\n\
                 Forward Time: {:.2} ms ({} runs)\n\
                 Parameters: {} ({:.2} MB)\n\
                 Output Range: [{:.4}, {:.4}] {}\n\n",
                result.architecture,
                result.input_shape,
                result.output_shape,
                result.forward_time_ms,
                result.runs,
                result.param_count,
                result.memory_mb,
                result.output_min,
                result.output_max,
                if result.in_range() { "ok" } else { "OUT OF RANGE" },
            ));
        }

        report
    }
}
