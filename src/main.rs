use anyhow::Result;
use hpb_generator::{
    GeneratorConfig,
    benchmark::GeneratorBenchmark,
    device::{CpuBackend, cpu_device},
};

/// Builds every preset at a small width and pushes one image through it.
fn main() -> Result<()> {
    env_logger::init();
    let device = cpu_device();

    let configs = GeneratorConfig::preset_tags()
        .iter()
        .map(|tag| {
            let config = GeneratorConfig::from_tag(tag)?
                .with_base_channels(8)
                .with_n_blocks(2)
                .with_attn_heads(2)
                .with_attn_dim_head(Some(8));
            Ok((tag.to_string(), config))
        })
        .collect::<Result<Vec<_>>>()?;

    // 256 is divisible by every preset's required multiple
    let bench = GeneratorBenchmark::<CpuBackend>::new(device, [1, 3, 256, 256], 7);
    let results = bench.compare(&configs, 1)?;

    println!("{}", bench.generate_report(&results));
    Ok(())
}
