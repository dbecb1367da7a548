use anyhow::Result;
use burn::module::Module;
use hpb_generator::{
    Architecture, GeneratorConfig,
    device::{CpuBackend, cpu_device},
};

/// Prints the module tree for a preset tag, or a parameter count per
/// family when no tag is given.
fn main() -> Result<()> {
    env_logger::init();
    let device = cpu_device();

    match std::env::args().nth(1) {
        Some(tag) => {
            let model = GeneratorConfig::from_tag(&tag)?.init::<CpuBackend>(&device)?;
            println!("{model}");
            println!("{tag}: {} parameters", model.num_params());
        }
        None => {
            for architecture in Architecture::all() {
                let model = GeneratorConfig::new()
                    .with_architecture(architecture)
                    .init::<CpuBackend>(&device)?;
                println!("{}: {} parameters", architecture.name(), model.num_params());
            }
        }
    }
    Ok(())
}
