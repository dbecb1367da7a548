//! Network factory and the assembled generator.

use std::path::Path;

use burn::{module::Ignored, prelude::*};

use crate::architectures::{Architecture, BodyBlock, SpatialTransform, UnetGenerator};
use crate::config::GeneratorConfig;
use crate::error::{GeneratorError, Result};
use crate::layers::{ActivationKind, LayerBuilder};
use crate::skeleton::EncoderDecoderSkeleton;
use crate::weights::{ParameterExporter, ParameterImporter, ParameterSet};

impl GeneratorConfig {
    /// Validate the configuration and build the selected network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>> {
        self.validate()?;
        let layers = LayerBuilder::new(device, self.init, self.init_gain, self.norm, self.inference);

        let network = match self.architecture {
            Architecture::Unet => Network::Unet(self.unet().init(&layers)?),
            Architecture::Resnet => {
                let block = self.residual_block();
                let body = (0..self.n_blocks)
                    .map(|_| BodyBlock::Residual(block.init(&layers)))
                    .collect();
                Network::Skeleton(EncoderDecoderSkeleton::new(
                    &self.plan(),
                    self.padding,
                    ActivationKind::Relu,
                    body,
                    &layers,
                )?)
            }
            Architecture::Hpb => {
                let block = self.hybrid_block();
                let body = (0..self.n_blocks)
                    .map(|_| block.init(&layers).map(BodyBlock::Hybrid))
                    .collect::<Result<Vec<_>>>()?;
                Network::Skeleton(EncoderDecoderSkeleton::new(
                    &self.plan(),
                    self.padding,
                    ActivationKind::Gelu,
                    body,
                    &layers,
                )?)
            }
        };

        let generator = Generator {
            network,
            architecture: Ignored(self.architecture),
        };
        log::info!(
            "built {} generator: {} parameters, norm {}, padding {}",
            self.architecture.name(),
            generator.num_params(),
            self.norm.tag(),
            self.padding.tag()
        );
        Ok(generator)
    }
}

#[derive(Module, Debug)]
pub enum Network<B: Backend> {
    Skeleton(EncoderDecoderSkeleton<B>),
    Unet(UnetGenerator<B>),
}

/// An image-to-image generator: `[batch, in, H, W]` to `[batch, out, H, W]`
/// with values in `[-1, 1]`.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    network: Network<B>,
    architecture: Ignored<Architecture>,
}

impl<B: Backend> Generator<B> {
    pub fn architecture(&self) -> Architecture {
        *self.architecture
    }

    pub fn network(&self) -> &Network<B> {
        &self.network
    }

    pub fn input_channels(&self) -> usize {
        match &self.network {
            Network::Skeleton(skeleton) => skeleton.input_channels(),
            Network::Unet(unet) => unet.input_channels(),
        }
    }

    /// Height and width must be multiples of this.
    pub fn required_multiple(&self) -> usize {
        match &self.network {
            Network::Skeleton(skeleton) => 1 << skeleton.stages(),
            Network::Unet(unet) => unet.required_multiple(),
        }
    }

    /// Reject inputs the network cannot map back to their own size.
    pub fn check_input(&self, shape: [usize; 4]) -> Result<()> {
        let [_, channels, height, width] = shape;
        let invalid = |reason: String| GeneratorError::InvalidInput { shape, reason };

        if height == 0 || width == 0 {
            return Err(invalid("height and width must be non-zero".to_string()));
        }
        if channels != self.input_channels() {
            return Err(invalid(format!("expected {} input channels", self.input_channels())));
        }
        let multiple = self.required_multiple();
        if height % multiple != 0 || width % multiple != 0 {
            return Err(invalid(format!("height and width must be multiples of {multiple}")));
        }

        if let Network::Skeleton(skeleton) = &self.network {
            skeleton.padding().check(height, width).map_err(invalid)?;
            let scale = 1 << skeleton.stages();
            for block in skeleton.body() {
                if let BodyBlock::Residual(block) = block {
                    block.padding().check(height / scale, width / scale).map_err(invalid)?;
                }
            }
        }
        Ok(())
    }

    /// # Shapes
    ///   - Input  [batch, input_channels, height, width]
    ///   - Output [batch, output_channels, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        self.check_input(x.dims())?;
        let out = match &self.network {
            Network::Skeleton(skeleton) => skeleton.forward(x),
            Network::Unet(unet) => unet.forward(x),
        };
        Ok(out)
    }

    /// The bottleneck feature map the body blocks run on.
    pub fn encode(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        self.check_input(x.dims())?;
        match &self.network {
            Network::Skeleton(skeleton) => Ok(skeleton.encode(x)),
            Network::Unet(_) => Err(GeneratorError::InvalidConfig(
                "U-Net generators have no separate encoder".to_string(),
            )),
        }
    }

    /// Names of the repeated body blocks, empty for U-Net.
    pub fn body_names(&self) -> Vec<&'static str> {
        match &self.network {
            Network::Skeleton(skeleton) => skeleton.body().iter().map(|block| block.name()).collect(),
            Network::Unet(_) => Vec::new(),
        }
    }

    /// Every learned tensor and running statistic under its dotted path
    /// inside the network (`stem.weight`, `body.0.attn.to_qkv.weight`).
    pub fn parameter_set(&self) -> Result<ParameterSet> {
        let mut exporter = ParameterExporter::new();
        self.network.visit(&mut exporter);
        exporter.finish()
    }

    /// Replace every parameter with the entry of the same name.
    ///
    /// A missing entry, a shape mismatch or an entry naming no parameter
    /// fails the whole load.
    pub fn load_parameters(mut self, params: &ParameterSet) -> Result<Self> {
        let mut importer = ParameterImporter::new(params);
        self.network = self.network.map(&mut importer);
        importer.finish()?;
        log::info!("loaded {} parameter tensors", params.len());
        Ok(self)
    }

    pub fn load_weights<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        let params = ParameterSet::load(path)?;
        self.load_parameters(&params)
    }

    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.parameter_set()?.save(path)
    }
}
