//! Encoder/decoder skeleton shared by the ResNet and HPB generators:
//! a 7×7 stem, strided downsampling, a stack of body blocks at the
//! bottleneck, mirrored transposed-conv upsampling and a tanh head.

use burn::{
    module::Ignored,
    nn::conv::{Conv2d, ConvTranspose2d},
    prelude::*,
};

use crate::architectures::{BodyBlock, SpatialTransform};
use crate::error::{GeneratorError, Result};
use crate::layers::{ActivationKind, ConvSpec, LayerBuilder};
use crate::norm::Normalization;
use crate::padding::{Pad2d, PaddingMode};

const EDGE_KERNEL: usize = 7;

/// Channel widths of every resampling stage, as `[in, out]` pairs.
///
/// The upsampling list must mirror the downsampling list: same length,
/// and up stage `i` undoes down stage `n - 1 - i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkeletonPlan {
    pub input_channels: usize,
    pub output_channels: usize,
    pub base_channels: usize,
    pub down: Vec<[usize; 2]>,
    pub up: Vec<[usize; 2]>,
}

impl SkeletonPlan {
    /// Width doubles on every downsampling stage and halves on the way up.
    pub fn symmetric(input_channels: usize, output_channels: usize, base_channels: usize, stages: usize) -> Self {
        let down: Vec<[usize; 2]> = (0..stages)
            .map(|i| [base_channels << i, base_channels << (i + 1)])
            .collect();
        let up = down.iter().rev().map(|[from, to]| [*to, *from]).collect();
        Self {
            input_channels,
            output_channels,
            base_channels,
            down,
            up,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.down.len() != self.up.len() {
            return Err(GeneratorError::AsymmetricStages {
                down: self.down.len(),
                up: self.up.len(),
            });
        }
        let mut width = self.base_channels;
        for [from, to] in &self.down {
            if *from != width {
                return Err(GeneratorError::InvalidConfig(format!(
                    "downsample stage expects {from} channels but receives {width}"
                )));
            }
            width = *to;
        }
        for (up, [from, to]) in self.up.iter().zip(self.down.iter().rev()) {
            if *up != [*to, *from] {
                return Err(GeneratorError::InvalidConfig(format!(
                    "upsample stage {up:?} does not mirror downsample stage {:?}",
                    [from, to]
                )));
            }
        }
        Ok(())
    }

    /// Channel width seen by the body blocks.
    pub fn bottleneck_channels(&self) -> usize {
        self.down.last().map_or(self.base_channels, |[_, to]| *to)
    }

    pub fn stages(&self) -> usize {
        self.down.len()
    }
}

#[derive(Module, Debug)]
pub struct DownStage<B: Backend> {
    conv: Conv2d<B>,
    norm: Normalization<B>,
}

#[derive(Module, Debug)]
pub struct UpStage<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: Normalization<B>,
}

#[derive(Module, Debug)]
pub struct EncoderDecoderSkeleton<B: Backend> {
    pad: Ignored<Pad2d>,
    stem: Conv2d<B>,
    stem_norm: Normalization<B>,
    down: Vec<DownStage<B>>,
    body: Vec<BodyBlock<B>>,
    up: Vec<UpStage<B>>,
    head: Conv2d<B>,
    activation: Ignored<ActivationKind>,
    input_channels: usize,
}

impl<B: Backend> EncoderDecoderSkeleton<B> {
    /// Wrap `body` in the stages described by `plan`.
    pub fn new(
        plan: &SkeletonPlan,
        padding: PaddingMode,
        activation: ActivationKind,
        body: Vec<BodyBlock<B>>,
        layers: &LayerBuilder<B>,
    ) -> Result<Self> {
        plan.check()?;
        let bias = layers.norm_bias();

        let down = plan
            .down
            .iter()
            .map(|&[from, to]| DownStage {
                conv: layers.conv([from, to], ConvSpec::new(3).stride(2).padding(1).bias(bias)),
                norm: layers.norm(to),
            })
            .collect();
        let up = plan
            .up
            .iter()
            .map(|&[from, to]| UpStage {
                conv: layers.conv_transpose([from, to], ConvSpec::new(3).stride(2).padding(1).bias(bias), 1),
                norm: layers.norm(to),
            })
            .collect();

        Ok(Self {
            pad: Ignored(Pad2d::new(padding, EDGE_KERNEL / 2)),
            stem: layers.conv([plan.input_channels, plan.base_channels], ConvSpec::new(EDGE_KERNEL).bias(bias)),
            stem_norm: layers.norm(plan.base_channels),
            down,
            body,
            up,
            head: layers.conv([plan.base_channels, plan.output_channels], ConvSpec::new(EDGE_KERNEL)),
            activation: Ignored(activation),
            input_channels: plan.input_channels,
        })
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn padding(&self) -> &Pad2d {
        &self.pad
    }

    pub fn stages(&self) -> usize {
        self.down.len()
    }

    pub fn body(&self) -> &[BodyBlock<B>] {
        &self.body
    }

    /// Stem and downsampling.
    ///
    /// # Shapes
    ///   - Input  [batch, input_channels, height, width]
    ///   - Output [batch, base * 2^stages, height / 2^stages, width / 2^stages]
    pub fn encode(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let act = *self.activation;
        let mut h = act.apply(self.stem_norm.forward(self.stem.forward(self.pad.forward(x))));
        for stage in &self.down {
            h = act.apply(stage.norm.forward(stage.conv.forward(h)));
        }
        log::debug!("bottleneck {:?}", h.dims());
        h
    }

    /// Upsampling and the tanh head.
    pub fn decode(&self, h: Tensor<B, 4>) -> Tensor<B, 4> {
        let act = *self.activation;
        let mut h = h;
        for stage in &self.up {
            h = act.apply(stage.norm.forward(stage.conv.forward(h)));
        }
        ActivationKind::Tanh.apply(self.head.forward(self.pad.forward(h)))
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = self
            .body
            .iter()
            .fold(self.encode(x), |h, block| block.transform(h));
        self.decode(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_plan_mirrors_widths() {
        let plan = SkeletonPlan::symmetric(3, 3, 64, 2);
        assert_eq!(plan.down, vec![[64, 128], [128, 256]]);
        assert_eq!(plan.up, vec![[256, 128], [128, 64]]);
        assert_eq!(plan.bottleneck_channels(), 256);
        assert!(plan.check().is_ok());
    }

    #[test]
    fn unequal_stage_counts_are_rejected() {
        let mut plan = SkeletonPlan::symmetric(3, 3, 8, 2);
        plan.up.pop();
        assert!(matches!(
            plan.check(),
            Err(GeneratorError::AsymmetricStages { down: 2, up: 1 })
        ));
    }

    #[test]
    fn unmirrored_widths_are_rejected() {
        let mut plan = SkeletonPlan::symmetric(3, 3, 8, 2);
        plan.up[0] = [32, 12];
        assert!(matches!(plan.check(), Err(GeneratorError::InvalidConfig(_))));
    }
}
