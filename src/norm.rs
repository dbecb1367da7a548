use burn::{
    module::Param,
    nn::{BatchNorm, BatchNormConfig, InstanceNorm, InstanceNormConfig},
    prelude::*,
    tensor::Distribution,
};

use crate::error::{self, GeneratorError};

/// Per-channel statistic strategy, resolved once when the graph is built.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum NormKind {
    /// Population statistics tracked across the batch axis.
    Batch,
    /// Per-sample, per-channel statistics; no affine terms, no running stats.
    Instance,
    Identity,
}

impl NormKind {
    /// Resolve a normalization tag (`batch`, `instance`, `none`).
    pub fn from_tag(tag: &str) -> error::Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "instance" => Ok(Self::Instance),
            "none" => Ok(Self::Identity),
            _ => Err(GeneratorError::UnknownNorm(tag.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Instance => "instance",
            Self::Identity => "none",
        }
    }

    /// Batch norm absorbs a preceding conv bias through its own shift.
    pub fn keeps_bias(&self) -> bool {
        !matches!(self, Self::Batch)
    }

    pub fn build<B: Backend>(&self, channels: usize, gain: f64, device: &B::Device) -> Normalization<B> {
        let layer = match self {
            Self::Batch => {
                let mut norm = BatchNormConfig::new(channels).init(device);
                let gamma = Tensor::random([channels], Distribution::Normal(1.0, gain), device);
                norm.gamma = Param::initialized(norm.gamma.id, gamma);
                Some(NormLayer::Batch(norm))
            }
            Self::Instance => Some(NormLayer::Instance(
                InstanceNormConfig::new(channels).with_affine(false).init(device),
            )),
            Self::Identity => None,
        };
        Normalization { layer }
    }
}

#[derive(Module, Debug)]
pub enum NormLayer<B: Backend> {
    Batch(BatchNorm<B>),
    Instance(InstanceNorm<B>),
}

/// A normalization step; identity when no layer is present.
#[derive(Module, Debug)]
pub struct Normalization<B: Backend> {
    layer: Option<NormLayer<B>>,
}

impl<B: Backend> Normalization<B> {
    pub fn kind(&self) -> NormKind {
        match &self.layer {
            Some(NormLayer::Batch(_)) => NormKind::Batch,
            Some(NormLayer::Instance(_)) => NormKind::Instance,
            None => NormKind::Identity,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match &self.layer {
            Some(NormLayer::Batch(norm)) => norm.forward(x),
            Some(NormLayer::Instance(norm)) => norm.forward(x),
            None => x,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn instance_norm_is_per_sample_and_channel() {
        let device = Default::default();
        let norm = NormKind::Instance.build::<TestBackend>(2, 0.02, &device);
        let x = Tensor::<TestBackend, 4>::random([3, 2, 4, 4], Distribution::Normal(5.0, 3.0), &device);
        let out = norm.forward(x);

        let mean = out.clone().mean_dim(3).mean_dim(2);
        let max_mean: f32 = mean.abs().max().into_scalar();
        assert!(max_mean < 1e-4, "per-channel mean should vanish, got {max_mean}");
    }

    #[test]
    fn instance_norm_ignores_batch_composition() {
        let device = Default::default();
        let norm = NormKind::Instance.build::<TestBackend>(3, 0.02, &device);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 5, 5], Distribution::Normal(0.0, 1.0), &device);

        let together = norm.forward(x.clone()).narrow(0, 0, 1);
        let alone = norm.forward(x.narrow(0, 0, 1));
        let diff: f32 = (together - alone).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn fresh_batch_norm_uses_population_statistics() {
        let device = Default::default();
        let norm = NormKind::Batch.build::<TestBackend>(2, 0.0, &device);
        let x = Tensor::<TestBackend, 4>::random([2, 2, 3, 3], Distribution::Normal(0.0, 1.0), &device);

        // running mean 0, running var 1, gain 1, shift 0
        let out = norm.forward(x.clone());
        let diff: f32 = (out - x / (1.0f32 + 1e-5).sqrt()).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn identity_passes_through() {
        let device = Default::default();
        let norm = NormKind::from_tag("none").unwrap().build::<TestBackend>(4, 0.02, &device);
        assert_eq!(norm.kind(), NormKind::Identity);
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 2, 2], &device);
        let total: f32 = norm.forward(x).sum().into_scalar();
        assert_eq!(total, 16.0);
    }

    #[test]
    fn unknown_norm_tag_is_an_error() {
        assert!(matches!(NormKind::from_tag("group"), Err(GeneratorError::UnknownNorm(_))));
    }
}
