//! Shared layer construction: weight initialization, activations and the
//! builder every block uses to create its convolutions, norms and dropout.

use burn::{
    module::Param,
    nn::{
        Dropout, DropoutConfig, Initializer, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
    tensor::activation,
};

use crate::error::{self, GeneratorError};
use crate::norm::{NormKind, Normalization};

/// Weight initialization scheme for convolution kernels.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum InitKind {
    Normal,
    Xavier,
    Kaiming,
}

impl InitKind {
    pub fn from_tag(tag: &str) -> error::Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "xavier" => Ok(Self::Xavier),
            "kaiming" => Ok(Self::Kaiming),
            _ => Err(GeneratorError::UnknownInit(tag.to_string())),
        }
    }

    pub fn initializer(&self, gain: f64) -> Initializer {
        match self {
            Self::Normal => Initializer::Normal {
                mean: 0.0,
                std: gain,
            },
            Self::Xavier => Initializer::XavierNormal { gain },
            // fan-in kaiming with a = 0
            Self::Kaiming => Initializer::KaimingNormal {
                gain: 2.0f64.sqrt(),
                fan_out_only: false,
            },
        }
    }
}

#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    LeakyRelu,
    Gelu,
    Tanh,
}

impl ActivationKind {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Relu => activation::relu(x),
            Self::LeakyRelu => activation::leaky_relu(x, 0.2),
            Self::Gelu => activation::gelu(x),
            Self::Tanh => activation::tanh(x),
        }
    }
}

/// Geometry of a square convolution.
#[derive(Clone, Copy, Debug)]
pub struct ConvSpec {
    pub kernel: usize,
    pub stride: usize,
    pub padding: usize,
    pub groups: usize,
    pub bias: bool,
}

impl ConvSpec {
    pub fn new(kernel: usize) -> Self {
        Self {
            kernel,
            stride: 1,
            padding: 0,
            groups: 1,
            bias: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Creates layers with the init scheme, normalization and inference mode
/// fixed once for the whole graph.
pub struct LayerBuilder<'a, B: Backend> {
    device: &'a B::Device,
    init: InitKind,
    gain: f64,
    norm: NormKind,
    inference: bool,
}

impl<'a, B: Backend> LayerBuilder<'a, B> {
    pub fn new(device: &'a B::Device, init: InitKind, gain: f64, norm: NormKind, inference: bool) -> Self {
        Self {
            device,
            init,
            gain,
            norm,
            inference,
        }
    }

    pub fn device(&self) -> &B::Device {
        self.device
    }

    pub fn norm_kind(&self) -> NormKind {
        self.norm
    }

    /// Convolutions followed by the configured norm carry a bias only when
    /// that norm leaves it observable.
    pub fn norm_bias(&self) -> bool {
        self.norm.keeps_bias()
    }

    pub fn conv(&self, channels: [usize; 2], spec: ConvSpec) -> Conv2d<B> {
        let mut conv = Conv2dConfig::new(channels, [spec.kernel, spec.kernel])
            .with_stride([spec.stride, spec.stride])
            .with_padding(PaddingConfig2d::Explicit(spec.padding, spec.padding))
            .with_groups(spec.groups)
            .with_bias(spec.bias)
            .with_initializer(self.init.initializer(self.gain))
            .init(self.device);
        conv.bias = conv.bias.take().map(|bias| self.zeroed(bias));
        conv
    }

    pub fn conv_transpose(&self, channels: [usize; 2], spec: ConvSpec, padding_out: usize) -> ConvTranspose2d<B> {
        let mut conv = ConvTranspose2dConfig::new(channels, [spec.kernel, spec.kernel])
            .with_stride([spec.stride, spec.stride])
            .with_padding([spec.padding, spec.padding])
            .with_padding_out([padding_out, padding_out])
            .with_bias(spec.bias)
            .with_initializer(self.init.initializer(self.gain))
            .init(self.device);
        conv.bias = conv.bias.take().map(|bias| self.zeroed(bias));
        conv
    }

    /// The graph-wide normalization.
    pub fn norm(&self, channels: usize) -> Normalization<B> {
        self.norm.build(channels, self.gain, self.device)
    }

    /// Instance normalization regardless of the graph-wide choice.
    pub fn instance_norm(&self, channels: usize) -> Normalization<B> {
        NormKind::Instance.build(channels, self.gain, self.device)
    }

    /// `None` in inference mode or for a zero rate.
    pub fn dropout(&self, prob: f64) -> Option<Dropout> {
        if self.inference || prob <= 0.0 {
            None
        } else {
            Some(DropoutConfig::new(prob).init())
        }
    }

    fn zeroed(&self, bias: Param<Tensor<B, 1>>) -> Param<Tensor<B, 1>> {
        let zeros = Tensor::zeros_like(&bias.val());
        Param::initialized(bias.id, zeros)
    }
}

pub(crate) fn apply_dropout<B: Backend, const D: usize>(dropout: &Option<Dropout>, x: Tensor<B, D>) -> Tensor<B, D> {
    match dropout {
        Some(dropout) => dropout.forward(x),
        None => x,
    }
}
