use burn::{
    module::Ignored,
    nn::{Dropout, conv::Conv2d},
    prelude::*,
    tensor::activation::relu,
};

use super::SpatialTransform;
use crate::layers::{ConvSpec, LayerBuilder, apply_dropout};
use crate::norm::Normalization;
use crate::padding::{Pad2d, PaddingMode};

#[derive(Config, Debug)]
pub struct ResidualConvBlockConfig {
    pub channels: usize,
    #[config(default = "PaddingMode::Reflect")]
    pub padding: PaddingMode,
    #[config(default = false)]
    pub use_dropout: bool,
}

impl ResidualConvBlockConfig {
    pub fn init<B: Backend>(&self, layers: &LayerBuilder<B>) -> ResidualConvBlock<B> {
        let spec = ConvSpec::new(3).bias(layers.norm_bias());
        let channels = [self.channels, self.channels];
        ResidualConvBlock {
            pad: Ignored(Pad2d::new(self.padding, 1)),
            conv1: layers.conv(channels, spec),
            norm1: layers.norm(self.channels),
            dropout: if self.use_dropout { layers.dropout(0.5) } else { None },
            conv2: layers.conv(channels, spec),
            norm2: layers.norm(self.channels),
        }
    }
}

/// `x + norm(conv(pad(dropout(relu(norm(conv(pad(x))))))))`
#[derive(Module, Debug)]
pub struct ResidualConvBlock<B: Backend> {
    pad: Ignored<Pad2d>,
    conv1: Conv2d<B>,
    norm1: Normalization<B>,
    dropout: Option<Dropout>,
    conv2: Conv2d<B>,
    norm2: Normalization<B>,
}

impl<B: Backend> ResidualConvBlock<B> {
    pub fn padding(&self) -> &Pad2d {
        &self.pad
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = self.norm1.forward(self.conv1.forward(self.pad.forward(x.clone())));
        let h = apply_dropout(&self.dropout, relu(h));
        let h = self.norm2.forward(self.conv2.forward(self.pad.forward(h)));
        x + h
    }
}

impl<B: Backend> SpatialTransform<B> for ResidualConvBlock<B> {
    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn name(&self) -> &'static str {
        "residual-conv"
    }
}

