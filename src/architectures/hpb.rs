//! Hybrid perception block: a depthwise-conv branch and a dual-pruned
//! attention branch run side by side, merged, then passed through a
//! convolutional feed-forward.

use burn::{
    nn::{Dropout, conv::Conv2d},
    prelude::*,
    tensor::activation::gelu,
};

use super::SpatialTransform;
use crate::dpsa::{DpsaConfig, DualPrunedSelfAttention};
use crate::error;
use crate::layers::{ConvSpec, LayerBuilder, apply_dropout};
use crate::norm::Normalization;

#[derive(Config, Debug)]
pub struct HybridPerceptionBlockConfig {
    pub dim: usize,
    #[config(default = 32)]
    pub dim_head: usize,
    #[config(default = 8)]
    pub heads: usize,
    #[config(default = 4)]
    pub ff_mult: usize,
    #[config(default = 8)]
    pub height_top_k: usize,
    #[config(default = 8)]
    pub width_top_k: usize,
    #[config(default = 0.0)]
    pub attn_dropout: f64,
    #[config(default = 0.0)]
    pub ff_dropout: f64,
}

impl HybridPerceptionBlockConfig {
    pub fn init<B: Backend>(&self, layers: &LayerBuilder<B>) -> error::Result<HybridPerceptionBlock<B>> {
        let attn = DpsaConfig::new(self.dim)
            .with_heads(self.heads)
            .with_dim_head(self.dim_head)
            .with_height_top_k(self.height_top_k)
            .with_width_top_k(self.width_top_k)
            .with_dropout(self.attn_dropout)
            .init(layers)?;

        let depthwise = ConvSpec::new(3).padding(1).groups(self.dim);
        Ok(HybridPerceptionBlock {
            attn,
            dwconv: layers.conv([self.dim, self.dim], depthwise),
            combine: layers.conv([self.dim * 2, self.dim], ConvSpec::new(1)),
            ff: FeedForward::new(self.dim, self.dim * self.ff_mult, self.ff_dropout, layers),
        })
    }
}

#[derive(Module, Debug)]
pub struct HybridPerceptionBlock<B: Backend> {
    attn: DualPrunedSelfAttention<B>,
    dwconv: Conv2d<B>,
    combine: Conv2d<B>,
    ff: FeedForward<B>,
}

impl<B: Backend> HybridPerceptionBlock<B> {
    pub fn attention(&self) -> &DualPrunedSelfAttention<B> {
        &self.attn
    }

    /// # Shapes
    ///   - Input  [batch, dim, height, width]
    ///   - Output [batch, dim, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let branches = Tensor::cat(vec![self.attn.forward(x.clone()), self.dwconv.forward(x.clone())], 1);
        let merged = self.combine.forward(branches) + x;
        // no residual around the feed-forward
        self.ff.forward(merged)
    }
}

impl<B: Backend> SpatialTransform<B> for HybridPerceptionBlock<B> {
    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(x)
    }

    fn name(&self) -> &'static str {
        "hybrid-perception"
    }
}

/// Pointwise expansion, a residual depthwise stage, pointwise projection.
/// Every norm here is instance norm whatever the graph-wide choice.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    expand: Conv2d<B>,
    expand_norm: Normalization<B>,
    depthwise: Conv2d<B>,
    depthwise_norm: Normalization<B>,
    project: Conv2d<B>,
    project_norm: Normalization<B>,
    dropout: Option<Dropout>,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(dim: usize, hidden: usize, dropout: f64, layers: &LayerBuilder<B>) -> Self {
        Self {
            expand: layers.conv([dim, hidden], ConvSpec::new(1)),
            expand_norm: layers.instance_norm(hidden),
            depthwise: layers.conv([hidden, hidden], ConvSpec::new(3).padding(1).groups(hidden)),
            depthwise_norm: layers.instance_norm(hidden),
            project: layers.conv([hidden, dim], ConvSpec::new(1)),
            project_norm: layers.instance_norm(dim),
            dropout: layers.dropout(dropout),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = gelu(self.expand_norm.forward(self.expand.forward(x)));
        let h = apply_dropout(&self.dropout, h);

        let inner = gelu(self.depthwise_norm.forward(self.depthwise.forward(h.clone())));
        let h = apply_dropout(&self.dropout, inner) + h;

        self.project_norm.forward(self.project.forward(h))
    }
}

