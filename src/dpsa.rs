//! Dual-pruned self-attention.
//!
//! Queries attend from every spatial position, but keys and values are
//! first pruned to the `height_top_k` rows and `width_top_k` columns that
//! score best against a pooled query probe. Attention is cosine
//! similarity: queries and keys are L2-normalized and not rescaled.

use burn::{
    module::Param,
    nn::{Dropout, conv::Conv2d},
    prelude::*,
    tensor::activation::softmax,
};

use crate::error::{self, GeneratorError};
use crate::layers::{ConvSpec, LayerBuilder, apply_dropout};

const L2_EPSILON: f64 = 1e-12;

#[derive(Config, Debug)]
pub struct DpsaConfig {
    /// Input and output channels.
    pub dim: usize,
    #[config(default = 8)]
    pub heads: usize,
    #[config(default = 32)]
    pub dim_head: usize,
    #[config(default = 8)]
    pub height_top_k: usize,
    #[config(default = 8)]
    pub width_top_k: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl DpsaConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.height_top_k == 0 {
            return Err(GeneratorError::InvalidTopK {
                axis: "height",
                value: self.height_top_k,
            });
        }
        if self.width_top_k == 0 {
            return Err(GeneratorError::InvalidTopK {
                axis: "width",
                value: self.width_top_k,
            });
        }
        if self.dim == 0 || self.heads == 0 || self.dim_head == 0 {
            return Err(GeneratorError::InvalidConfig(format!(
                "attention needs positive widths, got dim {} heads {} dim_head {}",
                self.dim, self.heads, self.dim_head
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GeneratorError::InvalidConfig(format!(
                "attention dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, layers: &LayerBuilder<B>) -> error::Result<DualPrunedSelfAttention<B>> {
        self.validate()?;
        let inner = self.heads * self.dim_head;
        Ok(DualPrunedSelfAttention {
            norm: ChannelLayerNorm::new(self.dim, layers.device()),
            to_qkv: layers.conv([self.dim, inner * 3], ConvSpec::new(1).bias(false)),
            to_out: layers.conv([inner, self.dim], ConvSpec::new(1)),
            dropout: layers.dropout(self.dropout),
            dim: self.dim,
            heads: self.heads,
            dim_head: self.dim_head,
            height_top_k: self.height_top_k,
            width_top_k: self.width_top_k,
        })
    }
}

/// Layer norm across the channel axis of a feature map, computed
/// independently at every spatial position.
#[derive(Module, Debug)]
pub struct ChannelLayerNorm<B: Backend> {
    gain: Param<Tensor<B, 4>>,
    bias: Param<Tensor<B, 4>>,
    epsilon: f64,
}

impl<B: Backend> ChannelLayerNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gain: Param::from_tensor(Tensor::ones([1, channels, 1, 1], device)),
            bias: Param::from_tensor(Tensor::zeros([1, channels, 1, 1], device)),
            epsilon: 1e-5,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mean = x.clone().mean_dim(1);
        let centered = x - mean;
        let var = centered.clone().powf_scalar(2.0).mean_dim(1);
        centered / (var + self.epsilon).sqrt() * self.gain.val() + self.bias.val()
    }
}

/// Row and column indices kept by one pruning pass, per batch×head.
///
/// An axis that was not pruned has no index tensor.
#[derive(Clone, Debug)]
pub struct PrunedIndexSet<B: Backend> {
    /// [batch * heads, kept rows]
    pub rows: Option<Tensor<B, 2, Int>>,
    /// [batch * heads, kept columns]
    pub cols: Option<Tensor<B, 2, Int>>,
}

/// Keys and values that survived pruning, flattened to a sequence.
#[derive(Clone, Debug)]
pub struct PrunedCandidates<B: Backend> {
    /// [batch * heads, rows * cols, dim_head]
    pub keys: Tensor<B, 3>,
    /// [batch * heads, rows * cols, dim_head]
    pub values: Tensor<B, 3>,
    pub indices: PrunedIndexSet<B>,
    pub rows: usize,
    pub cols: usize,
}

impl<B: Backend> PrunedCandidates<B> {
    pub fn count(&self) -> usize {
        self.rows * self.cols
    }
}

/// Projected queries, keys and values, heads folded into the batch axis.
///
/// Each is `[batch * heads, height, width, dim_head]`; queries and keys
/// are unit length along the last axis.
#[derive(Clone, Debug)]
pub struct Projection<B: Backend> {
    pub queries: Tensor<B, 4>,
    pub keys: Tensor<B, 4>,
    pub values: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct DualPrunedSelfAttention<B: Backend> {
    norm: ChannelLayerNorm<B>,
    to_qkv: Conv2d<B>,
    to_out: Conv2d<B>,
    dropout: Option<Dropout>,
    dim: usize,
    heads: usize,
    dim_head: usize,
    height_top_k: usize,
    width_top_k: usize,
}

impl<B: Backend> DualPrunedSelfAttention<B> {
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn top_k(&self) -> (usize, usize) {
        (self.height_top_k, self.width_top_k)
    }

    /// Keys and values each query attends to on a `height x width` map.
    pub fn candidate_count(&self, height: usize, width: usize) -> usize {
        self.height_top_k.min(height) * self.width_top_k.min(width)
    }

    /// Pruned attention.
    ///
    /// # Shapes
    ///   - Input  [batch, dim, height, width]
    ///   - Output [batch, dim, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, height, width] = x.dims();
        let projection = self.project(x);
        let candidates = self.select_candidates(&projection);
        let out = self.attend(projection.queries, candidates.keys, candidates.values);
        self.to_out.forward(self.merge_heads(out, batch, height, width))
    }

    /// [`Self::forward`] with the input shape checked first.
    pub fn try_forward(&self, x: Tensor<B, 4>) -> error::Result<Tensor<B, 4>> {
        let shape = x.dims();
        let [_, channels, height, width] = shape;
        if height == 0 || width == 0 {
            return Err(GeneratorError::InvalidInput {
                shape,
                reason: "attention needs a non-empty spatial map".to_string(),
            });
        }
        if channels != self.dim {
            return Err(GeneratorError::InvalidInput {
                shape,
                reason: format!("attention expects {} channels", self.dim),
            });
        }
        Ok(self.forward(x))
    }

    /// Attention over every position, without pruning.
    pub fn forward_dense(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, height, width] = x.dims();
        let Projection { queries, keys, values } = self.project(x);
        let [bh, _, _, d] = keys.dims();
        let keys = keys.reshape([bh, height * width, d]);
        let values = values.reshape([bh, height * width, d]);
        let out = self.attend(queries, keys, values);
        self.to_out.forward(self.merge_heads(out, batch, height, width))
    }

    /// Normalize, project and split into heads.
    pub fn project(&self, x: Tensor<B, 4>) -> Projection<B> {
        let [batch, _, height, width] = x.dims();
        let inner = self.heads * self.dim_head;
        let qkv = self.to_qkv.forward(self.norm.forward(x));

        let fold = |t: Tensor<B, 4>| {
            t.reshape([batch * self.heads, self.dim_head, height, width])
                .permute([0, 2, 3, 1])
        };
        Projection {
            queries: l2_normalize(fold(qkv.clone().narrow(1, 0, inner))),
            keys: l2_normalize(fold(qkv.clone().narrow(1, inner, inner))),
            values: fold(qkv.narrow(1, 2 * inner, inner)),
        }
    }

    /// Prune keys and values to the best rows, then the best columns of
    /// those rows. An axis whose top-k covers it is left whole.
    pub fn select_candidates(&self, projection: &Projection<B>) -> PrunedCandidates<B> {
        let [bh, height, width, d] = projection.keys.dims();
        let prune_rows = self.height_top_k < height;
        let prune_cols = self.width_top_k < width;

        let mut keys = projection.keys.clone();
        let mut values = projection.values.clone();
        let mut indices = PrunedIndexSet { rows: None, cols: None };

        if prune_rows || prune_cols {
            let probe = projection
                .queries
                .clone()
                .sum_dim(1)
                .sum_dim(2)
                .reshape([bh, d, 1]);

            if prune_rows {
                let (k, v, rows) = keep_top(keys, values, probe.clone(), 1, self.height_top_k);
                keys = k;
                values = v;
                indices.rows = Some(rows);
            }
            if prune_cols {
                let (k, v, cols) = keep_top(keys, values, probe, 2, self.width_top_k);
                keys = k;
                values = v;
                indices.cols = Some(cols);
            }
        }

        let [_, rows, cols, _] = keys.dims();
        log::trace!("attention candidates {}x{} of {}x{}", rows, cols, height, width);
        PrunedCandidates {
            keys: keys.reshape([bh, rows * cols, d]),
            values: values.reshape([bh, rows * cols, d]),
            indices,
            rows,
            cols,
        }
    }

    /// queries [bh, h, w, d], keys and values [bh, n, d] -> [bh, h * w, d]
    fn attend(&self, queries: Tensor<B, 4>, keys: Tensor<B, 3>, values: Tensor<B, 3>) -> Tensor<B, 3> {
        let [bh, height, width, d] = queries.dims();
        let queries = queries.reshape([bh, height * width, d]);
        let attn = softmax(queries.matmul(keys.swap_dims(1, 2)), 2);
        apply_dropout(&self.dropout, attn).matmul(values)
    }

    fn merge_heads(&self, out: Tensor<B, 3>, batch: usize, height: usize, width: usize) -> Tensor<B, 4> {
        out.reshape([batch, self.heads, height, width, self.dim_head])
            .permute([0, 1, 4, 2, 3])
            .reshape([batch, self.heads * self.dim_head, height, width])
    }
}

fn l2_normalize<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(3).sqrt().clamp_min(L2_EPSILON);
    x / norm
}

/// Keep the `top` best slices of keys and values along `axis` (1 = rows,
/// 2 = columns), scoring each slice by its summed key against the probe.
fn keep_top<B: Backend>(
    keys: Tensor<B, 4>,
    values: Tensor<B, 4>,
    probe: Tensor<B, 3>,
    axis: usize,
    top: usize,
) -> (Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 2, Int>) {
    let dims = keys.dims();
    let [bh, _, _, d] = dims;
    let other = 3 - axis;
    let len = dims[axis];

    let slice_keys = keys.clone().sum_dim(other).reshape([bh, len, d]);
    let scores = slice_keys.matmul(probe).reshape([bh, len]);
    let (_, kept) = scores.topk_with_indices(top, 1);

    let mut index_shape = [bh, 1, 1, 1];
    index_shape[axis] = top;
    let index = kept
        .clone()
        .reshape(index_shape)
        .repeat_dim(other, dims[other])
        .repeat_dim(3, d);

    (keys.gather(axis, index.clone()), values.gather(axis, index), kept)
}
