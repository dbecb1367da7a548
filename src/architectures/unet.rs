//! U-Net generator: nested skip levels, each halving the resolution on
//! the way down and concatenating its input onto its output on the way up.
//!
//! The nesting is held as a flat list ordered outermost first. Levels are
//! built from the innermost outwards, then traversed down and back up.

use burn::{
    module::Ignored,
    nn::{
        Dropout,
        conv::{Conv2d, ConvTranspose2d},
    },
    prelude::*,
    tensor::activation::{leaky_relu, relu, tanh},
};

use crate::error::{self, GeneratorError};
use crate::layers::{ConvSpec, LayerBuilder, apply_dropout};
use crate::norm::{NormKind, Normalization};

pub const MAX_DEPTH: usize = 10;
const MIN_DEPTH: usize = 2;
/// Levels from this index on run at full width and may drop out.
const FIRST_WIDE_LEVEL: usize = 4;

#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum UnetRole {
    Outermost,
    Middle,
    Innermost,
}

#[derive(Config, Debug)]
pub struct UnetGeneratorConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    #[config(default = 64)]
    pub base_channels: usize,
    /// Number of downsampling levels, innermost and outermost included.
    #[config(default = 8)]
    pub depth: usize,
    #[config(default = false)]
    pub use_dropout: bool,
}

impl UnetGeneratorConfig {
    pub fn validate(&self) -> error::Result<()> {
        if !(MIN_DEPTH..=MAX_DEPTH).contains(&self.depth) {
            return Err(GeneratorError::InvalidConfig(format!(
                "U-Net depth must lie in {MIN_DEPTH}..={MAX_DEPTH}, got {}",
                self.depth
            )));
        }
        Ok(())
    }

    /// Channels produced by the down path of level `index`; widths stop
    /// doubling at `base * 8`.
    pub fn inner_channels(&self, index: usize) -> usize {
        self.base_channels * (1 << index.min(3))
    }

    /// Channels produced by the up path of level `index`.
    pub fn outer_channels(&self, index: usize) -> usize {
        if index == 0 {
            self.output_channels
        } else {
            self.inner_channels(index - 1)
        }
    }

    fn role(&self, index: usize) -> UnetRole {
        if index == 0 {
            UnetRole::Outermost
        } else if index + 1 == self.depth {
            UnetRole::Innermost
        } else {
            UnetRole::Middle
        }
    }

    pub fn init<B: Backend>(&self, layers: &LayerBuilder<B>) -> error::Result<UnetGenerator<B>> {
        self.validate()?;

        let mut levels: Vec<UnetLevel<B>> = (0..self.depth).rev().map(|index| self.level(index, layers)).collect();
        levels.reverse();

        log::debug!("built U-Net with {} levels", levels.len());
        Ok(UnetGenerator {
            levels,
            input_channels: self.input_channels,
        })
    }

    fn level<B: Backend>(&self, index: usize, layers: &LayerBuilder<B>) -> UnetLevel<B> {
        let role = self.role(index);
        let inner = self.inner_channels(index);
        let outer = self.outer_channels(index);
        let input = if index == 0 { self.input_channels } else { outer };
        let up_input = if role == UnetRole::Innermost { inner } else { inner * 2 };

        let spec = ConvSpec::new(4).stride(2).padding(1).bias(layers.norm_bias());
        let identity = || NormKind::Identity.build::<B>(0, 0.0, layers.device());

        UnetLevel {
            role: Ignored(role),
            down_conv: layers.conv([input, inner], spec),
            down_norm: match role {
                UnetRole::Middle => layers.norm(inner),
                _ => identity(),
            },
            up_conv: layers.conv_transpose([up_input, outer], spec.bias(spec.bias || role == UnetRole::Outermost), 0),
            up_norm: match role {
                UnetRole::Outermost => identity(),
                _ => layers.norm(outer),
            },
            dropout: if self.use_dropout && role == UnetRole::Middle && index >= FIRST_WIDE_LEVEL {
                layers.dropout(0.5)
            } else {
                None
            },
        }
    }
}

/// One skip level: `down_conv` halves the map, `up_conv` restores it.
#[derive(Module, Debug)]
pub struct UnetLevel<B: Backend> {
    role: Ignored<UnetRole>,
    down_conv: Conv2d<B>,
    down_norm: Normalization<B>,
    up_conv: ConvTranspose2d<B>,
    up_norm: Normalization<B>,
    dropout: Option<Dropout>,
}

impl<B: Backend> UnetLevel<B> {
    pub fn role(&self) -> UnetRole {
        *self.role
    }

    fn down(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match self.role() {
            UnetRole::Outermost => x,
            _ => leaky_relu(x, 0.2),
        };
        self.down_norm.forward(self.down_conv.forward(x))
    }

    fn up(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = self.up_conv.forward(relu(x));
        match self.role() {
            UnetRole::Outermost => tanh(h),
            _ => apply_dropout(&self.dropout, self.up_norm.forward(h)),
        }
    }
}

#[derive(Module, Debug)]
pub struct UnetGenerator<B: Backend> {
    /// Outermost first.
    levels: Vec<UnetLevel<B>>,
    input_channels: usize,
}

impl<B: Backend> UnetGenerator<B> {
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[UnetLevel<B>] {
        &self.levels
    }

    pub fn innermost_count(&self) -> usize {
        self.levels.iter().filter(|level| level.role() == UnetRole::Innermost).count()
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Height and width must be multiples of this.
    pub fn required_multiple(&self) -> usize {
        1 << self.depth()
    }

    /// # Shapes
    ///   - Input  [batch, input_channels, height, width]
    ///   - Output [batch, output_channels, height, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.levels.len());
        let mut h = x;
        for level in &self.levels {
            skips.push(h.clone());
            h = level.down(h);
        }

        for (level, skip) in self.levels.iter().zip(skips).rev() {
            h = level.up(h);
            if level.role() != UnetRole::Outermost {
                h = Tensor::cat(vec![skip, h], 1);
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_plan_caps_at_eight_times_base() {
        let config = UnetGeneratorConfig::new(3, 3).with_base_channels(4).with_depth(7);
        let inner: Vec<usize> = (0..7).map(|i| config.inner_channels(i)).collect();
        assert_eq!(inner, vec![4, 8, 16, 32, 32, 32, 32]);
        assert_eq!(config.outer_channels(0), 3);
        assert_eq!(config.outer_channels(3), 16);
    }

    #[test]
    fn depth_is_bounded() {
        assert!(UnetGeneratorConfig::new(3, 3).with_depth(1).validate().is_err());
        assert!(UnetGeneratorConfig::new(3, 3).with_depth(11).validate().is_err());
        assert!(UnetGeneratorConfig::new(3, 3).with_depth(10).validate().is_ok());
    }

    #[test]
    fn roles_follow_position() {
        let config = UnetGeneratorConfig::new(3, 3).with_depth(3);
        assert_eq!(config.role(0), UnetRole::Outermost);
        assert_eq!(config.role(1), UnetRole::Middle);
        assert_eq!(config.role(2), UnetRole::Innermost);
    }
}
