//! Generator families and the body blocks they are built from.
//!
//! The ResNet and HPB families share one encoder/decoder skeleton and
//! differ only in the block repeated at the bottleneck; the U-Net family
//! is its own graph of nested skip levels.

use burn::prelude::*;

use crate::error::{self, GeneratorError};

pub mod hpb;
pub mod resnet;
pub mod unet;

pub use hpb::{HybridPerceptionBlock, HybridPerceptionBlockConfig};
pub use resnet::{ResidualConvBlock, ResidualConvBlockConfig};
pub use unet::{UnetGenerator, UnetGeneratorConfig, UnetLevel, UnetRole};

/// A shape-preserving map over feature maps, implemented by every body
/// block the skeleton can repeat at its bottleneck.
pub trait SpatialTransform<B: Backend> {
    /// # Shapes
    ///   - Input  [batch, channels, height, width]
    ///   - Output [batch, channels, height, width]
    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Block name for logging.
    fn name(&self) -> &'static str;
}

/// Generator family.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum Architecture {
    Resnet,
    Unet,
    Hpb,
}

impl Architecture {
    pub fn all() -> Vec<Self> {
        vec![Self::Resnet, Self::Unet, Self::Hpb]
    }

    /// Resolve a bare family tag (`resnet`, `unet`, `hpb`).
    pub fn from_tag(tag: &str) -> error::Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "resnet" => Ok(Self::Resnet),
            "unet" => Ok(Self::Unet),
            "hpb" => Ok(Self::Hpb),
            _ => Err(GeneratorError::UnknownArchitecture(tag.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Resnet => "ResNet",
            Self::Unet => "U-Net",
            Self::Hpb => "HPB",
        }
    }
}

/// The block repeated at the bottleneck of the skeleton.
#[derive(Module, Debug)]
pub enum BodyBlock<B: Backend> {
    Residual(ResidualConvBlock<B>),
    Hybrid(HybridPerceptionBlock<B>),
}

impl<B: Backend> SpatialTransform<B> for BodyBlock<B> {
    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Residual(block) => block.transform(x),
            Self::Hybrid(block) => block.transform(x),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Residual(block) => block.name(),
            Self::Hybrid(block) => block.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_tags_are_case_insensitive() {
        assert_eq!(Architecture::from_tag("HPB").unwrap(), Architecture::Hpb);
        assert_eq!(Architecture::from_tag("unet").unwrap(), Architecture::Unet);
        assert!(matches!(
            Architecture::from_tag("transformer"),
            Err(GeneratorError::UnknownArchitecture(_))
        ));
    }
}
