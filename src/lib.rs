//! HPB generator: image-to-image translation networks built on hybrid
//! perception blocks and dual-pruned self-attention, with ResNet and
//! U-Net alternatives.

pub mod error;

// Building blocks
pub mod layers;
pub mod norm;
pub mod padding;
pub mod dpsa;

// Generator families and their assembly
pub mod architectures;
pub mod skeleton;
pub mod config;
pub mod generator;

// Weight persistence
pub mod weights;

pub mod benchmark;
pub mod device;

pub use architectures::{Architecture, SpatialTransform};
pub use config::GeneratorConfig;
pub use dpsa::{DpsaConfig, DualPrunedSelfAttention, PrunedIndexSet};
pub use error::{GeneratorError, Result};
pub use generator::Generator;
pub use norm::NormKind;
pub use padding::PaddingMode;
pub use weights::{ParameterSet, StoredTensor};
