use std::path::Path;

use burn::prelude::*;

use crate::architectures::{Architecture, HybridPerceptionBlockConfig, ResidualConvBlockConfig, UnetGeneratorConfig};
use crate::architectures::unet::MAX_DEPTH;
use crate::error::{self, GeneratorError};
use crate::layers::InitKind;
use crate::norm::NormKind;
use crate::padding::PaddingMode;
use crate::skeleton::SkeletonPlan;

/// Upper bound on any layer width.
const MAX_CHANNELS: usize = 1 << 16;

/// Build-time description of a generator.
///
/// Saved and loaded as JSON through [`Config`]; presets come from
/// [`GeneratorConfig::from_tag`].
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    #[config(default = "Architecture::Hpb")]
    pub architecture: Architecture,
    #[config(default = 3)]
    pub input_channels: usize,
    #[config(default = 3)]
    pub output_channels: usize,
    /// Width of the first convolution; later stages are multiples of it.
    #[config(default = 64)]
    pub base_channels: usize,
    #[config(default = "NormKind::Instance")]
    pub norm: NormKind,
    #[config(default = "PaddingMode::Reflect")]
    pub padding: PaddingMode,
    #[config(default = false)]
    pub use_dropout: bool,
    /// Body blocks at the bottleneck (ResNet and HPB).
    #[config(default = 9)]
    pub n_blocks: usize,
    #[config(default = 2)]
    pub n_downsampling: usize,
    /// Number of skip levels (U-Net).
    #[config(default = 8)]
    pub unet_depth: usize,
    #[config(default = 8)]
    pub attn_heads: usize,
    /// Per-head width; `base_channels` when unset.
    pub attn_dim_head: Option<usize>,
    #[config(default = 8)]
    pub height_top_k: usize,
    #[config(default = 8)]
    pub width_top_k: usize,
    #[config(default = 4)]
    pub ff_mult: usize,
    #[config(default = 0.0)]
    pub attn_dropout: f64,
    #[config(default = 0.0)]
    pub ff_dropout: f64,
    /// Build without dropout modules.
    #[config(default = true)]
    pub inference: bool,
    #[config(default = "InitKind::Normal")]
    pub init: InitKind,
    #[config(default = 0.02)]
    pub init_gain: f64,
}

impl GeneratorConfig {
    /// Preset for an architecture tag.
    ///
    /// Recognized: `resnet_6blocks`, `resnet_9blocks`, `resnet_15blocks`,
    /// `unet_128`, `unet_256`, `HPB`, and the bare families `resnet`,
    /// `unet`, `hpb`.
    pub fn from_tag(tag: &str) -> error::Result<Self> {
        let config = Self::new();
        let config = match tag.to_ascii_lowercase().as_str() {
            "resnet_6blocks" => config.with_architecture(Architecture::Resnet).with_n_blocks(6),
            "resnet_9blocks" => config.with_architecture(Architecture::Resnet).with_n_blocks(9),
            "resnet_15blocks" => config.with_architecture(Architecture::Resnet).with_n_blocks(15),
            "unet_128" => config.with_architecture(Architecture::Unet).with_unet_depth(7),
            "unet_256" => config.with_architecture(Architecture::Unet).with_unet_depth(8),
            _ => config.with_architecture(Architecture::from_tag(tag)?),
        };
        Ok(config)
    }

    /// Every preset tag [`Self::from_tag`] accepts, excluding bare families.
    pub fn preset_tags() -> &'static [&'static str] {
        &["resnet_6blocks", "resnet_9blocks", "resnet_15blocks", "unet_128", "unet_256", "HPB"]
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> error::Result<Self> {
        let path = path.as_ref();
        Self::load(path).map_err(|err| GeneratorError::InvalidConfig(format!("{}: {err}", path.display())))
    }

    pub fn dim_head(&self) -> usize {
        self.attn_dim_head.unwrap_or(self.base_channels)
    }

    /// Channels of the body blocks.
    pub fn bottleneck_channels(&self) -> usize {
        self.base_channels << self.n_downsampling
    }

    /// Shape of the body's input for an input of `shape`.
    pub fn bottleneck_shape(&self, shape: [usize; 4]) -> [usize; 4] {
        let [batch, _, height, width] = shape;
        let scale = 1 << self.n_downsampling;
        [batch, self.bottleneck_channels(), height / scale, width / scale]
    }

    /// Height and width must be multiples of this.
    pub fn required_multiple(&self) -> usize {
        match self.architecture {
            Architecture::Unet => 1 << self.unet_depth,
            Architecture::Resnet | Architecture::Hpb => 1 << self.n_downsampling,
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.input_channels == 0 || self.output_channels == 0 || self.base_channels == 0 {
            return Err(GeneratorError::InvalidConfig(format!(
                "channel counts must be positive, got input {} output {} base {}",
                self.input_channels, self.output_channels, self.base_channels
            )));
        }
        if !(0.0..1.0).contains(&self.attn_dropout) || !(0.0..1.0).contains(&self.ff_dropout) {
            return Err(GeneratorError::InvalidConfig(
                "dropout rates must lie in [0, 1)".to_string(),
            ));
        }
        if self.init_gain < 0.0 {
            return Err(GeneratorError::InvalidConfig(format!(
                "init gain must be non-negative, got {}",
                self.init_gain
            )));
        }
        self.validate_widths()?;
        match self.architecture {
            Architecture::Unet => self.unet().validate(),
            Architecture::Resnet => self.plan().check(),
            Architecture::Hpb => {
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
                if self.attn_heads == 0 || self.dim_head() == 0 || self.ff_mult == 0 {
                    return Err(GeneratorError::InvalidConfig(
                        "attention heads, head width and ff_mult must be positive".to_string(),
                    ));
                }
                self.plan().check()
            }
        }
    }

    /// Stage count and widest layer, checked before any plan is derived
    /// from them.
    fn validate_widths(&self) -> error::Result<()> {
        let stages = match self.architecture {
            Architecture::Unet => self.unet_depth,
            Architecture::Resnet | Architecture::Hpb => self.n_downsampling,
        };
        if stages > MAX_DEPTH {
            return Err(GeneratorError::InvalidConfig(format!(
                "at most {MAX_DEPTH} resampling stages, got {stages}"
            )));
        }
        // U-Net widths stop doubling after three levels
        let widest = match self.architecture {
            Architecture::Unet => self.base_channels.checked_mul(8),
            Architecture::Resnet | Architecture::Hpb => self.base_channels.checked_mul(1 << stages),
        };
        if widest.is_none_or(|width| width > MAX_CHANNELS) {
            return Err(GeneratorError::InvalidConfig(format!(
                "base width {} with {stages} stages exceeds {MAX_CHANNELS} channels",
                self.base_channels
            )));
        }
        Ok(())
    }

    pub(crate) fn plan(&self) -> SkeletonPlan {
        SkeletonPlan::symmetric(
            self.input_channels,
            self.output_channels,
            self.base_channels,
            self.n_downsampling,
        )
    }

    pub(crate) fn unet(&self) -> UnetGeneratorConfig {
        UnetGeneratorConfig::new(self.input_channels, self.output_channels)
            .with_base_channels(self.base_channels)
            .with_depth(self.unet_depth)
            .with_use_dropout(self.use_dropout)
    }

    pub(crate) fn residual_block(&self) -> ResidualConvBlockConfig {
        ResidualConvBlockConfig::new(self.bottleneck_channels())
            .with_padding(self.padding)
            .with_use_dropout(self.use_dropout)
    }

    pub(crate) fn hybrid_block(&self) -> HybridPerceptionBlockConfig {
        HybridPerceptionBlockConfig::new(self.bottleneck_channels())
            .with_dim_head(self.dim_head())
            .with_heads(self.attn_heads)
            .with_ff_mult(self.ff_mult)
            .with_height_top_k(self.height_top_k)
            .with_width_top_k(self.width_top_k)
            .with_attn_dropout(self.attn_dropout)
            .with_ff_dropout(self.ff_dropout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve() {
        let resnet = GeneratorConfig::from_tag("resnet_15blocks").unwrap();
        assert_eq!(resnet.architecture, Architecture::Resnet);
        assert_eq!(resnet.n_blocks, 15);

        let unet = GeneratorConfig::from_tag("unet_128").unwrap();
        assert_eq!(unet.architecture, Architecture::Unet);
        assert_eq!(unet.unet_depth, 7);

        let hpb = GeneratorConfig::from_tag("HPB").unwrap();
        assert_eq!(hpb.architecture, Architecture::Hpb);
        assert_eq!(hpb.n_blocks, 9);
        assert_eq!(hpb.dim_head(), 64);
    }

    #[test]
    fn unknown_tag_is_fatal() {
        assert!(matches!(
            GeneratorConfig::from_tag("resnet_7blocks"),
            Err(GeneratorError::UnknownArchitecture(_))
        ));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let config = GeneratorConfig::new().with_height_top_k(0);
        assert!(matches!(
            config.validate(),
            Err(GeneratorError::InvalidTopK { axis: "height", .. })
        ));
    }

    #[test]
    fn oversized_plans_are_errors() {
        let deep = GeneratorConfig::new()
            .with_architecture(Architecture::Resnet)
            .with_n_downsampling(70);
        assert!(matches!(deep.validate(), Err(GeneratorError::InvalidConfig(_))));

        let hpb = GeneratorConfig::new().with_n_downsampling(usize::MAX);
        assert!(matches!(hpb.validate(), Err(GeneratorError::InvalidConfig(_))));

        let wide = GeneratorConfig::new()
            .with_architecture(Architecture::Resnet)
            .with_base_channels(usize::MAX / 2);
        assert!(matches!(wide.validate(), Err(GeneratorError::InvalidConfig(_))));

        let wide_unet = GeneratorConfig::from_tag("unet_256")
            .unwrap()
            .with_base_channels(usize::MAX / 4);
        assert!(matches!(wide_unet.validate(), Err(GeneratorError::InvalidConfig(_))));

        let limit = GeneratorConfig::new()
            .with_architecture(Architecture::Resnet)
            .with_n_downsampling(MAX_DEPTH)
            .with_base_channels(1);
        assert!(limit.validate().is_ok());
    }

    #[test]
    fn default_bottleneck_matches_reference_scenario() {
        let config = GeneratorConfig::from_tag("HPB").unwrap();
        assert_eq!(config.bottleneck_shape([1, 3, 256, 256]), [1, 256, 64, 64]);
        assert_eq!(config.required_multiple(), 4);
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generator.json");
        let config = GeneratorConfig::from_tag("unet_256").unwrap().with_norm(NormKind::Batch);
        config.save(&path).unwrap();

        let loaded = GeneratorConfig::load_json(&path).unwrap();
        assert_eq!(loaded.architecture, Architecture::Unet);
        assert_eq!(loaded.norm, NormKind::Batch);
        assert_eq!(loaded.unet_depth, 8);
    }
}
