use burn::{prelude::*, tensor::ops::PadMode};

use crate::error::{self, GeneratorError};

/// Border handling used ahead of the unpadded convolutions.
#[derive(Config, Debug, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    Reflect,
    Replicate,
    Zero,
}

impl PaddingMode {
    /// Resolve a padding tag (`reflect`, `replicate`, `zero`).
    pub fn from_tag(tag: &str) -> error::Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "reflect" => Ok(Self::Reflect),
            "replicate" => Ok(Self::Replicate),
            "zero" => Ok(Self::Zero),
            _ => Err(GeneratorError::UnsupportedPadding(tag.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Reflect => "reflect",
            Self::Replicate => "replicate",
            Self::Zero => "zero",
        }
    }

    pub fn pad_mode(&self) -> PadMode {
        match self {
            Self::Reflect => PadMode::Reflect,
            Self::Replicate => PadMode::Edge,
            Self::Zero => PadMode::Constant(0.0),
        }
    }
}

/// Pads the two spatial axes of a feature map by `size` on every side.
///
/// Reflection mirrors without repeating the edge pixel, so it needs
/// `size < len` on both axes; see [`Pad2d::check`].
#[derive(Clone, Debug)]
pub struct Pad2d {
    mode: PaddingMode,
    size: usize,
}

impl Pad2d {
    pub fn new(mode: PaddingMode, size: usize) -> Self {
        Self { mode, size }
    }

    pub fn mode(&self) -> PaddingMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Verify the padding can be applied to a `height x width` map.
    pub fn check(&self, height: usize, width: usize) -> std::result::Result<(), String> {
        if self.mode == PaddingMode::Reflect && (self.size >= height || self.size >= width) {
            return Err(format!(
                "reflect padding of {} needs a spatial size above {}, got {}x{}",
                self.size, self.size, height, width
            ));
        }
        if self.mode == PaddingMode::Replicate && (height == 0 || width == 0) {
            return Err("replicate padding needs a non-empty map".to_string());
        }
        Ok(())
    }

    /// # Shapes
    ///   - Input  [batch, channels, height, width]
    ///   - Output [batch, channels, height + 2 * size, width + 2 * size]
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.size == 0 {
            return x;
        }
        let p = self.size;
        x.pad((p, p, p, p), self.mode.pad_mode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        let data: Vec<f32> = (0..9).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [1, 1, 3, 3]), device)
    }

    #[test]
    fn reflect_mirrors_without_edge() {
        let device = Default::default();
        let out = Pad2d::new(PaddingMode::Reflect, 1).forward(ramp(&device));
        assert_eq!(out.dims(), [1, 1, 5, 5]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        // first padded row mirrors source row 1: [4, 3, 4, 5, 4]
        assert_eq!(&values[0..5], &[4.0, 3.0, 4.0, 5.0, 4.0]);
    }

    #[test]
    fn replicate_copies_edge() {
        let device = Default::default();
        let out = Pad2d::new(PaddingMode::Replicate, 2).forward(ramp(&device));
        assert_eq!(out.dims(), [1, 1, 7, 7]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert_eq!(&values[0..7], &[0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn zero_surrounds_with_zeros() {
        let device = Default::default();
        let out = Pad2d::new(PaddingMode::Zero, 1).forward(ramp(&device));
        assert_eq!(out.dims(), [1, 1, 5, 5]);
        let total: f32 = out.sum().into_scalar();
        assert_eq!(total, 36.0);
    }

    #[test]
    fn reflect_rejects_small_maps() {
        let pad = Pad2d::new(PaddingMode::Reflect, 3);
        assert!(pad.check(3, 8).is_err());
        assert!(pad.check(4, 4).is_ok());
    }

    #[test]
    fn unknown_padding_tag_is_an_error() {
        assert!(matches!(
            PaddingMode::from_tag("circular"),
            Err(GeneratorError::UnsupportedPadding(_))
        ));
        assert_eq!(PaddingMode::from_tag("Reflect").unwrap(), PaddingMode::Reflect);
    }
}
