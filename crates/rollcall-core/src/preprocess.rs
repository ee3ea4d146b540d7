//! Image-to-tensor preprocessing for square-input image models.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

const FLOAT_MEAN: f32 = 128.0;
const FLOAT_STD: f32 = 128.0;

/// Numeric variant of a bundled model. Chosen by configuration, never
/// inferred from the model file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// `f32` input normalized to roughly [-1, 1].
    #[default]
    Float,
    /// Raw `u8` channel bytes.
    Quantized,
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "fp32" => Ok(Self::Float),
            "quantized" | "quant" | "uint8" => Ok(Self::Quantized),
            other => Err(format!("unknown model variant: {other} (expected float or quantized)")),
        }
    }
}

/// NHWC input tensor `[1, size, size, 3]`.
#[derive(Debug, Clone)]
pub enum InputTensor {
    Float(Array4<f32>),
    Quantized(Array4<u8>),
}

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float(t) => t.shape(),
            Self::Quantized(t) => t.shape(),
        }
    }
}

/// Resize `image` to `size`×`size` and pack it for the given model variant.
pub fn to_input_tensor(image: &RgbImage, size: u32, variant: ModelVariant) -> InputTensor {
    let resized: Cow<'_, RgbImage> = if image.dimensions() == (size, size) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(image, size, size, FilterType::Triangle))
    };

    let side = size as usize;
    match variant {
        ModelVariant::Float => {
            let mut tensor = Array4::<f32>::zeros((1, side, side, 3));
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] =
                        (pixel[c] as f32 - FLOAT_MEAN) / FLOAT_STD;
                }
            }
            InputTensor::Float(tensor)
        }
        ModelVariant::Quantized => {
            let mut tensor = Array4::<u8>::zeros((1, side, side, 3));
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] = pixel[c];
                }
            }
            InputTensor::Quantized(tensor)
        }
    }
}
