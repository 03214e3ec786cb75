use image::imageops::{self, FilterType};

use crate::error::PredictError;

/// Side length of the model's input images.
pub const IMAGE_DIM: u32 = 28;
/// Flattened input size (28 * 28).
pub const IMAGE_PIXELS: usize = (IMAGE_DIM * IMAGE_DIM) as usize;

/// A single normalized input row, ready for inference.
///
/// Invariant: exactly [`IMAGE_PIXELS`] values, each in [0, 1]. The invariant
/// is established in [`prepare`] and nowhere else.
#[derive(Debug)]
pub struct InputTensor {
    values: Vec<f32>,
}

impl InputTensor {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Shape as (rows, cols) — always (1, 784) for a valid tensor.
    pub fn shape(&self) -> (usize, usize) {
        (1, self.values.len())
    }
}

/// Turn raw uploaded bytes into the model's input row.
///
/// Decodes the image, converts to 8-bit grayscale, resizes to 28x28
/// (stretching non-square inputs rather than padding them), scales pixels
/// into [0, 1], and flattens row-major.
pub fn prepare(bytes: &[u8]) -> Result<InputTensor, PredictError> {
    let gray = image::load_from_memory(bytes)?.into_luma8();
    let resized = imageops::resize(&gray, IMAGE_DIM, IMAGE_DIM, FilterType::Lanczos3);

    let values: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|p| p as f32 / 255.0)
        .collect();

    if values.len() != IMAGE_PIXELS {
        return Err(PredictError::ShapeMismatch {
            rows: 1,
            cols: values.len(),
        });
    }

    Ok(InputTensor { values })
}
