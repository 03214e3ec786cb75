use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Linear, VarBuilder, ops::softmax};
use serde::Serialize;

use crate::preprocess::{IMAGE_PIXELS, InputTensor};

const HIDDEN_DIM: usize = 128;
const CLASSES: usize = 10;

/// Output of one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub digit: u8,
    pub confidence: f32,
}

/// The loaded classifier: a 784 -> 128 -> 10 MLP over flattened grayscale
/// pixels. Immutable after load; one instance serves every request.
#[derive(Debug)]
pub struct Engine {
    model: Mlp,
    device: Device,
}

#[derive(Debug)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        let fc1 = candle_nn::linear(IMAGE_PIXELS, HIDDEN_DIM, vb.pp("fc1"))?;
        let fc2 = candle_nn::linear(HIDDEN_DIM, CLASSES, vb.pp("fc2"))?;
        Ok(Self { fc1, fc2 })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.apply(&self.fc1)?.relu()?.apply(&self.fc2)
    }
}

impl Engine {
    pub fn load(path: &Path) -> Result<Self> {
        let device = Device::Cpu;
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read model weights from {}", path.display()))?;
        let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, &device)?;
        let model = Mlp::new(vb)?;

        Ok(Self { model, device })
    }

    /// Classify one prepared input: softmax over the 10 classes, then the
    /// highest-probability digit and that probability. Ties resolve to the
    /// lowest digit.
    pub fn predict(&self, input: &InputTensor) -> candle_core::Result<Prediction> {
        let xs = Tensor::from_slice(input.values(), (1, IMAGE_PIXELS), &self.device)?;
        let logits = self.model.forward(&xs)?;
        let probs = softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1::<f32>()?;

        let mut digit = 0;
        let mut confidence = probs[0];
        for (i, &p) in probs.iter().enumerate().skip(1) {
            if p > confidence {
                digit = i;
                confidence = p;
            }
        }

        Ok(Prediction {
            digit: digit as u8,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use candle_core::{DType, Device, Tensor};

    use super::{CLASSES, Engine, HIDDEN_DIM};
    use crate::preprocess::{IMAGE_PIXELS, InputTensor, prepare};

    fn write_zero_weights(dir: &Path) -> PathBuf {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            "fc1.weight".to_string(),
            Tensor::zeros((HIDDEN_DIM, IMAGE_PIXELS), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "fc1.bias".to_string(),
            Tensor::zeros(HIDDEN_DIM, DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "fc2.weight".to_string(),
            Tensor::zeros((CLASSES, HIDDEN_DIM), DType::F32, &device).unwrap(),
        );
        tensors.insert(
            "fc2.bias".to_string(),
            Tensor::zeros(CLASSES, DType::F32, &device).unwrap(),
        );
        let path = dir.join("mnist.safetensors");
        candle_core::safetensors::save(&tensors, &path).unwrap();
        path
    }

    fn black_square_input() -> InputTensor {
        let img = image::DynamicImage::new_luma8(28, 28);
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        prepare(&buf).unwrap()
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Engine::load(&dir.path().join("nope.safetensors")).unwrap_err();
        assert!(err.to_string().contains("nope.safetensors"));
    }

    #[test]
    fn test_zero_weights_give_uniform_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::load(&write_zero_weights(dir.path())).unwrap();
        let prediction = engine.predict(&black_square_input()).unwrap();

        // All-zero logits softmax to a uniform distribution; argmax takes
        // the first index.
        assert_eq!(prediction.digit, 0);
        assert!((prediction.confidence - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::load(&write_zero_weights(dir.path())).unwrap();
        let input = black_square_input();

        let first = engine.predict(&input).unwrap();
        let second = engine.predict(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_prediction_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::load(&write_zero_weights(dir.path())).unwrap();
        let prediction = engine.predict(&black_square_input()).unwrap();

        assert!(prediction.digit <= 9);
        assert!((0.0..=1.0).contains(&prediction.confidence));
    }
}
