//! Face encoder via ONNX Runtime.
//!
//! Turns an aligned 112×112 face crop into a 128-dimensional L2-normalized
//! encoding using a MobileFaceNet-family model.

use crate::align;
use crate::extract::ExtractError;
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const ENC_INPUT_SIZE: usize = align::CROP_SIZE as usize;
const ENC_MEAN: f32 = 127.5;
const ENC_STD: f32 = 127.5;
/// Output dimensionality of the encoding model.
pub const ENCODING_DIM: usize = 128;

/// MobileFaceNet-style face encoder.
pub struct Encoder {
    session: Session,
}

impl Encoder {
    /// Load the encoding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded encoding model"
        );

        Ok(Self { session })
    }

    /// Encode a detected face from the full image.
    ///
    /// The face must carry landmarks; it is aligned to the canonical crop
    /// before inference.
    pub fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, ExtractError> {
        let landmarks = face.landmarks.as_ref().ok_or(ExtractError::NoLandmarks)?;
        let crop = align::align_crop(image, landmarks);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::Inference(format!("encoding extraction: {e}")))?;

        if raw.len() != ENCODING_DIM {
            return Err(ExtractError::Inference(format!(
                "expected {ENCODING_DIM}-dim encoding, got {}",
                raw.len()
            )));
        }

        Ok(Encoding::new(normalize(raw)))
    }
}

/// Preprocess an aligned RGB crop into a NCHW float tensor with symmetric
/// normalization.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let mut input = Array4::<f32>::zeros((1, 3, ENC_INPUT_SIZE, ENC_INPUT_SIZE));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, channel, y as usize, x as usize]] =
                (pixel.0[channel] as f32 - ENC_MEAN) / ENC_STD;
        }
    }
    input
}

/// L2-normalize the raw network output; a zero vector passes through.
fn normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
