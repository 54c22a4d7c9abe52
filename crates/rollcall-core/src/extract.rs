//! The feature-extraction seam: detect every face in an image and encode
//! each one. The daemon depends on the [`FaceExtractor`] trait so tests can
//! substitute a deterministic stub for the ONNX pipeline.

use crate::detect::Detector;
use crate::encode::Encoder;
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model file not found: {0} — place the ONNX models in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("face has no landmarks — the detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face found in a submitted image: where it is and what it encodes to.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub encoding: Encoding,
}

/// Detect and encode all faces in an image.
///
/// Must be deterministic for a given image. Faces are returned in
/// descending detection-confidence order.
pub trait FaceExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError>;
}

/// Production extractor: SCRFD-style detection followed by aligned
/// MobileFaceNet-style encoding.
pub struct OnnxExtractor {
    detector: Detector,
    encoder: Encoder,
}

impl OnnxExtractor {
    /// Load both models, failing fast if either is missing.
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, ExtractError> {
        Ok(Self {
            detector: Detector::load(detector_path)?,
            encoder: Encoder::load(encoder_path)?,
        })
    }
}

impl FaceExtractor for OnnxExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let faces = self.detector.detect(image)?;
        tracing::debug!(count = faces.len(), "faces detected");

        let mut detected = Vec::with_capacity(faces.len());
        for bbox in faces {
            let encoding = self.encoder.encode(image, &bbox)?;
            detected.push(DetectedFace { bbox, encoding });
        }
        Ok(detected)
    }
}
