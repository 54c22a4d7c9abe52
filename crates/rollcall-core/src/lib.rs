//! rollcall-core — Face detection, encoding and matching.
//!
//! Detection uses an anchor-free SCRFD-style model, encodings come from a
//! MobileFaceNet-style network producing 128-dimensional vectors, both
//! running via ONNX Runtime for CPU inference. Matching is nearest-neighbor
//! Euclidean distance against the enrolled set.

pub mod align;
pub mod detect;
pub mod encode;
pub mod extract;
pub mod quality;
pub mod types;

pub use extract::{DetectedFace, ExtractError, FaceExtractor, OnnxExtractor};
pub use types::{BoundingBox, Encoding, KnownFace, MatchOutcome, Matcher, NearestMatcher};

use std::path::PathBuf;

/// Default directory for the ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
