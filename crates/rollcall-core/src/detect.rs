//! Anchor-free face detector via ONNX Runtime.
//!
//! Runs an SCRFD-family detection model (strides 8/16/32, two anchors per
//! cell) over a letterboxed RGB input, decodes box and landmark offsets,
//! and suppresses overlapping detections.

use crate::extract::ExtractError;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const DET_INPUT_SIZE: u32 = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_SCORE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// score/bbox/kps per stride.
const DET_OUTPUT_COUNT: usize = DET_STRIDES.len() * 3;

/// Mapping between the letterboxed model input and source image coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(src_w: u32, src_h: u32) -> Self {
        let scale = (DET_INPUT_SIZE as f32 / src_w as f32).min(DET_INPUT_SIZE as f32 / src_h as f32);
        let fitted_w = (src_w as f32 * scale).round();
        let fitted_h = (src_h as f32 * scale).round();
        Self {
            scale,
            pad_x: (DET_INPUT_SIZE as f32 - fitted_w) / 2.0,
            pad_y: (DET_INPUT_SIZE as f32 - fitted_h) / 2.0,
        }
    }

    /// Map a point from model-input space back to source-image space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-style face detector.
pub struct Detector {
    session: Session,
}

impl Detector {
    /// Load the detection ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, ExtractError> {
        if !Path::new(model_path).exists() {
            return Err(ExtractError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = num_outputs,
            "loaded detection model"
        );

        // Outputs are consumed positionally: [0-2] scores, [3-5] boxes,
        // [6-8] landmarks, each over strides 8/16/32.
        if num_outputs < DET_OUTPUT_COUNT {
            return Err(ExtractError::Inference(format!(
                "detection model must expose {DET_OUTPUT_COUNT} outputs (score/bbox/kps × 3 strides), got {num_outputs}"
            )));
        }

        Ok(Self { session })
    }

    /// Detect faces in an RGB image, returning boxes sorted by confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ExtractError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (level, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| ExtractError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[level + DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| ExtractError::Inference(format!("boxes stride {stride}: {e}")))?;
            let (_, landmarks) = outputs[level + 2 * DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| ExtractError::Inference(format!("landmarks stride {stride}: {e}")))?;

            decode_level(scores, boxes, landmarks, stride, &letterbox, &mut detections);
        }

        let mut faces = suppress(detections, DET_NMS_IOU);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(faces)
    }
}

/// Letterbox-resize an RGB image into the normalized NCHW input tensor.
///
/// Padding pixels hold `DET_MEAN`, which normalizes to exactly 0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let fitted_w = (image.width() as f32 * letterbox.scale).round() as u32;
    let fitted_h = (image.height() as f32 * letterbox.scale).round() as u32;
    let resized = imageops::resize(image, fitted_w.max(1), fitted_h.max(1), FilterType::Triangle);

    let size = DET_INPUT_SIZE as usize;
    let off_x = letterbox.pad_x.floor() as u32;
    let off_y = letterbox.pad_y.floor() as u32;

    let mut input = Array4::<f32>::from_elem((1, 3, size, size), 0.0);
    for y in 0..DET_INPUT_SIZE {
        for x in 0..DET_INPUT_SIZE {
            let inside = x >= off_x
                && x < off_x + resized.width()
                && y >= off_y
                && y < off_y + resized.height();
            let pixel = if inside {
                resized.get_pixel(x - off_x, y - off_y).0
            } else {
                [DET_MEAN as u8; 3]
            };
            for channel in 0..3 {
                input[[0, channel, y as usize, x as usize]] =
                    (pixel[channel] as f32 - DET_MEAN) / DET_STD;
            }
        }
    }

    (input, letterbox)
}

/// Decode score/box/landmark tensors for one stride level into detections
/// above the confidence threshold, in source-image coordinates.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    landmarks: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let cells_per_row = DET_INPUT_SIZE as usize / stride;
    let anchor_count = cells_per_row * cells_per_row * DET_ANCHORS_PER_CELL;

    for anchor in 0..anchor_count {
        let score = scores.get(anchor).copied().unwrap_or(0.0);
        if score <= DET_SCORE_THRESHOLD {
            continue;
        }

        let cell = anchor / DET_ANCHORS_PER_CELL;
        let center_x = ((cell % cells_per_row) * stride) as f32;
        let center_y = ((cell / cells_per_row) * stride) as f32;

        // Box regression is [left, top, right, bottom] distances in stride units.
        let b = anchor * 4;
        if b + 3 >= boxes.len() {
            continue;
        }
        let (x1, y1) = letterbox.to_source(
            center_x - boxes[b] * stride as f32,
            center_y - boxes[b + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.to_source(
            center_x + boxes[b + 2] * stride as f32,
            center_y + boxes[b + 3] * stride as f32,
        );

        // Five landmark points, [x, y] offsets in stride units.
        let k = anchor * 10;
        let points = if k + 9 < landmarks.len() {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                *point = letterbox.to_source(
                    center_x + landmarks[k + i * 2] * stride as f32,
                    center_y + landmarks[k + i * 2 + 1] * stride as f32,
                );
            }
            Some(points)
        } else {
            None
        };

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: points,
        });
    }
}

/// Non-maximum suppression: greedily keep the highest-confidence box and
/// drop any remaining box overlapping it beyond the IoU threshold.
fn suppress(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = (a.x + a.width).min(b.x + b.width);
    let bottom = (a.y + a.height).min(b.y + b.height);

    let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(0.0, 0.0, 64.0, 64.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(30.0, 30.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn suppress_drops_overlapping_keeps_distant() {
        let detections = vec![
            bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            bbox(4.0, 4.0, 100.0, 100.0, 0.8),
            bbox(300.0, 300.0, 40.0, 40.0, 0.7),
        ];
        let kept = suppress(detections, DET_NMS_IOU);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn suppress_keeps_all_when_disjoint() {
        let detections = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(50.0, 50.0, 10.0, 10.0, 0.8),
        ];
        assert_eq!(suppress(detections, DET_NMS_IOU).len(), 2);
    }

    #[test]
    fn suppress_empty_is_empty() {
        assert!(suppress(Vec::new(), DET_NMS_IOU).is_empty());
    }

    #[test]
    fn letterbox_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        // 320x240 fits 640x640 at scale 2 with vertical padding.
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!((lb.pad_x - 0.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);

        let (x, y) = (100.0f32, 50.0f32);
        let (rx, ry) = lb.to_source(x * lb.scale + lb.pad_x, y * lb.scale + lb.pad_y);
        assert!((rx - x).abs() < 0.1);
        assert!((ry - y).abs() < 0.1);
    }

    #[test]
    fn preprocess_pads_to_zero() {
        // A wide image leaves letterbox bands at top and bottom; the padded
        // rows must normalize to 0.
        let image = RgbImage::from_pixel(100, 50, image::Rgb([200, 200, 200]));
        let (input, lb) = preprocess(&image);
        assert!(lb.pad_y > 0.0);
        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert!(input[[0, 0, 0, 0]].abs() < 1e-2);
        assert!(input[[0, 2, 639, 639]].abs() < 1e-2);
    }
}
