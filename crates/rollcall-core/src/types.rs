use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face encoding vector (128-dimensional, L2-normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance to another encoding.
    ///
    /// Lower = more similar. Two captures of the same face typically land
    /// well under the 0.6 default tolerance.
    pub fn distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled face: a fully-formed (encoding, name, identifier) triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownFace {
    pub student_id: String,
    pub name: String,
    pub encoding: Encoding,
}

/// Result of matching a probe encoding against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Best candidate within tolerance. Confidence is `1 - distance`,
    /// deliberately not clamped (a distance above 1 yields a negative value).
    Match {
        student_id: String,
        name: String,
        confidence: f32,
    },
    NoMatch,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }
}

/// Strategy for comparing a probe encoding against the enrolled set.
pub trait Matcher {
    fn best_match(&self, probe: &Encoding, known: &[KnownFace], tolerance: f32) -> MatchOutcome;
}

/// Nearest-neighbor Euclidean matcher.
///
/// Scans every enrolled encoding and keeps the minimum distance — not the
/// first entry under tolerance. Ties resolve to the earliest-enrolled entry.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn best_match(&self, probe: &Encoding, known: &[KnownFace], tolerance: f32) -> MatchOutcome {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in known.iter().enumerate() {
            let dist = probe.distance(&face.encoding);
            // Strict improvement only, so equal distances keep the first entry.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            // Tolerance is the maximum distance still considered the same person.
            Some(idx) if best_dist <= tolerance => MatchOutcome::Match {
                student_id: known[idx].student_id.clone(),
                name: known[idx].name.clone(),
                confidence: 1.0 - best_dist,
            },
            _ => MatchOutcome::NoMatch,
        }
    }
}
