//! Image-quality pre-filters for enrollment input.
//!
//! Stateless checks run before detection: a blurred or badly exposed photo
//! produces an encoding that degrades every later match against it.

use image::RgbImage;
use thiserror::Error;

/// Default Laplacian-variance floor below which an image counts as blurred.
pub const DEFAULT_BLUR_THRESHOLD: f32 = 100.0;
/// Default acceptable mean-luma range.
pub const DEFAULT_MIN_BRIGHTNESS: f32 = 40.0;
pub const DEFAULT_MAX_BRIGHTNESS: f32 = 220.0;

// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityIssue {
    #[error("image too blurry (laplacian variance {variance:.1} < {threshold:.1})")]
    TooBlurry { variance: f32, threshold: f32 },
    #[error("image too dark (mean brightness {mean:.1})")]
    TooDark { mean: f32 },
    #[error("image too bright (mean brightness {mean:.1})")]
    TooBright { mean: f32 },
}

/// Thresholds for [`assess`]. `Default` mirrors the daemon defaults.
#[derive(Debug, Clone)]
pub struct QualityThresholds {
    pub blur_threshold: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
        }
    }
}

/// Run all pre-filters, failing on the first violated threshold.
///
/// Brightness is checked before blur: an under- or over-exposed frame has
/// little gradient energy and would otherwise always be reported as blurry.
pub fn assess(image: &RgbImage, thresholds: &QualityThresholds) -> Result<(), QualityIssue> {
    let luma = luma_plane(image);
    let (w, h) = (image.width() as usize, image.height() as usize);

    let mean = mean_brightness(&luma);
    if mean < thresholds.min_brightness {
        return Err(QualityIssue::TooDark { mean });
    }
    if mean > thresholds.max_brightness {
        return Err(QualityIssue::TooBright { mean });
    }

    let variance = laplacian_variance(&luma, w, h);
    if variance < thresholds.blur_threshold {
        return Err(QualityIssue::TooBlurry {
            variance,
            threshold: thresholds.blur_threshold,
        });
    }

    Ok(())
}

/// Collapse an RGB image to a BT.601 luma plane.
fn luma_plane(image: &RgbImage) -> Vec<f32> {
    image
        .pixels()
        .map(|p| LUMA_R * p.0[0] as f32 + LUMA_G * p.0[1] as f32 + LUMA_B * p.0[2] as f32)
        .collect()
}

fn mean_brightness(luma: &[f32]) -> f32 {
    if luma.is_empty() {
        return 0.0;
    }
    luma.iter().sum::<f32>() / luma.len() as f32
}

/// Variance of the 3×3 Laplacian response over interior pixels.
///
/// The classic focus measure: sharp edges produce large second derivatives,
/// defocus blur flattens them.
fn laplacian_variance(luma: &[f32], width: usize, height: usize) -> f32 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = luma[y * width + x];
            let response = luma[(y - 1) * width + x]
                + luma[(y + 1) * width + x]
                + luma[y * width + x - 1]
                + luma[y * width + x + 1]
                - 4.0 * center;
            responses.push(response);
        }
    }

    let mean = responses.iter().sum::<f32>() / responses.len() as f32;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / responses.len() as f32
}
