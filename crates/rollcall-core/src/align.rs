//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face to the canonical 112×112 crop expected by the
//! encoder, using the five standard reference landmarks and a least-squares
//! transform estimate.

use image::RgbImage;

/// Canonical five-point landmark positions for a 112×112 crop
/// (left eye, right eye, nose, left mouth, right mouth).
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const CROP_SIZE: u32 = 112;

/// Align a detected face to the canonical 112×112 crop.
pub fn align_crop(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = similarity_transform(landmarks, &CANONICAL_LANDMARKS);
    warp(image, &transform, CROP_SIZE)
}

/// 2×3 similarity transform [a, -b, tx; b, a, ty] stored row-major.
type Transform = [f32; 6];

/// Least-squares estimate of the 4-DOF similarity transform (scale,
/// rotation, translation) mapping `src` onto `dst`.
///
/// Each point pair contributes two rows to the overdetermined system
/// `A·[a, b, tx, ty]ᵀ = B`:
///
/// ```text
/// sx·a - sy·b + tx = dx
/// sy·a + sx·b + ty = dy
/// ```
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Transform {
    let mut normal = [[0.0f32; 4]; 4];
    let mut rhs = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];

        for (row, target) in rows {
            for j in 0..4 {
                for k in 0..4 {
                    normal[j][k] += row[j] * row[k];
                }
                rhs[j] += row[j] * target;
            }
        }
    }

    let [a, b, tx, ty] = solve(normal, rhs);
    [a, -b, tx, b, a, ty]
}

/// Solve the 4×4 normal equations by Gaussian elimination with partial
/// pivoting. A singular system falls back to the identity transform.
fn solve(mut m: [[f32; 4]; 4], mut b: [f32; 4]) -> [f32; 4] {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in col + 1..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let mut acc = b[i];
        for j in i + 1..4 {
            acc -= m[i][j] * x[j];
        }
        x[i] = acc / m[i][i];
    }
    x
}

/// Apply the inverse of a similarity transform to produce a square output
/// crop, sampling the source with bilinear interpolation per channel.
/// Out-of-bounds samples are black.
fn warp(image: &RgbImage, transform: &Transform, out_size: u32) -> RgbImage {
    let (a, tx, b, ty) = (transform[0], transform[2], transform[3], transform[5]);

    // Invert the rotation-scale block [[a, -b], [b, a]]: det = a² + b².
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return RgbImage::new(out_size, out_size);
    }
    let ia = a / det;
    let ib = b / det;

    let (src_w, src_h) = (image.width() as i64, image.height() as i64);

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i64;
        let y0 = sy.floor() as i64;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let sample = |x: i64, y: i64, channel: usize| -> f32 {
            if x >= 0 && x < src_w && y >= 0 && y < src_h {
                image.get_pixel(x as u32, y as u32).0[channel] as f32
            } else {
                0.0
            }
        };

        let mut pixel = [0u8; 3];
        for (channel, out) in pixel.iter_mut().enumerate() {
            let value = sample(x0, y0, channel) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, channel) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, channel) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, channel) * fx * fy;
            *out = value.round().clamp(0.0, 255.0) as u8;
        }
        image::Rgb(pixel)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn identity_when_landmarks_already_canonical() {
        let m = similarity_transform(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a' = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn doubled_landmarks_give_half_scale() {
        let src: [(f32, f32); 5] =
            std::array::from_fn(|i| (CANONICAL_LANDMARKS[i].0 * 2.0, CANONICAL_LANDMARKS[i].1 * 2.0));
        let m = similarity_transform(&src, &CANONICAL_LANDMARKS);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn crop_has_canonical_dimensions() {
        let image = RgbImage::from_pixel(640, 480, Rgb([120, 120, 120]));
        let cropped = align_crop(&image, &CANONICAL_LANDMARKS);
        assert_eq!(cropped.dimensions(), (CROP_SIZE, CROP_SIZE));
    }

    #[test]
    fn landmark_patch_lands_at_canonical_position() {
        // Paint a red patch at the source left-eye landmark; after alignment
        // it must appear near the canonical left-eye position.
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let mut image = RgbImage::new(200, 200);
        for dy in 0..5u32 {
            for dx in 0..5u32 {
                let x = src_landmarks[0].0 as u32 - 2 + dx;
                let y = src_landmarks[0].1 as u32 - 2 + dy;
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let cropped = align_crop(&image, &src_landmarks);

        let (ex, ey) = (
            CANONICAL_LANDMARKS[0].0.round() as u32,
            CANONICAL_LANDMARKS[0].1.round() as u32,
        );
        let mut max_red = 0u8;
        for dy in 0..3u32 {
            for dx in 0..3u32 {
                let p = cropped.get_pixel(ex - 1 + dx, ey - 1 + dy);
                max_red = max_red.max(p.0[0]);
            }
        }
        assert!(max_red > 100, "expected red patch near ({ex}, {ey}), max={max_red}");
    }

    #[test]
    fn quarter_turn_recovered() {
        // Source landmarks rotated 90° CCW about the origin: (x, y) → (-y, x).
        // The recovered transform must rotate back, so a ≈ 0 and b ≈ -1.
        let src: [(f32, f32); 5] =
            std::array::from_fn(|i| (-CANONICAL_LANDMARKS[i].1, CANONICAL_LANDMARKS[i].0));
        let m = similarity_transform(&src, &CANONICAL_LANDMARKS);
        assert!(m[0].abs() < 1e-3, "a = {}", m[0]);
        assert!((m[3] + 1.0).abs() < 1e-3, "b = {}", m[3]);
    }
}
