//! Planar homography estimation
//!
//! RANSAC over 4-point minimal samples with a normalized-DLT least-squares
//! refinement on the inlier set. Sampling is seeded, so a given
//! correspondence set always yields the same matrix.

use crate::error::{Result, VisionError};
use artrack_core::Point2f;
use nalgebra::{DMatrix, Matrix3, SMatrix, SVector};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Determinant magnitude below which a homography counts as singular
pub const MIN_DETERMINANT: f64 = 1e-6;

/// RANSAC confidence used for adaptive early exit
const RANSAC_CONFIDENCE: f64 = 0.999;

/// Map points through a 3x3 projective transform
pub fn perspective_transform(pts: &[Point2f], h: &Matrix3<f64>) -> Vec<Point2f> {
    pts.iter()
        .map(|p| {
            let x = p.x as f64;
            let y = p.y as f64;
            let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
            let u = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
            let v = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
            Point2f::new(u as f32, v as f32)
        })
        .collect()
}

/// True when every entry is finite and the determinant is not near zero
pub fn is_valid_homography(h: &Matrix3<f64>) -> bool {
    h.iter().all(|v| v.is_finite()) && h.determinant().abs() >= MIN_DETERMINANT
}

/// Exact homography from 4 correspondences via an 8x8 linear solve
///
/// Returns `None` when the configuration is degenerate (three collinear
/// points on either side).
fn solve_minimal(src: &[Point2f], dst: &[Point2f]) -> Option<Matrix3<f64>> {
    debug_assert_eq!(src.len(), 4);
    debug_assert_eq!(dst.len(), 4);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[i].x as f64, src[i].y as f64);
        let (u, v) = (dst[i].x as f64, dst[i].y as f64);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    if m.iter().all(|v| v.is_finite()) {
        Some(m)
    } else {
        None
    }
}

/// Similarity transform moving a point set to centroid 0, mean norm sqrt(2)
fn normalizing_transform(pts: &[Point2f], indices: &[usize]) -> Matrix3<f64> {
    let n = indices.len() as f64;
    let (mut cx, mut cy) = (0.0, 0.0);
    for &i in indices {
        cx += pts[i].x as f64;
        cy += pts[i].y as f64;
    }
    cx /= n;
    cy /= n;
    let mut mean_dist = 0.0;
    for &i in indices {
        let dx = pts[i].x as f64 - cx;
        let dy = pts[i].y as f64 - cy;
        mean_dist += (dx * dx + dy * dy).sqrt();
    }
    mean_dist /= n;
    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Least-squares DLT over an inlier subset with Hartley normalization
fn solve_dlt(src: &[Point2f], dst: &[Point2f], indices: &[usize]) -> Option<Matrix3<f64>> {
    let t_src = normalizing_transform(src, indices);
    let t_dst = normalizing_transform(dst, indices);

    let mut a = DMatrix::<f64>::zeros(2 * indices.len(), 9);
    for (row, &i) in indices.iter().enumerate() {
        let x = t_src[(0, 0)] * src[i].x as f64 + t_src[(0, 2)];
        let y = t_src[(1, 1)] * src[i].y as f64 + t_src[(1, 2)];
        let u = t_dst[(0, 0)] * dst[i].x as f64 + t_dst[(0, 2)];
        let v = t_dst[(1, 1)] * dst[i].y as f64 + t_dst[(1, 2)];

        let r = 2 * row;
        a[(r, 0)] = -x;
        a[(r, 1)] = -y;
        a[(r, 2)] = -1.0;
        a[(r, 6)] = u * x;
        a[(r, 7)] = u * y;
        a[(r, 8)] = u;
        a[(r + 1, 3)] = -x;
        a[(r + 1, 4)] = -y;
        a[(r + 1, 5)] = -1.0;
        a[(r + 1, 6)] = v * x;
        a[(r + 1, 7)] = v * y;
        a[(r + 1, 8)] = v;
    }

    let svd = a.svd(true, true);
    let v_t = svd.v_t.as_ref()?;
    let min_idx = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;
    let h = v_t.row(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    // Denormalize: H = T_dst^-1 * Hn * T_src
    let t_dst_inv = t_dst.try_inverse()?;
    let mut full = t_dst_inv * hn * t_src;
    let scale = full[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    full /= scale;
    if full.iter().all(|v| v.is_finite()) {
        Some(full)
    } else {
        None
    }
}

/// Squared transfer error of correspondence `i` under `h`
#[inline]
fn transfer_error_sq(src: &Point2f, dst: &Point2f, h: &Matrix3<f64>) -> f64 {
    let x = src.x as f64;
    let y = src.y as f64;
    let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
    if w.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let u = (h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)]) / w;
    let v = (h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)]) / w;
    let du = u - dst.x as f64;
    let dv = v - dst.y as f64;
    du * du + dv * dv
}

/// Robust homography from point correspondences
///
/// Runs seeded RANSAC over minimal samples, refines on the best consensus
/// set with normalized DLT, and returns the matrix together with the
/// refined inlier mask.
///
/// Errors with `TooFewPoints` below 4 correspondences and `Homography`
/// when no valid consensus emerges.
pub fn find_homography_ransac(
    src: &[Point2f],
    dst: &[Point2f],
    threshold: f32,
    max_iters: usize,
    seed: u64,
) -> Result<(Matrix3<f64>, Vec<bool>)> {
    if src.len() != dst.len() {
        return Err(VisionError::Core(artrack_core::CoreError::shape(
            format!("{} src points", src.len()),
            format!("{} dst points", dst.len()),
        )));
    }
    let n = src.len();
    if n < 4 {
        return Err(VisionError::TooFewPoints { needed: 4, got: n });
    }

    let thr_sq = (threshold as f64) * (threshold as f64);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best_count = 0usize;
    let mut best_h: Option<Matrix3<f64>> = None;
    let mut needed_iters = max_iters;

    let mut iter = 0usize;
    while iter < max_iters.min(needed_iters) {
        iter += 1;
        let sample = rand::seq::index::sample(&mut rng, n, 4).into_vec();
        let s: Vec<Point2f> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<Point2f> = sample.iter().map(|&i| dst[i]).collect();

        let Some(h) = solve_minimal(&s, &d) else {
            continue;
        };

        let count = (0..n)
            .filter(|&i| transfer_error_sq(&src[i], &dst[i], &h) < thr_sq)
            .count();
        if count > best_count {
            best_count = count;
            best_h = Some(h);

            // Adaptive iteration bound from the current inlier ratio
            let w = count as f64 / n as f64;
            let p_outlier = 1.0 - w.powi(4);
            if p_outlier <= f64::EPSILON {
                break;
            }
            let est = ((1.0 - RANSAC_CONFIDENCE).ln() / p_outlier.ln()).ceil();
            if est.is_finite() && est > 0.0 {
                needed_iters = est as usize;
            }
        }
    }

    let Some(sample_h) = best_h else {
        return Err(VisionError::Homography(
            "no non-degenerate sample found".into(),
        ));
    };
    if best_count < 4 {
        return Err(VisionError::Homography(format!(
            "consensus too small: {best_count} inliers"
        )));
    }

    let inliers: Vec<usize> = (0..n)
        .filter(|&i| transfer_error_sq(&src[i], &dst[i], &sample_h) < thr_sq)
        .collect();

    // Refine on the consensus set; fall back to the sample solution when
    // refinement degenerates
    let refined = solve_dlt(src, dst, &inliers)
        .filter(is_valid_homography)
        .unwrap_or(sample_h);

    let mask: Vec<bool> = (0..n)
        .map(|i| transfer_error_sq(&src[i], &dst[i], &refined) < thr_sq)
        .collect();
    let final_count = mask.iter().filter(|&&b| b).count();
    if final_count < 4 || !is_valid_homography(&refined) {
        return Err(VisionError::Homography(format!(
            "refinement collapsed to {final_count} inliers"
        )));
    }

    tracing::trace!(
        inliers = final_count,
        total = n,
        iterations = iter,
        "homography estimated"
    );
    Ok((refined, mask))
}
