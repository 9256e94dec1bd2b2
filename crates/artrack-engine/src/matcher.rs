//! Feature-based target matching
//!
//! KNN match → Lowe ratio test → RANSAC homography → geometric validation
//! → confidence. Order is fixed: the matrix is sanity-checked first, then
//! the reference corners are transformed, then validation runs on the
//! transformed corners.

use crate::error::{EngineError, Result};
use crate::store::Target;
use artrack_core::{
    quad_bounds, quad_is_convex, quad_min_edge, Corners, Descriptors, KeyPoint, MatchConfig,
    Point2f,
};
use artrack_vision::{find_homography_ransac, knn_match, perspective_transform, DMatch};
use nalgebra::Matrix3;
use std::sync::Arc;

/// Corner margin tolerated outside the frame (px)
const FRAME_MARGIN: f32 = 10.0;

/// Hard floor on quadrilateral edge length (px)
const MIN_EDGE: f32 = 5.0;

/// Hard cap on the bounding-box aspect ratio
const MAX_ASPECT: f32 = 5.0;

/// Acceptable quad-area / frame-area band; outside it geometry is
/// penalised, not rejected
const AREA_RATIO_MIN: f32 = 0.001;
const AREA_RATIO_MAX: f32 = 0.9;

/// Multiplier applied per soft geometry violation
const GEOMETRY_PENALTY: f32 = 0.7;

/// Inlier count at which the count score saturates
const INLIER_SATURATION: f32 = 50.0;

/// Seed for the matcher's RANSAC; fixed so identical frames reproduce
/// identical homographies
const RANSAC_SEED: u64 = 0xA11CE;

/// A successfully matched target in frame coordinates
#[derive(Debug, Clone)]
pub struct TargetMatch {
    pub target_id: String,
    pub homography: Matrix3<f64>,
    /// Reference corners mapped into the frame
    pub corners: Corners,
    pub confidence: f32,
    pub inliers: usize,
    /// Ratio-test survivors the homography was estimated from
    pub matches: usize,
}

/// Descriptor matcher + homography validator
pub struct FeatureMatcher {
    config: MatchConfig,
}

impl FeatureMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Lowe ratio test over KNN candidate lists
    ///
    /// Accepts the best candidate when it is distinctly closer than the
    /// second (`d0 < ratio * d1`); single-candidate lists are accepted
    /// outright. Idempotent: the accepted set re-filters to itself.
    pub fn ratio_filter(candidates: &[Vec<DMatch>], ratio: f32) -> Vec<DMatch> {
        let mut accepted = Vec::new();
        for list in candidates {
            match list.as_slice() {
                [] => {}
                [only] => accepted.push(*only),
                [first, second, ..] => {
                    if first.distance < ratio * second.distance {
                        accepted.push(*first);
                    }
                }
            }
        }
        accepted
    }

    /// Match one target against the frame's features
    ///
    /// Fails per-target (`InsufficientMatches`, `Homography`); the caller
    /// skips failures and keeps going.
    pub fn match_target(
        &self,
        target: &Target,
        frame_keypoints: &[KeyPoint],
        frame_descriptors: &Descriptors,
        frame_width: usize,
        frame_height: usize,
    ) -> Result<TargetMatch> {
        let candidates = knn_match(&target.descriptors, frame_descriptors, 2)?;
        let good = Self::ratio_filter(&candidates, self.config.ratio);
        if good.len() < self.config.min_inliers {
            return Err(EngineError::InsufficientMatches {
                got: good.len(),
                needed: self.config.min_inliers,
            });
        }

        let mut src = Vec::with_capacity(good.len());
        let mut dst = Vec::with_capacity(good.len());
        for m in &good {
            src.push(target.keypoints[m.query_idx].pt);
            dst.push(frame_keypoints[m.train_idx].pt);
        }
        if src.len() != dst.len() {
            return Err(EngineError::Inconsistent {
                src: src.len(),
                dst: dst.len(),
            });
        }

        let (homography, mask) = find_homography_ransac(
            &src,
            &dst,
            self.config.ransac_threshold,
            self.config.ransac_iterations,
            RANSAC_SEED,
        )
        .map_err(|e| EngineError::Homography(e.to_string()))?;
        let inliers = mask.iter().filter(|&&b| b).count();
        if inliers < self.config.min_inliers {
            return Err(EngineError::InsufficientMatches {
                got: inliers,
                needed: self.config.min_inliers,
            });
        }

        let mapped = perspective_transform(&target.corners, &homography);
        let corners: Corners = [mapped[0], mapped[1], mapped[2], mapped[3]];
        let geometry_score =
            validate_geometry(&corners, frame_width as f32, frame_height as f32)?;

        let confidence = confidence_score(inliers, good.len(), geometry_score);
        tracing::debug!(
            target = %target.id,
            inliers,
            matches = good.len(),
            confidence,
            "target matched"
        );

        Ok(TargetMatch {
            target_id: target.id.clone(),
            homography,
            corners,
            confidence,
            inliers,
            matches: good.len(),
        })
    }

    /// Match a candidate list; successes sorted by confidence descending
    /// (stable in candidate order), truncated to `max_results`
    pub fn match_multiple(
        &self,
        targets: &[Arc<Target>],
        frame_keypoints: &[KeyPoint],
        frame_descriptors: &Descriptors,
        frame_width: usize,
        frame_height: usize,
        max_results: usize,
    ) -> Vec<TargetMatch> {
        let mut matched: Vec<TargetMatch> = Vec::new();
        for target in targets {
            match self.match_target(
                target,
                frame_keypoints,
                frame_descriptors,
                frame_width,
                frame_height,
            ) {
                Ok(m) => matched.push(m),
                Err(e) => {
                    tracing::trace!(target = %target.id, error = %e, "candidate rejected");
                }
            }
        }
        let mut order: Vec<usize> = (0..matched.len()).collect();
        order.sort_by(|&a, &b| {
            matched[b]
                .confidence
                .partial_cmp(&matched[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        order.truncate(max_results);
        let mut out: Vec<TargetMatch> = Vec::with_capacity(order.len());
        for i in order {
            out.push(matched[i].clone());
        }
        out
    }
}

/// Validate transformed corners against the frame
///
/// Hard rejects: concave or inconsistently wound quads, edges under
/// 5 px, bounding-box aspect beyond 5. Soft penalties (x0.7 each):
/// corners outside the 10 px frame margin, quad area outside the
/// `[0.001, 0.9]` frame-area band.
pub fn validate_geometry(corners: &Corners, frame_width: f32, frame_height: f32) -> Result<f32> {
    let mut score = 1.0f32;

    for c in corners {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(EngineError::Homography("non-finite corner".into()));
        }
        let outside = c.x < -FRAME_MARGIN
            || c.y < -FRAME_MARGIN
            || c.x > frame_width + FRAME_MARGIN
            || c.y > frame_height + FRAME_MARGIN;
        if outside {
            score *= GEOMETRY_PENALTY;
        }
    }

    if !quad_is_convex(corners) {
        return Err(EngineError::Homography(
            "transformed corners are not a convex, consistently wound quad".into(),
        ));
    }
    if quad_min_edge(corners) < MIN_EDGE {
        return Err(EngineError::Homography(format!(
            "edge shorter than {MIN_EDGE} px"
        )));
    }

    let (min_x, min_y, max_x, max_y) = quad_bounds(corners);
    let w = max_x - min_x;
    let h = max_y - min_y;
    if w <= 0.0 || h <= 0.0 {
        return Err(EngineError::Homography("degenerate bounding box".into()));
    }
    let aspect = (w / h).max(h / w);
    if aspect > MAX_ASPECT {
        return Err(EngineError::Homography(format!(
            "aspect ratio {aspect:.2} beyond {MAX_ASPECT}"
        )));
    }

    let area_ratio = (w * h) / (frame_width * frame_height);
    if !(AREA_RATIO_MIN..=AREA_RATIO_MAX).contains(&area_ratio) {
        score *= GEOMETRY_PENALTY;
    }

    Ok(score)
}

/// Blend inlier support and geometry into `[0, 1]`
///
/// `0.7 * min(inliers / 50, 1) + 0.3 * inliers/matches`, scaled by the
/// geometry score.
pub fn confidence_score(inliers: usize, matches: usize, geometry_score: f32) -> f32 {
    if matches == 0 {
        return 0.0;
    }
    let count_score = (inliers as f32 / INLIER_SATURATION).min(1.0);
    let inlier_ratio = inliers as f32 / matches as f32;
    let match_score = 0.7 * count_score + 0.3 * inlier_ratio;
    (match_score * geometry_score).clamp(0.0, 1.0)
}
