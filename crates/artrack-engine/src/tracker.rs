//! Per-target Lucas-Kanade tracking with Kalman-smoothed corners
//!
//! Between detection frames each active target is carried by sparse
//! optical flow: track the point set forward, reject inconsistent points
//! with a forward-backward check, estimate a homography from the
//! survivors and move the corners through it. A per-corner constant
//! velocity Kalman filter smooths the emitted quadrilateral.
//!
//! Per-target phase machine: `Idle -> Seeded -> Tracking` with `Tracking`
//! re-entered every frame; any failure (no seeds, too few survivors,
//! homography failure, geometry failure) drops the target to `Lost`.

use artrack_core::{
    quad_contains, quad_min_edge, Corners, FlowConfig, Point2f, TrackingMode, TrackingResult,
};
use artrack_vision::{
    calc_optical_flow_pyr_lk, find_homography_ransac, good_features_to_track,
    perspective_transform, PointKalman,
};

/// Corner margin tolerated outside the frame while tracking (px)
const FLOW_FRAME_MARGIN: f32 = 50.0;

/// Edge floor while tracking (px)
const FLOW_MIN_EDGE: f32 = 20.0;

/// RANSAC parameters for the flow homography
const FLOW_RANSAC_THRESHOLD: f32 = 3.0;
const FLOW_RANSAC_ITERS: usize = 1000;
const FLOW_RANSAC_SEED: u64 = 0xF10;

/// Lifecycle of one tracked target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPhase {
    /// Known but never seeded
    Idle,
    /// Seeded by a detection, not yet stepped
    Seeded,
    /// Carried by optical flow
    Tracking,
    /// Dropped; waits for the next detection
    Lost,
}

struct TrackState {
    corners: Corners,
    points: Vec<Point2f>,
    kalman: [PointKalman; 4],
    confidence: f32,
    frames_tracked: u32,
    frames_since_detection: u32,
    phase: TargetPhase,
}

struct TrackEntry {
    id: String,
    state: TrackState,
}

/// Optical-flow tracker over every seeded target
///
/// Entries keep insertion order; `step` emits results in that order.
pub struct OpticalFlowTracker {
    config: FlowConfig,
    entries: Vec<TrackEntry>,
}

impl OpticalFlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn set_config(&mut self, config: FlowConfig) {
        self.config = config;
    }

    /// Targets currently in `Seeded` or `Tracking`
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.state.phase, TargetPhase::Seeded | TargetPhase::Tracking))
            .count()
    }

    pub fn phase(&self, id: &str) -> TargetPhase {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.state.phase)
            .unwrap_or(TargetPhase::Idle)
    }

    pub fn remove(&mut self, id: &str) {
        self.entries.retain(|e| e.id != id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Seed (or re-seed) a target from a fresh detection
    ///
    /// Initialises one Kalman filter per corner warm-started at the
    /// measured corner and picks up to `max_tracking_points` strong
    /// corners inside the quadrilateral.
    pub fn seed(&mut self, id: &str, corners: Corners, gray: &[u8], width: usize, height: usize) {
        let mask = |x: usize, y: usize| quad_contains(&corners, Point2f::new(x as f32, y as f32));
        let points = good_features_to_track(
            gray,
            width,
            height,
            self.config.max_tracking_points,
            self.config.quality_level,
            self.config.min_distance,
            Some(&mask),
        )
        .unwrap_or_default();

        tracing::debug!(target = id, points = points.len(), "seeded tracker");
        let kalman = [
            PointKalman::new(corners[0]),
            PointKalman::new(corners[1]),
            PointKalman::new(corners[2]),
            PointKalman::new(corners[3]),
        ];

        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.state.corners = corners;
            entry.state.points = points;
            entry.state.kalman = kalman;
            entry.state.confidence = 1.0;
            entry.state.frames_since_detection = 0;
            entry.state.phase = TargetPhase::Seeded;
        } else {
            self.entries.push(TrackEntry {
                id: id.to_string(),
                state: TrackState {
                    corners,
                    points,
                    kalman,
                    confidence: 1.0,
                    frames_tracked: 0,
                    frames_since_detection: 0,
                    phase: TargetPhase::Seeded,
                },
            });
        }
    }

    /// Advance every active target from `prev_gray` to `curr_gray`
    ///
    /// Emits one result per target that was active going in: successful
    /// targets with their smoothed corners, newly lost targets once with
    /// `success = false`.
    pub fn step(
        &mut self,
        curr_gray: &[u8],
        prev_gray: &[u8],
        width: usize,
        height: usize,
    ) -> Vec<TrackingResult> {
        let mut results = Vec::new();
        let config = self.config;

        for entry in &mut self.entries {
            let state = &mut entry.state;
            if !matches!(state.phase, TargetPhase::Seeded | TargetPhase::Tracking) {
                continue;
            }

            // Stale or empty point set: re-seed on the previous frame
            if state.points.is_empty() || state.frames_since_detection > config.max_no_detect {
                let corners = state.corners;
                let mask =
                    |x: usize, y: usize| quad_contains(&corners, Point2f::new(x as f32, y as f32));
                state.points = good_features_to_track(
                    prev_gray,
                    width,
                    height,
                    config.max_tracking_points,
                    config.quality_level,
                    config.min_distance,
                    Some(&mask),
                )
                .unwrap_or_default();
                state.frames_since_detection = 0;
            }
            if state.points.is_empty() {
                lose(&mut results, entry, "no trackable points");
                continue;
            }

            let step_outcome = step_target(
                &entry.state.points,
                &entry.state.corners,
                curr_gray,
                prev_gray,
                width,
                height,
                &config,
            );
            let (good_curr, new_corners, inlier_ratio) = match step_outcome {
                Ok(v) => v,
                Err(reason) => {
                    lose(&mut results, entry, reason);
                    continue;
                }
            };
            let state = &mut entry.state;

            // Smooth each corner: advance the model, fold in the measurement
            let mut smoothed = new_corners;
            for (i, corner) in new_corners.iter().enumerate() {
                state.kalman[i].predict();
                smoothed[i] = state.kalman[i].correct(*corner);
            }

            state.corners = smoothed;
            state.points = good_curr;
            state.frames_tracked += 1;
            state.frames_since_detection += 1;
            state.confidence = (inlier_ratio
                * (1.0 - state.frames_since_detection as f32 / config.max_no_detect as f32))
                .clamp(0.0, 1.0);
            state.phase = TargetPhase::Tracking;

            results.push(TrackingResult {
                target_id: entry.id.clone(),
                success: true,
                corners: smoothed,
                confidence: state.confidence,
                mode: TrackingMode::OpticalFlow,
            });
        }
        results
    }
}

/// One target's flow step; returns (surviving points, moved corners,
/// inlier ratio) or the reason the target was lost
fn step_target(
    points: &[Point2f],
    corners: &Corners,
    curr_gray: &[u8],
    prev_gray: &[u8],
    width: usize,
    height: usize,
    config: &FlowConfig,
) -> std::result::Result<(Vec<Point2f>, Corners, f32), &'static str> {
    // Forward flow, then backward, then the round-trip consistency check
    let (forward, fwd_status, _) = calc_optical_flow_pyr_lk(
        prev_gray,
        curr_gray,
        width,
        height,
        points,
        config.win_size,
        config.max_level,
    )
    .map_err(|_| "forward flow failed")?;
    let (backward, bwd_status, _) = calc_optical_flow_pyr_lk(
        curr_gray,
        prev_gray,
        width,
        height,
        &forward,
        config.win_size,
        config.max_level,
    )
    .map_err(|_| "backward flow failed")?;

    let mut good_prev = Vec::with_capacity(points.len());
    let mut good_curr = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        if !fwd_status[i] || !bwd_status[i] {
            continue;
        }
        if backward[i].distance_to(&points[i]) > config.fb_threshold {
            continue;
        }
        good_prev.push(points[i]);
        good_curr.push(forward[i]);
    }
    if good_curr.len() < config.min_inliers {
        return Err("too few surviving points");
    }

    let (homography, mask) = find_homography_ransac(
        &good_prev,
        &good_curr,
        FLOW_RANSAC_THRESHOLD,
        FLOW_RANSAC_ITERS,
        FLOW_RANSAC_SEED,
    )
    .map_err(|_| "flow homography failed")?;
    let inliers = mask.iter().filter(|&&b| b).count();
    let inlier_ratio = inliers as f32 / good_curr.len() as f32;

    let mapped = perspective_transform(corners, &homography);
    let new_corners: Corners = [mapped[0], mapped[1], mapped[2], mapped[3]];

    for c in &new_corners {
        if !c.x.is_finite()
            || !c.y.is_finite()
            || c.x < -FLOW_FRAME_MARGIN
            || c.y < -FLOW_FRAME_MARGIN
            || c.x > width as f32 + FLOW_FRAME_MARGIN
            || c.y > height as f32 + FLOW_FRAME_MARGIN
        {
            return Err("corners left the frame");
        }
    }
    if quad_min_edge(&new_corners) < FLOW_MIN_EDGE {
        return Err("quad collapsed");
    }

    Ok((good_curr, new_corners, inlier_ratio))
}

fn lose(results: &mut Vec<TrackingResult>, entry: &mut TrackEntry, reason: &str) {
    tracing::debug!(target = %entry.id, reason, "target lost");
    entry.state.phase = TargetPhase::Lost;
    entry.state.confidence = 0.0;
    results.push(TrackingResult {
        target_id: entry.id.clone(),
        success: false,
        corners: entry.state.corners,
        confidence: 0.0,
        mode: TrackingMode::OpticalFlow,
    });
}

#[allow(unused_imports, dead_code)]
#[cfg(test)]
mod tests {
    include!("tracker_test.rs");
}
