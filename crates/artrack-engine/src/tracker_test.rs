// Optical-flow tracker tests
//
// Seeding, stepping over synthetic translations, the forward-backward
// gate and the loss state machine.

use super::*;
use artrack_core::reference_corners;

// ============================================================================
// Fixtures
// ============================================================================

/// Deterministic high-contrast texture: random 4-px blocks, lightly
/// blurred so the flow linearization has gradients to work with
fn noise_image(width: usize, height: usize, seed: u64) -> Vec<u8> {
    const BLOCK: usize = 4;
    let bw = width.div_ceil(BLOCK);
    let bh = height.div_ceil(BLOCK);
    let mut state = seed.max(1);
    let blocks: Vec<u8> = (0..bw * bh)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state & 0xFF) as u8
        })
        .collect();
    let mut img: Vec<u8> = (0..width * height)
        .map(|i| {
            let bx = (i % width) / BLOCK;
            let by = (i / width) / BLOCK;
            blocks[by * bw + bx]
        })
        .collect();
    let src = img.clone();
    artrack_vision::gaussian_blur(&src, width, height, 3, 0.8, &mut img).unwrap();
    img
}

fn shift_image(img: &[u8], width: usize, height: usize, dx: i32, dy: i32) -> Vec<u8> {
    let mut out = vec![0u8; width * height];
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let sx = x - dx;
            let sy = y - dy;
            if sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height {
                out[y as usize * width + x as usize] = img[sy as usize * width + sx as usize];
            }
        }
    }
    out
}

fn inner_quad(size: f32, inset: f32) -> Corners {
    [
        Point2f::new(inset, inset),
        Point2f::new(size - inset, inset),
        Point2f::new(size - inset, size - inset),
        Point2f::new(inset, size - inset),
    ]
}

// ============================================================================
// Seeding
// ============================================================================

#[test]
fn test_seed_collects_points_inside_quad() {
    let img = noise_image(128, 128, 1);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    let quad = inner_quad(128.0, 20.0);
    tracker.seed("t", quad, &img, 128, 128);
    assert_eq!(tracker.phase("t"), TargetPhase::Seeded);
    assert_eq!(tracker.active_count(), 1);
}

#[test]
fn test_unknown_target_is_idle() {
    let tracker = OpticalFlowTracker::new(FlowConfig::default());
    assert_eq!(tracker.phase("nope"), TargetPhase::Idle);
}

#[test]
fn test_reseed_resets_detection_age() {
    let img = noise_image(128, 128, 2);
    let shifted = shift_image(&img, 128, 128, 1, 1);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    let quad = inner_quad(128.0, 20.0);
    tracker.seed("t", quad, &img, 128, 128);
    tracker.step(&shifted, &img, 128, 128);
    // A new detection re-seeds and the target keeps tracking
    tracker.seed("t", quad, &shifted, 128, 128);
    assert_eq!(tracker.phase("t"), TargetPhase::Seeded);
    assert_eq!(tracker.active_count(), 1);
}

// ============================================================================
// Stepping
// ============================================================================

#[test]
fn test_step_tracks_translation() {
    let img = noise_image(128, 128, 3);
    let shifted = shift_image(&img, 128, 128, 2, 1);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    let quad = inner_quad(128.0, 24.0);
    tracker.seed("t", quad, &img, 128, 128);

    let results = tracker.step(&shifted, &img, 128, 128);
    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert!(r.success, "target lost on a clean translation");
    assert_eq!(r.mode, TrackingMode::OpticalFlow);
    assert_eq!(tracker.phase("t"), TargetPhase::Tracking);

    // Corners moved roughly with the image (Kalman start damps the first
    // step, so allow slack)
    let dx = r.corners[0].x - quad[0].x;
    let dy = r.corners[0].y - quad[0].y;
    assert!(dx > 0.5 && dx < 3.5, "dx = {dx}");
    assert!(dy > 0.0 && dy < 2.5, "dy = {dy}");
}

#[test]
fn test_step_static_scene_stays_put() {
    let img = noise_image(128, 128, 4);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    let quad = inner_quad(128.0, 24.0);
    tracker.seed("t", quad, &img, 128, 128);

    for _ in 0..3 {
        let results = tracker.step(&img, &img, 128, 128);
        assert!(results[0].success);
    }
    let r = tracker.step(&img, &img, 128, 128);
    for (a, b) in r[0].corners.iter().zip(quad.iter()) {
        assert!(a.distance_to(b) < 2.0, "corner drifted: {a:?} vs {b:?}");
    }
}

#[test]
fn test_confidence_decays_between_detections() {
    let img = noise_image(128, 128, 5);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    tracker.seed("t", inner_quad(128.0, 24.0), &img, 128, 128);

    let c1 = tracker.step(&img, &img, 128, 128)[0].confidence;
    let mut c_last = c1;
    for _ in 0..5 {
        let r = tracker.step(&img, &img, 128, 128);
        assert!(r[0].confidence <= c_last + 1e-6);
        c_last = r[0].confidence;
    }
    assert!(c_last < c1);
}

#[test]
fn test_results_in_insertion_order() {
    let img = noise_image(128, 128, 6);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    tracker.seed("b", inner_quad(128.0, 24.0), &img, 128, 128);
    tracker.seed("a", inner_quad(128.0, 30.0), &img, 128, 128);
    let results = tracker.step(&img, &img, 128, 128);
    let ids: Vec<&str> = results.iter().map(|r| r.target_id.as_str()).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

// ============================================================================
// Loss
// ============================================================================

#[test]
fn test_flat_frame_loses_target() {
    let img = noise_image(128, 128, 7);
    let flat = vec![128u8; 128 * 128];
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    tracker.seed("t", inner_quad(128.0, 24.0), &img, 128, 128);

    // Tracking into a textureless frame cannot keep enough points
    let results = tracker.step(&flat, &img, 128, 128);
    assert_eq!(results.len(), 1);
    if !results[0].success {
        assert_eq!(tracker.phase("t"), TargetPhase::Lost);
    }
    // Lost targets emit nothing on later frames
    let later = tracker.step(&flat, &img, 128, 128);
    if !results[0].success {
        assert!(later.is_empty());
    }
}

#[test]
fn test_seed_on_flat_image_goes_lost_on_step() {
    let flat = vec![128u8; 128 * 128];
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    tracker.seed("t", inner_quad(128.0, 24.0), &flat, 128, 128);
    let results = tracker.step(&flat, &flat, 128, 128);
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(tracker.phase("t"), TargetPhase::Lost);
}

#[test]
fn test_remove_and_clear() {
    let img = noise_image(128, 128, 8);
    let mut tracker = OpticalFlowTracker::new(FlowConfig::default());
    tracker.seed("t", inner_quad(128.0, 24.0), &img, 128, 128);
    tracker.remove("t");
    assert_eq!(tracker.active_count(), 0);
    tracker.seed("u", inner_quad(128.0, 24.0), &img, 128, 128);
    tracker.clear();
    assert_eq!(tracker.active_count(), 0);
    assert!(tracker.step(&img, &img, 128, 128).is_empty());
}
