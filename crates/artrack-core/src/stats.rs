//! Per-frame timing and count instrumentation

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Durations and counts for one processed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Frame index since tracking started
    pub frame_index: u64,
    /// Time spent in the detection path (ms, 0 on tracking frames)
    pub detection_ms: f64,
    /// Time spent in the optical-flow path (ms, 0 on detection frames)
    pub tracking_ms: f64,
    /// Wall time of the whole `process_frame` call (ms)
    pub total_ms: f64,
    /// Targets located by detection this frame
    pub detected_targets: usize,
    /// Targets still tracked by optical flow this frame
    pub tracked_targets: usize,
}

/// Millisecond stopwatch for pipeline stages
#[derive(Debug, Clone, Copy)]
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Exponentially smoothed frame-time tracker
///
/// Keeps a cheap running view of engine throughput without retaining the
/// whole history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunningProfile {
    /// Frames folded in so far
    pub frames: u64,
    /// Smoothed total frame time (ms)
    pub avg_total_ms: f64,
    /// Worst total frame time seen (ms)
    pub max_total_ms: f64,
}

impl RunningProfile {
    const ALPHA: f64 = 0.1;

    /// Fold one frame's stats into the profile
    pub fn record(&mut self, stats: &FrameStats) {
        self.frames += 1;
        if self.frames == 1 {
            self.avg_total_ms = stats.total_ms;
        } else {
            self.avg_total_ms += Self::ALPHA * (stats.total_ms - self.avg_total_ms);
        }
        self.max_total_ms = self.max_total_ms.max(stats.total_ms);
    }

    /// Smoothed frames-per-second estimate
    pub fn fps(&self) -> f64 {
        if self.avg_total_ms > 0.0 {
            1000.0 / self.avg_total_ms
        } else {
            0.0
        }
    }
}
