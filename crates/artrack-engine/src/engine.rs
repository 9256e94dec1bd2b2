//! Engine: per-frame orchestration of the detect/track pipeline
//!
//! Single-threaded cooperative hot path: one frame in, results out,
//! nothing awaited in between. The previous grayscale frame and all
//! transient buffers come from the memory pool; the target database is
//! read-only after build.

use crate::error::Result;
use crate::matcher::FeatureMatcher;
use crate::store::{Target, TargetStore};
use crate::tracker::OpticalFlowTracker;
use artrack_core::{
    reference_corners, Corners, Descriptors, DetectorConfig, EngineConfig, FlowConfig,
    FrameHandle, FrameStats, KeyPoint, MatchConfig, MemoryPool, PreprocessConfig, RunningProfile,
    StageTimer, TrackingMode, TrackingResult, WeightScheme,
};
use artrack_vision::{to_grayscale, FeatureExtractor, VisionError};
use artrack_vocab::{weight_bow, Database, VocabularyIndex, VocabularyTree};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Use vocabulary ranking only past this many targets; below it, matching
/// everything is cheaper than quantising the frame
const CANDIDATE_QUERY_MIN_TARGETS: usize = 4;

/// Planar-target detection and tracking engine
pub struct Engine {
    config: EngineConfig,
    store: TargetStore,
    index: Option<VocabularyIndex>,
    extractor: FeatureExtractor,
    matcher: FeatureMatcher,
    tracker: OpticalFlowTracker,
    pool: MemoryPool,
    tracking: bool,
    frame_index: u64,
    prev_frame: Option<FrameHandle>,
    last_stats: FrameStats,
    profile: RunningProfile,
    /// Last successful result per target, for consumers that need the
    /// most recent corners; never returned as a current-frame output
    results_cache: HashMap<String, TrackingResult>,
    preprocess: PreprocessConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let preprocess = PreprocessConfig::default();
        Ok(Self {
            extractor: FeatureExtractor::new(&Self::detector_config(&config), preprocess)?,
            matcher: FeatureMatcher::new(Self::match_config(&config)),
            tracker: OpticalFlowTracker::new(Self::flow_config(&config)),
            pool: MemoryPool::default(),
            store: TargetStore::new(),
            index: None,
            tracking: false,
            frame_index: 0,
            prev_frame: None,
            last_stats: FrameStats::default(),
            profile: RunningProfile::default(),
            results_cache: HashMap::new(),
            config,
            preprocess,
        })
    }

    fn detector_config(config: &EngineConfig) -> DetectorConfig {
        DetectorConfig {
            max_features: config.max_features,
            ..Default::default()
        }
    }

    fn match_config(config: &EngineConfig) -> MatchConfig {
        MatchConfig {
            ratio: config.match_ratio_threshold,
            ransac_threshold: config.ransac_threshold,
            ransac_iterations: config.ransac_iterations,
            ..Default::default()
        }
    }

    fn flow_config(config: &EngineConfig) -> FlowConfig {
        FlowConfig {
            max_tracking_points: config.max_tracking_points,
            ..Default::default()
        }
    }

    /// Replace the engine configuration; targets and vocabulary survive
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        self.extractor = FeatureExtractor::new(&Self::detector_config(&config), self.preprocess)?;
        self.matcher = FeatureMatcher::new(Self::match_config(&config));
        self.tracker.set_config(Self::flow_config(&config));
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Database management
    // ------------------------------------------------------------------

    /// Install a built vocabulary for candidate ranking
    pub fn install_vocabulary(
        &mut self,
        tree: VocabularyTree,
        idf: Vec<f32>,
        avg_dl: f32,
        scheme: WeightScheme,
    ) {
        let mut index = VocabularyIndex::new(tree, idf, avg_dl, scheme);
        // Re-register existing targets so ranking sees them
        for target in self.store.all() {
            if !target.bow.is_empty() {
                let weighted = weight_bow(
                    &target.bow,
                    index.idf(),
                    scheme,
                    target.descriptors.rows(),
                    avg_dl,
                );
                index.insert(target.id.clone(), weighted);
            }
        }
        self.index = Some(index);
    }

    /// Add a target; corners default to the reference rectangle
    ///
    /// `bow` feeds the vocabulary index when one is installed. Re-adding
    /// an id replaces the stored target.
    pub fn add_target(
        &mut self,
        id: &str,
        width: u32,
        height: u32,
        keypoints: Vec<KeyPoint>,
        descriptors: Descriptors,
        bow: Option<BTreeMap<u32, u32>>,
    ) -> Result<()> {
        let bow = bow.unwrap_or_default();
        let corners: Corners = reference_corners(width as f32, height as f32);
        let rows = descriptors.rows();
        self.store.add(Target {
            id: id.to_string(),
            width,
            height,
            keypoints,
            descriptors,
            corners,
            bow: bow.clone(),
        })?;
        if let Some(index) = &mut self.index {
            if !bow.is_empty() {
                let weighted =
                    weight_bow(&bow, index.idf(), index.scheme(), rows, index.avg_dl());
                index.insert(id, weighted);
            }
        }
        tracing::info!(target = id, features = rows, "target added");
        Ok(())
    }

    /// Install a loaded database: vocabulary plus every stored target
    pub fn load_database(&mut self, db: &Database) -> Result<()> {
        let tree = Database::deserialize_tree(
            &db.vocabulary.tree,
            db.metadata.branch_factor,
            db.metadata.levels,
        )?;
        self.index = Some(VocabularyIndex::new(
            tree,
            db.vocabulary.idf.clone(),
            db.metadata.avg_dl,
            db.metadata.weighting,
        ));
        for record in &db.targets {
            self.add_target(
                &record.id,
                record.width,
                record.height,
                record.keypoints.clone(),
                record.descriptors.clone(),
                Some(record.bow.clone()),
            )?;
        }
        Ok(())
    }

    pub fn remove_target(&mut self, id: &str) -> bool {
        self.tracker.remove(id);
        self.results_cache.remove(id);
        if let Some(index) = &mut self.index {
            index.remove(id);
        }
        self.store.remove(id)
    }

    pub fn clear_targets(&mut self) {
        self.store.clear();
        self.tracker.clear();
        self.results_cache.clear();
        if let Some(index) = &mut self.index {
            index.clear();
        }
    }

    pub fn target_count(&self) -> usize {
        self.store.len()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Begin processing; the next frame is index 0 and runs detection
    pub fn start_tracking(&mut self) {
        self.tracking = true;
        self.frame_index = 0;
        self.prev_frame = None;
        self.tracker.clear();
        self.results_cache.clear();
        tracing::info!("tracking started");
    }

    /// Stop processing and release the previous-frame buffer
    ///
    /// Subsequent `process_frame` calls return empty until tracking is
    /// restarted.
    pub fn stop_tracking(&mut self) {
        self.tracking = false;
        self.prev_frame = None;
        tracing::info!("tracking stopped");
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Drop all runtime state (tracker, stats, caches); the database stays
    pub fn reset(&mut self) {
        self.tracking = false;
        self.frame_index = 0;
        self.prev_frame = None;
        self.tracker.clear();
        self.results_cache.clear();
        self.last_stats = FrameStats::default();
        self.profile = RunningProfile::default();
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn profile(&self) -> RunningProfile {
        self.profile
    }

    pub fn pool_stats(&self) -> artrack_core::PoolStats {
        self.pool.stats()
    }

    /// Most recent successful result for a target, if any frame produced
    /// one since tracking started
    pub fn cached_result(&self, id: &str) -> Option<&TrackingResult> {
        self.results_cache.get(id)
    }

    // ------------------------------------------------------------------
    // Frame processing
    // ------------------------------------------------------------------

    /// Process one frame and return this frame's results
    ///
    /// Detection results come back sorted by confidence descending, flow
    /// results in target insertion order. Per-target failures are local;
    /// only malformed input surfaces as an error.
    pub fn process_frame(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Vec<TrackingResult>> {
        if !self.tracking {
            return Ok(Vec::new());
        }
        let total_timer = StageTimer::start();

        let mut gray = self.pool.acquire_frame(width, height, 1);
        to_grayscale(pixels, width, height, channels, &mut gray)?;

        let run_detection = !self.config.use_optical_flow
            || self.frame_index % self.config.detection_interval as u64 == 0
            || self.prev_frame.is_none();

        let mut stats = FrameStats {
            frame_index: self.frame_index,
            ..Default::default()
        };

        let results = if run_detection {
            let timer = StageTimer::start();
            let results = self.detect(&gray, width, height);
            if self.config.enable_profiling {
                stats.detection_ms = timer.elapsed_ms();
            }
            stats.detected_targets = results.iter().filter(|r| r.success).count();
            results
        } else {
            let timer = StageTimer::start();
            let prev = self.prev_frame.as_ref().expect("checked above");
            let results = self.tracker.step(&gray, prev, width, height);
            if self.config.enable_profiling {
                stats.tracking_ms = timer.elapsed_ms();
            }
            stats.tracked_targets = results.iter().filter(|r| r.success).count();
            results
        };

        // The current grayscale becomes the previous frame; the old
        // buffer returns to the pool
        self.prev_frame = Some(gray);
        self.frame_index += 1;

        for r in &results {
            if r.success {
                self.results_cache.insert(r.target_id.clone(), r.clone());
            }
        }

        if self.config.enable_profiling {
            stats.total_ms = total_timer.elapsed_ms();
        }
        self.last_stats = stats;
        self.profile.record(&stats);
        tracing::trace!(
            frame = stats.frame_index,
            detected = stats.detected_targets,
            tracked = stats.tracked_targets,
            total_ms = stats.total_ms,
            "frame processed"
        );
        Ok(results)
    }

    /// Full detection path: extract, rank candidates, match, seed flow
    fn detect(&mut self, gray: &[u8], width: usize, height: usize) -> Vec<TrackingResult> {
        if self.store.is_empty() {
            return Vec::new();
        }

        let (keypoints, descriptors) = match self.extractor.extract(gray, width, height) {
            Ok(out) => out,
            Err(VisionError::NoFeatures) => {
                tracing::debug!("frame produced no features");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(error = %e, "feature extraction failed");
                return Vec::new();
            }
        };

        // Rank candidates through the vocabulary when the database is big
        // enough to make it worthwhile
        let candidates = match &self.index {
            Some(index)
                if self.store.len() >= CANDIDATE_QUERY_MIN_TARGETS && !index.is_empty() =>
            {
                let ranked = index.query_candidates(&descriptors, self.config.max_candidates);
                let ids: Vec<String> = ranked.into_iter().map(|(id, _)| id).collect();
                self.store.get_batch(&ids)
            }
            _ => self.store.all(),
        };

        let matches = self.matcher.match_multiple(
            &candidates,
            &keypoints,
            &descriptors,
            width,
            height,
            self.config.max_candidates.max(candidates.len()),
        );

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            if m.inliers < self.matcher.config().min_inliers {
                continue;
            }
            if self.config.use_optical_flow {
                self.tracker.seed(&m.target_id, m.corners, gray, width, height);
            }
            results.push(TrackingResult {
                target_id: m.target_id,
                success: true,
                corners: m.corners,
                confidence: m.confidence,
                mode: TrackingMode::Detection,
            });
        }
        results
    }
}

#[allow(unused_imports, dead_code)]
#[cfg(test)]
mod tests {
    include!("engine_test.rs");
}
