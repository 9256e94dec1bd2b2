//! Fixed configuration records and the build-critical config signature
//!
//! The loose per-experiment dictionaries of ad-hoc trackers become plain
//! structs with enumerated options and defaults; unknown keys are rejected
//! at deserialization time. Every field that affects descriptors or the
//! vocabulary is folded into a 64-bit signature so a stored database can be
//! rejected the moment the pipeline it was built with changes.

use crate::error::{CoreError, Result};
use crate::types::DescriptorKind;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Term-weighting scheme applied to BoW histograms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// Term frequency x inverse document frequency
    TfIdf,
    /// Okapi BM25 with k1 = 1.2, b = 0.75
    Bm25,
}

impl WeightScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TfIdf => "tfidf",
            Self::Bm25 => "bm25",
        }
    }
}

/// Frame/reference preprocessing ahead of feature detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PreprocessConfig {
    /// Apply a Gaussian blur before detection
    pub blur: bool,
    /// Blur kernel side, odd and >= 3
    pub blur_kernel: usize,
    /// Blur sigma; <= 0 derives sigma from the kernel size
    pub blur_sigma: f32,
    /// Apply contrast-limited adaptive histogram equalization
    pub clahe: bool,
    /// CLAHE clip limit
    pub clahe_clip: f32,
    /// CLAHE tile side in pixels
    pub clahe_tile: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            blur: true,
            blur_kernel: 5,
            blur_sigma: 1.0,
            clahe: false,
            clahe_clip: 2.0,
            clahe_tile: 8,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.blur && (self.blur_kernel < 3 || self.blur_kernel % 2 == 0) {
            return Err(CoreError::InvalidInput(format!(
                "blur kernel must be odd and >= 3, got {}",
                self.blur_kernel
            )));
        }
        if self.clahe && self.clahe_tile == 0 {
            return Err(CoreError::InvalidInput("clahe tile must be > 0".into()));
        }
        Ok(())
    }
}

/// Feature detector tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DetectorConfig {
    /// Keep at most this many keypoints per image, strongest first
    pub max_features: usize,
    /// FAST segment-test intensity threshold
    pub fast_threshold: u8,
    /// Steer the descriptor pattern by the keypoint orientation
    pub oriented: bool,
    /// Descriptor width in bytes (binary) resp. floats (float)
    pub descriptor_width: usize,
    /// Element type the detector emits
    pub descriptor_kind: DescriptorKind,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            fast_threshold: 20,
            oriented: true,
            descriptor_width: 32,
            descriptor_kind: DescriptorKind::Binary,
        }
    }
}

/// Offline vocabulary build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildConfig {
    /// Detector the reference images were processed with
    pub detector: DetectorConfig,
    /// Preprocessing applied before detection
    pub preprocess: PreprocessConfig,
    /// Weighting scheme shared by targets and queries
    pub weighting: WeightScheme,
    /// Override the adaptive branching factor
    pub branch_factor: Option<usize>,
    /// Override the adaptive tree depth
    pub levels: Option<usize>,
    /// Upper bound on descriptors sampled into clustering
    pub max_samples: usize,
    /// Seed for descriptor subsampling and center initialisation
    pub seed: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            preprocess: PreprocessConfig::default(),
            weighting: WeightScheme::Bm25,
            branch_factor: None,
            levels: None,
            max_samples: 10_000,
            seed: 0x5EED,
        }
    }
}

/// Descriptor matching and homography estimation tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MatchConfig {
    /// Lowe ratio-test threshold
    pub ratio: f32,
    /// Minimum accepted matches before and inliers after RANSAC
    pub min_inliers: usize,
    /// RANSAC reprojection threshold in pixels
    pub ransac_threshold: f32,
    /// RANSAC iteration cap
    pub ransac_iterations: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ratio: 0.7,
            min_inliers: 10,
            ransac_threshold: 3.0,
            ransac_iterations: 2000,
        }
    }
}

/// Per-target optical-flow tracking tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlowConfig {
    /// Upper bound on points tracked per target
    pub max_tracking_points: usize,
    /// Minimum surviving points to stay active
    pub min_inliers: usize,
    /// Forward-backward round-trip rejection threshold in pixels
    pub fb_threshold: f32,
    /// Re-seed the point set after this many frames without detection
    pub max_no_detect: u32,
    /// Lucas-Kanade window side in pixels
    pub win_size: usize,
    /// Pyramid levels for Lucas-Kanade
    pub max_level: usize,
    /// Shi-Tomasi quality level for seeding
    pub quality_level: f32,
    /// Minimum distance between seeded points in pixels
    pub min_distance: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_tracking_points: 50,
            min_inliers: 8,
            fb_threshold: 1.0,
            max_no_detect: 30,
            win_size: 21,
            max_level: 3,
            quality_level: 0.01,
            min_distance: 10.0,
        }
    }
}

/// Engine orchestration configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Alternate detection with cheap optical-flow frames
    pub use_optical_flow: bool,
    /// Run full detection every this many frames
    pub detection_interval: u32,
    /// Keypoint cap per frame
    pub max_features: usize,
    /// Tracked-point cap per target
    pub max_tracking_points: usize,
    /// Lowe ratio-test threshold
    pub match_ratio_threshold: f32,
    /// RANSAC iteration cap
    pub ransac_iterations: usize,
    /// RANSAC reprojection threshold in pixels
    pub ransac_threshold: f32,
    /// Candidate cap for vocabulary-ranked matching
    pub max_candidates: usize,
    /// Record per-frame stage durations
    pub enable_profiling: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_optical_flow: true,
            detection_interval: 5,
            max_features: 500,
            max_tracking_points: 50,
            match_ratio_threshold: 0.7,
            ransac_iterations: 2000,
            ransac_threshold: 3.0,
            max_candidates: 5,
            enable_profiling: true,
        }
    }
}

/// Database schema version, bumped on any serialized-layout change
pub const DATABASE_VERSION: &str = "1.0.0";

/// Stable 64-bit hash over every build-critical field
///
/// Two databases are interchangeable iff their signatures match: the hash
/// covers the detector id and tuning, preprocessing, descriptor shape, the
/// vocabulary dimensions and the weighting scheme.
pub fn config_signature(config: &BuildConfig) -> u64 {
    let mut h = XxHash64::with_seed(0);
    let d = &config.detector;
    h.write(b"fast-brief");
    h.write_u8(d.fast_threshold);
    h.write_u8(d.oriented as u8);
    h.write(d.descriptor_kind.as_str().as_bytes());
    h.write_u64(d.descriptor_width as u64);
    h.write_u64(d.max_features as u64);
    let p = &config.preprocess;
    h.write_u8(p.blur as u8);
    if p.blur {
        h.write_u64(p.blur_kernel as u64);
        h.write_u32(p.blur_sigma.to_bits());
    }
    h.write_u8(p.clahe as u8);
    if p.clahe {
        h.write_u32(p.clahe_clip.to_bits());
        h.write_u64(p.clahe_tile as u64);
    }
    h.write(config.weighting.as_str().as_bytes());
    h.write_u64(config.branch_factor.unwrap_or(0) as u64);
    h.write_u64(config.levels.unwrap_or(0) as u64);
    h.write_u64(config.max_samples as u64);
    h.finish()
}
