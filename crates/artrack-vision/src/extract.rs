//! Frame preprocessing and capped feature extraction
//!
//! Pipeline: grayscale in → optional Gaussian blur → optional CLAHE →
//! detect + compute → cap at the strongest `max_features` keypoints.

use crate::detector::{FastBriefDetector, FeatureDetector};
use crate::error::{Result, VisionError};
use crate::imgproc::{clahe, gaussian_blur};
use artrack_core::{DetectorConfig, Descriptors, KeyPoint, PreprocessConfig};

/// Preprocesses frames and extracts capped keypoint/descriptor sets
///
/// Owns its scratch buffers so repeated extraction does not allocate once
/// the buffers reach frame size.
pub struct FeatureExtractor {
    detector: Box<dyn FeatureDetector>,
    preprocess: PreprocessConfig,
    max_features: usize,
    scratch_a: Vec<u8>,
    scratch_b: Vec<u8>,
}

impl FeatureExtractor {
    /// Build an extractor with the reference FAST + binary detector
    pub fn new(detector_config: &DetectorConfig, preprocess: PreprocessConfig) -> Result<Self> {
        preprocess.validate()?;
        Ok(Self {
            detector: Box::new(FastBriefDetector::new(
                detector_config.fast_threshold,
                detector_config.oriented,
            )),
            preprocess,
            max_features: detector_config.max_features,
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
        })
    }

    /// Build an extractor around a custom detector primitive
    pub fn with_detector(
        detector: Box<dyn FeatureDetector>,
        preprocess: PreprocessConfig,
        max_features: usize,
    ) -> Result<Self> {
        preprocess.validate()?;
        Ok(Self {
            detector,
            preprocess,
            max_features,
            scratch_a: Vec::new(),
            scratch_b: Vec::new(),
        })
    }

    /// Extract keypoints and descriptors from a grayscale frame
    ///
    /// Returns `NoFeatures` when the detector finds nothing. The output
    /// keeps `|keypoints| == rows(descriptors)`; when more than
    /// `max_features` keypoints are found, the strongest survive, ordered
    /// by descending response with detection order breaking ties.
    pub fn extract(
        &mut self,
        gray: &[u8],
        width: usize,
        height: usize,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        let mut input: &[u8] = gray;

        if self.preprocess.blur {
            self.scratch_a.resize(width * height, 0);
            gaussian_blur(
                input,
                width,
                height,
                self.preprocess.blur_kernel,
                self.preprocess.blur_sigma,
                &mut self.scratch_a,
            )?;
            input = &self.scratch_a;
        }

        if self.preprocess.clahe {
            self.scratch_b.resize(width * height, 0);
            clahe(
                input,
                width,
                height,
                self.preprocess.clahe_clip,
                self.preprocess.clahe_tile,
                &mut self.scratch_b,
            )?;
            input = &self.scratch_b;
        }

        let (keypoints, descriptors) = self.detector.detect_and_compute(input, width, height)?;
        debug_assert_eq!(keypoints.len(), descriptors.rows());
        if keypoints.is_empty() {
            return Err(VisionError::NoFeatures);
        }

        Ok(cap_features(keypoints, descriptors, self.max_features))
    }

    /// Element type the underlying detector emits
    pub fn descriptor_kind(&self) -> artrack_core::DescriptorKind {
        self.detector.descriptor_kind()
    }
}

/// Keep the `min(max_features, n)` strongest keypoints
///
/// Sorted by descending response, ties broken by detection order; the
/// descriptor rows are reordered and truncated in lockstep.
pub fn cap_features(
    keypoints: Vec<KeyPoint>,
    descriptors: Descriptors,
    max_features: usize,
) -> (Vec<KeyPoint>, Descriptors) {
    if keypoints.len() <= max_features {
        return (keypoints, descriptors);
    }

    let mut order: Vec<usize> = (0..keypoints.len()).collect();
    order.sort_by(|&a, &b| {
        keypoints[b]
            .response
            .partial_cmp(&keypoints[a].response)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order.truncate(max_features);

    let capped_desc = descriptors.select_rows(&order);
    let capped_kps: Vec<KeyPoint> = order.iter().map(|&i| keypoints[i]).collect();
    (capped_kps, capped_desc)
}
