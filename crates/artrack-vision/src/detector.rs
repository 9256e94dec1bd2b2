//! FAST corner detection with an oriented binary descriptor
//!
//! The reference detector pairs a FAST-9 segment test with a 256-bit
//! intensity-comparison descriptor whose test pattern is fixed at
//! construction from a seeded generator, so identical inputs always produce
//! identical descriptors. Orientation comes from the intensity centroid and
//! steers the pattern, giving in-plane rotation tolerance.

use crate::error::{Result, VisionError};
use artrack_core::{DescriptorKind, Descriptors, KeyPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pixels of margin a keypoint needs for descriptor extraction
pub const DESCRIPTOR_BORDER: usize = 19;

/// Test-pattern coordinate bound; rotated offsets stay inside the border
const PATTERN_RADIUS: i32 = 13;

/// Number of descriptor bits
const DESCRIPTOR_BITS: usize = 256;

/// Seed for the fixed test pattern
const PATTERN_SEED: u64 = 0x0D15_EA5E;

/// FAST circle of radius 3 (16 pixels, clockwise from 12 o'clock)
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required by the segment test
const ARC_LENGTH: usize = 9;

/// Descriptor-producing feature detector
///
/// The engine treats detectors as black boxes distinguished only by the
/// descriptor element type they emit.
pub trait FeatureDetector: Send + Sync {
    /// Detect keypoints and compute one descriptor row per keypoint
    ///
    /// Postcondition: `keypoints.len() == descriptors.rows()`.
    fn detect_and_compute(
        &self,
        gray: &[u8],
        width: usize,
        height: usize,
    ) -> Result<(Vec<KeyPoint>, Descriptors)>;

    /// Element type of the emitted descriptors
    fn descriptor_kind(&self) -> DescriptorKind;
}

/// FAST-9 corners + oriented 256-bit binary descriptors
pub struct FastBriefDetector {
    threshold: u8,
    oriented: bool,
    /// 256 point pairs, fixed at construction
    pattern: Vec<((i32, i32), (i32, i32))>,
}

impl FastBriefDetector {
    pub fn new(threshold: u8, oriented: bool) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| {
                let a = (
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                );
                let b = (
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                );
                (a, b)
            })
            .collect();
        Self {
            threshold,
            oriented,
            pattern,
        }
    }

    /// FAST segment test at (x, y); returns the corner score or None
    fn fast_score(&self, gray: &[u8], width: usize, x: usize, y: usize) -> Option<f32> {
        let p = gray[y * width + x] as i32;
        let t = self.threshold as i32;

        let at = |dx: i32, dy: i32| -> i32 {
            gray[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize] as i32
        };

        // Cheap reject on the four compass points
        let compass = [at(0, -3), at(3, 0), at(0, 3), at(-3, 0)];
        let brighter = compass.iter().filter(|&&v| v > p + t).count();
        let darker = compass.iter().filter(|&&v| v < p - t).count();
        if brighter < 3 && darker < 3 {
            return None;
        }

        let ring: Vec<i32> = CIRCLE.iter().map(|&(dx, dy)| at(dx, dy)).collect();

        // Longest circular run of consistently brighter / darker pixels
        let mut best_run = 0usize;
        for &sign in &[1i32, -1i32] {
            let mut run = 0usize;
            let mut max_run = 0usize;
            for i in 0..(16 + ARC_LENGTH) {
                let v = ring[i % 16];
                let exceeds = if sign > 0 { v > p + t } else { v < p - t };
                if exceeds {
                    run += 1;
                    max_run = max_run.max(run);
                } else {
                    run = 0;
                }
            }
            best_run = best_run.max(max_run.min(16));
        }
        if best_run < ARC_LENGTH {
            return None;
        }

        // Score: total contrast beyond the threshold across the ring
        let score: i32 = ring
            .iter()
            .map(|&v| ((v - p).abs() - t).max(0))
            .sum();
        Some(score as f32)
    }

    /// Intensity-centroid orientation in radians
    fn orientation(&self, gray: &[u8], width: usize, x: usize, y: usize) -> f32 {
        const R: i32 = 7;
        let mut m10 = 0.0f32;
        let mut m01 = 0.0f32;
        for dy in -R..=R {
            for dx in -R..=R {
                if dx * dx + dy * dy > R * R {
                    continue;
                }
                let v = gray[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize] as f32;
                m10 += dx as f32 * v;
                m01 += dy as f32 * v;
            }
        }
        m01.atan2(m10)
    }

    /// 32-byte descriptor for a keypoint, pattern steered by `angle`
    fn describe(
        &self,
        gray: &[u8],
        width: usize,
        x: usize,
        y: usize,
        angle: f32,
        out: &mut [u8],
    ) {
        let (sin, cos) = if self.oriented {
            angle.sin_cos()
        } else {
            (0.0, 1.0)
        };
        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (cos * dx as f32 - sin * dy as f32).round() as i32;
            let ry = (sin * dx as f32 + cos * dy as f32).round() as i32;
            gray[(y as i32 + ry) as usize * width + (x as i32 + rx) as usize]
        };
        out.fill(0);
        for (bit, &((ax, ay), (bx, by))) in self.pattern.iter().enumerate() {
            if sample(ax, ay) < sample(bx, by) {
                out[bit / 8] |= 1 << (bit % 8);
            }
        }
    }
}

impl FeatureDetector for FastBriefDetector {
    fn detect_and_compute(
        &self,
        gray: &[u8],
        width: usize,
        height: usize,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        if gray.len() != width * height {
            return Err(VisionError::Core(
                artrack_core::CoreError::PixelBufferMismatch {
                    expected: width * height,
                    actual: gray.len(),
                },
            ));
        }
        if width <= 2 * DESCRIPTOR_BORDER || height <= 2 * DESCRIPTOR_BORDER {
            return Ok((
                Vec::new(),
                Descriptors::empty(DescriptorKind::Binary, DESCRIPTOR_BITS / 8),
            ));
        }

        // Corner scores inside the descriptor-safe border
        let mut scores = vec![0.0f32; width * height];
        for y in DESCRIPTOR_BORDER..height - DESCRIPTOR_BORDER {
            for x in DESCRIPTOR_BORDER..width - DESCRIPTOR_BORDER {
                if let Some(score) = self.fast_score(gray, width, x, y) {
                    scores[y * width + x] = score;
                }
            }
        }

        // 3x3 non-maximum suppression, then describe survivors
        let mut keypoints = Vec::new();
        let mut descriptors = Descriptors::empty(DescriptorKind::Binary, DESCRIPTOR_BITS / 8);
        let mut row = vec![0u8; DESCRIPTOR_BITS / 8];

        for y in DESCRIPTOR_BORDER..height - DESCRIPTOR_BORDER {
            for x in DESCRIPTOR_BORDER..width - DESCRIPTOR_BORDER {
                let s = scores[y * width + x];
                if s <= 0.0 {
                    continue;
                }
                let mut is_max = true;
                'nms: for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let n = scores[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize];
                        if n > s || (n == s && (dy < 0 || (dy == 0 && dx < 0))) {
                            is_max = false;
                            break 'nms;
                        }
                    }
                }
                if !is_max {
                    continue;
                }

                let angle = if self.oriented {
                    self.orientation(gray, width, x, y)
                } else {
                    0.0
                };
                self.describe(gray, width, x, y, angle, &mut row);

                keypoints.push(KeyPoint {
                    pt: artrack_core::Point2f::new(x as f32, y as f32),
                    response: s,
                    size: (2 * PATTERN_RADIUS) as f32,
                    angle,
                    octave: 0,
                });
                let src = Descriptors::binary(1, DESCRIPTOR_BITS / 8, row.clone())
                    .expect("row shape is fixed");
                descriptors.push_row_from(&src, 0).expect("same shape");
            }
        }

        tracing::trace!(
            count = keypoints.len(),
            width,
            height,
            "fast-brief detection"
        );
        Ok((keypoints, descriptors))
    }

    fn descriptor_kind(&self) -> DescriptorKind {
        DescriptorKind::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgproc::gaussian_blur;
    use artrack_core::hamming_distance;

    /// Deterministic high-contrast texture: random 4-px blocks, lightly
    /// blurred
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
        gaussian_blur(&src, width, height, 3, 0.8, &mut img).unwrap();
        img
    }

    #[test]
    fn test_detects_corners_on_texture() {
        let img = noise_image(128, 128, 99);
        let det = FastBriefDetector::new(20, true);
        let (kps, desc) = det.detect_and_compute(&img, 128, 128).unwrap();
        assert!(kps.len() >= 50, "only {} keypoints", kps.len());
        assert_eq!(kps.len(), desc.rows());
        assert_eq!(desc.cols(), 32);
    }

    #[test]
    fn test_no_corners_on_flat_image() {
        let img = vec![128u8; 128 * 128];
        let det = FastBriefDetector::new(20, true);
        let (kps, desc) = det.detect_and_compute(&img, 128, 128).unwrap();
        assert!(kps.is_empty());
        assert!(desc.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let img = noise_image(96, 96, 7);
        let det = FastBriefDetector::new(20, true);
        let (kps_a, desc_a) = det.detect_and_compute(&img, 96, 96).unwrap();
        let (kps_b, desc_b) = det.detect_and_compute(&img, 96, 96).unwrap();
        assert_eq!(kps_a.len(), kps_b.len());
        assert_eq!(desc_a, desc_b);
    }

    #[test]
    fn test_keypoints_respect_border() {
        let img = noise_image(128, 128, 3);
        let det = FastBriefDetector::new(20, true);
        let (kps, _) = det.detect_and_compute(&img, 128, 128).unwrap();
        for kp in &kps {
            assert!(kp.pt.x >= DESCRIPTOR_BORDER as f32);
            assert!(kp.pt.x < (128 - DESCRIPTOR_BORDER) as f32);
            assert!(kp.pt.y >= DESCRIPTOR_BORDER as f32);
            assert!(kp.pt.y < (128 - DESCRIPTOR_BORDER) as f32);
        }
    }

    #[test]
    fn test_identical_patches_match() {
        // Same image content at two offsets: descriptors at matching
        // keypoints should be near-identical
        let img = noise_image(128, 128, 42);
        let det = FastBriefDetector::new(20, true);
        let (kps, desc) = det.detect_and_compute(&img, 128, 128).unwrap();
        let (kps2, desc2) = det.detect_and_compute(&img, 128, 128).unwrap();
        assert_eq!(kps.len(), kps2.len());
        for i in 0..kps.len() {
            assert_eq!(hamming_distance(desc.binary_row(i), desc2.binary_row(i)), 0);
        }
    }

    #[test]
    fn test_small_image_yields_empty_set() {
        let img = vec![0u8; 20 * 20];
        let det = FastBriefDetector::new(20, true);
        let (kps, _) = det.detect_and_compute(&img, 20, 20).unwrap();
        assert!(kps.is_empty());
    }
}
