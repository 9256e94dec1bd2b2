//! artrack-vision: Image preprocessing and geometric primitives
//!
//! Reference implementations of the primitive contracts the tracking
//! pipeline consumes:
//! - Grayscale conversion, Gaussian blur, CLAHE
//! - FAST-corner detection with an oriented 256-bit binary descriptor,
//!   behind the `FeatureDetector` trait
//! - Brute-force KNN descriptor matching (Hamming / L2)
//! - RANSAC homography estimation with normalized-DLT refinement
//! - Shi-Tomasi corner seeding and pyramidal Lucas-Kanade optical flow
//! - A constant-velocity Kalman filter for corner smoothing
//!
//! Everything here is deterministic: random choices (RANSAC samples, the
//! descriptor test pattern) come from seeded generators.

pub mod detector;
pub mod error;
pub mod extract;
pub mod flow;
pub mod homography;
pub mod imgproc;
pub mod kalman;
pub mod matcher;

pub use self::detector::*;
pub use self::error::*;
pub use self::extract::*;
pub use self::flow::*;
pub use self::homography::*;
pub use self::imgproc::*;
pub use self::kalman::*;
pub use self::matcher::*;
