//! Error types for vision primitives

use thiserror::Error;

/// Main error type for vision operations
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Detector returned no features")]
    NoFeatures,

    #[error("Empty image: {width}x{height}")]
    EmptyImage { width: usize, height: usize },

    #[error("Bad kernel: {0}")]
    BadKernel(String),

    #[error("Descriptor kind mismatch: query {query}, train {train}")]
    KindMismatch { query: String, train: String },

    #[error("Homography estimation failed: {0}")]
    Homography(String),

    #[error("Point set too small: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },

    #[error(transparent)]
    Core(#[from] artrack_core::CoreError),
}

pub type Result<T> = std::result::Result<T, VisionError>;
