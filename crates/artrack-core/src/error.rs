//! Error types shared across the artrack crates

use thiserror::Error;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Empty image: {width}x{height}")]
    EmptyImage { width: usize, height: usize },

    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    PixelBufferMismatch { expected: usize, actual: usize },

    #[error("Unsupported channel count: {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(usize),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Shorthand for a `ShapeMismatch` built from two described shapes
    pub fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
