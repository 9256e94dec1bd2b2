//! Error types for matching and engine orchestration

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Source/destination point counts disagree after ratio test: {src} vs {dst}")]
    Inconsistent { src: usize, dst: usize },

    #[error("Too few matches: {got} accepted, {needed} required")]
    InsufficientMatches { got: usize, needed: usize },

    #[error("Homography rejected: {0}")]
    Homography(String),

    #[error("Target lost")]
    TrackingLost,

    #[error(transparent)]
    Core(#[from] artrack_core::CoreError),

    #[error(transparent)]
    Vision(#[from] artrack_vision::VisionError),

    #[error(transparent)]
    Vocab(#[from] artrack_vocab::VocabError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
