//! Error types for vocabulary building and persistence

use thiserror::Error;

/// Main error type for vocabulary operations
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Build pool is empty: no descriptors to cluster")]
    NoDescriptors,

    #[error("Database version mismatch: expected {expected}, got {actual}")]
    DatabaseVersionMismatch { expected: String, actual: String },

    #[error("Invalid vocabulary tree: {0}")]
    InvalidTree(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] artrack_core::CoreError),
}

pub type Result<T> = std::result::Result<T, VocabError>;
