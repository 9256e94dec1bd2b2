//! artrack-core: Shared types and infrastructure for the artrack planar tracker
//!
//! Foundation layer used by every other artrack crate:
//! - Error taxonomy (`CoreError`) and the crate-wide `Result` alias
//! - Geometry and feature types (keypoints, descriptor matrices, corners)
//! - Fixed configuration records plus the build-critical config signature
//! - Mutex-guarded memory pools with scope-released handles
//! - Per-frame timing and count statistics

pub mod config;
pub mod error;
pub mod pool;
pub mod stats;
pub mod types;

pub use self::config::*;
pub use self::error::*;
pub use self::pool::*;
pub use self::stats::*;
pub use self::types::*;
