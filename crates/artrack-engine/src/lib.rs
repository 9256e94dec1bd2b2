//! artrack-engine: Per-frame orchestration of detection and tracking
//!
//! The engine alternates two modes over a live stream:
//! - Detection frames run the full pipeline: feature extraction,
//!   vocabulary-ranked candidate retrieval, descriptor matching, RANSAC
//!   homography and geometric validation.
//! - Flow frames track each located target with pyramidal Lucas-Kanade,
//!   a forward-backward consistency check and per-corner Kalman smoothing.
//!
//! Per-target failures never cross the frame boundary: a target that is
//! lost goes inactive and the frame continues with the rest.

pub mod engine;
pub mod error;
pub mod matcher;
pub mod store;
pub mod tracker;

pub use self::engine::*;
pub use self::error::*;
pub use self::matcher::*;
pub use self::store::*;
pub use self::tracker::*;
