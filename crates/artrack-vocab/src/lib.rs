//! artrack-vocab: Bag-of-Words vocabulary for planar-target retrieval
//!
//! Offline, a hierarchical k-means tree quantises binary (or float) feature
//! descriptors into a visual vocabulary; each target becomes a sparse
//! word histogram re-weighted by BM25 or TF-IDF. Online, frames are
//! quantised through the same tree and candidate targets ranked by cosine
//! similarity, so descriptor matching only runs against plausible targets.
//!
//! The whole database (tree, IDF table, per-target vectors) serializes to
//! a versioned JSON container guarded by a config signature.

pub mod builder;
pub mod database;
pub mod error;
pub mod query;
pub mod tree;
pub mod weights;

pub use self::builder::*;
pub use self::database::*;
pub use self::error::*;
pub use self::query::*;
pub use self::tree::*;
pub use self::weights::*;
