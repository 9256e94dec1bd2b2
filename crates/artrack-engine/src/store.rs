//! Target database: reference features, geometry and BoW per target

use crate::error::{EngineError, Result};
use artrack_core::{Corners, Descriptors, KeyPoint};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One reference target, immutable after insertion
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    /// Reference image dimensions
    pub width: u32,
    pub height: u32,
    /// Keypoints in reference-image pixels, parallel to descriptor rows
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Descriptors,
    /// Reference corners, `[(0,0), (W,0), (W,H), (0,H)]` by construction
    pub corners: Corners,
    /// Sparse word histogram (empty when no vocabulary was built)
    pub bow: BTreeMap<u32, u32>,
}

/// Owns the target database; insertion order is preserved and meaningful
/// (it breaks ranking ties downstream)
#[derive(Default)]
pub struct TargetStore {
    targets: Vec<Arc<Target>>,
}

impl TargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target, validating the keypoint/descriptor parity
    ///
    /// Re-inserting an existing id replaces it in place and releases the
    /// previous entry.
    pub fn add(&mut self, target: Target) -> Result<()> {
        if target.keypoints.len() != target.descriptors.rows() {
            return Err(EngineError::Core(artrack_core::CoreError::shape(
                format!("{} keypoints", target.keypoints.len()),
                format!("{} descriptor rows", target.descriptors.rows()),
            )));
        }
        if target.descriptors.is_empty() {
            return Err(EngineError::Core(artrack_core::CoreError::InvalidInput(
                "target has no descriptors".into(),
            )));
        }
        let target = Arc::new(target);
        if let Some(slot) = self.targets.iter_mut().find(|t| t.id == target.id) {
            *slot = target;
        } else {
            self.targets.push(target);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| t.id != id);
        before != self.targets.len()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn get(&self, id: &str) -> Option<Arc<Target>> {
        self.targets.iter().find(|t| t.id == id).cloned()
    }

    /// Targets in the requested order; ids without an entry are skipped
    pub fn get_batch(&self, ids: &[String]) -> Vec<Arc<Target>> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    /// All targets in insertion order
    pub fn all(&self) -> Vec<Arc<Target>> {
        self.targets.clone()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
