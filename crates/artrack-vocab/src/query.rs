//! Online vocabulary queries: frame quantisation and candidate ranking

use crate::tree::VocabularyTree;
use crate::weights::{cosine_similarity, weight_bow};
use artrack_core::{Descriptors, WeightScheme};
use std::collections::BTreeMap;

struct IndexEntry {
    id: String,
    weighted: BTreeMap<u32, f32>,
}

/// Ranked retrieval over target weighted vectors
///
/// Holds the tree, IDF table and every target's weighted vector. Frames
/// are quantised through the tree, re-weighted with the scheme (and
/// `avg_dl`) the targets were built with, and ranked by cosine
/// similarity. Ties rank by insertion order.
pub struct VocabularyIndex {
    tree: VocabularyTree,
    idf: Vec<f32>,
    avg_dl: f32,
    scheme: WeightScheme,
    entries: Vec<IndexEntry>,
}

impl VocabularyIndex {
    pub fn new(tree: VocabularyTree, idf: Vec<f32>, avg_dl: f32, scheme: WeightScheme) -> Self {
        Self {
            tree,
            idf,
            avg_dl,
            scheme,
            entries: Vec::new(),
        }
    }

    pub fn tree(&self) -> &VocabularyTree {
        &self.tree
    }

    pub fn idf(&self) -> &[f32] {
        &self.idf
    }

    pub fn avg_dl(&self) -> f32 {
        self.avg_dl
    }

    pub fn scheme(&self) -> WeightScheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a target's weighted vector
    ///
    /// Re-inserting an id replaces its vector in place, keeping the
    /// original insertion position (and so its tie-ranking).
    pub fn insert(&mut self, id: impl Into<String>, weighted: BTreeMap<u32, f32>) {
        let id = id.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.weighted = weighted;
        } else {
            self.entries.push(IndexEntry { id, weighted });
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Quantise a frame's descriptors into a word histogram
    pub fn frame_bow(&self, descriptors: &Descriptors) -> BTreeMap<u32, u32> {
        let mut bow = BTreeMap::new();
        for word in self.tree.quantise(descriptors) {
            *bow.entry(word).or_insert(0u32) += 1;
        }
        bow
    }

    /// Top-`max_candidates` target ids by cosine similarity to the frame
    ///
    /// Deterministic: equal similarities order by insertion.
    pub fn query_candidates(
        &self,
        descriptors: &Descriptors,
        max_candidates: usize,
    ) -> Vec<(String, f32)> {
        if descriptors.is_empty() || self.entries.is_empty() || max_candidates == 0 {
            return Vec::new();
        }
        let bow = self.frame_bow(descriptors);
        let frame_weighted = weight_bow(
            &bow,
            &self.idf,
            self.scheme,
            descriptors.rows(),
            self.avg_dl,
        );

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&frame_weighted, &e.weighted)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(max_candidates);

        scored
            .into_iter()
            .map(|(i, sim)| (self.entries[i].id.clone(), sim))
            .collect()
    }
}
