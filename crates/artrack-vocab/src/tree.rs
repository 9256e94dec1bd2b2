//! Vocabulary tree arena and greedy quantisation
//!
//! The tree owns its cluster centers; the flat word list is a derived,
//! ordered view. Nodes live in an arena and link by index, so the
//! structure serializes cleanly and never aliases a shared mutable list.
//!
//! Word numbering: leaves visited in pre-order own contiguous id ranges
//! `[word_offset, word_offset + centers.rows())`; the ranges tile `0..V`
//! with no gaps.

use crate::error::{Result, VocabError};
use artrack_core::{hamming_distance, l2_squared, Descriptors};
use serde::{Deserialize, Serialize};

/// One tree node: `k` cluster centers, child links parallel to centers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabNode {
    /// Depth of the node, root at 0
    pub level: u32,
    /// Cluster centers, one row per surviving sub-cluster
    pub centers: Descriptors,
    /// Child arena indices parallel to `centers`; empty for leaves
    pub children: Vec<usize>,
    /// First global word id owned by this node (leaves only)
    pub word_offset: u32,
    pub is_leaf: bool,
}

/// Hierarchical k-means vocabulary over one descriptor kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyTree {
    /// Node arena; index 0 is the root
    pub nodes: Vec<VocabNode>,
    /// Branching factor the tree was built with
    pub branch_factor: usize,
    /// Depth the tree was built with
    pub levels: usize,
    /// Total vocabulary size V
    pub vocab_size: u32,
}

impl VocabularyTree {
    pub const ROOT: usize = 0;

    /// Nearest center row of `node` to descriptor row `row` of `desc`
    fn nearest_center(&self, node: &VocabNode, desc: &Descriptors, row: usize) -> usize {
        let mut best = 0usize;
        match desc {
            Descriptors::Binary { .. } => {
                let query = desc.binary_row(row);
                let mut best_dist = u32::MAX;
                for c in 0..node.centers.rows() {
                    let d = hamming_distance(query, node.centers.binary_row(c));
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
            }
            Descriptors::Float { .. } => {
                let query = desc.float_row(row);
                let mut best_dist = f32::INFINITY;
                for c in 0..node.centers.rows() {
                    let d = l2_squared(query, node.centers.float_row(c));
                    if d < best_dist {
                        best_dist = d;
                        best = c;
                    }
                }
            }
        }
        best
    }

    /// Quantise one descriptor row to its global word id
    ///
    /// Greedy top-down traversal: at each internal node descend into the
    /// child whose center is nearest; at a leaf the nearest center's local
    /// index offsets into the leaf's word range. `O(d * k * L)` per
    /// descriptor.
    pub fn quantise_row(&self, desc: &Descriptors, row: usize) -> u32 {
        let mut node = &self.nodes[Self::ROOT];
        loop {
            let best = self.nearest_center(node, desc, row);
            if node.is_leaf {
                return node.word_offset + best as u32;
            }
            node = &self.nodes[node.children[best]];
        }
    }

    /// Quantise a whole descriptor matrix into word ids, row by row
    pub fn quantise(&self, desc: &Descriptors) -> Vec<u32> {
        (0..desc.rows()).map(|r| self.quantise_row(desc, r)).collect()
    }

    /// Assign contiguous word offsets to leaves in pre-order and return V
    ///
    /// Called once at the end of a build; re-running is idempotent.
    pub fn assign_word_offsets(&mut self) -> u32 {
        let mut next = 0u32;
        let mut stack = vec![Self::ROOT];
        // Pre-order with children pushed in reverse so they pop in order
        while let Some(idx) = stack.pop() {
            if self.nodes[idx].is_leaf {
                self.nodes[idx].word_offset = next;
                next += self.nodes[idx].centers.rows() as u32;
            } else {
                for &child in self.nodes[idx].children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        self.vocab_size = next;
        next
    }

    /// Leaf arena indices in pre-order
    pub fn leaves_preorder(&self) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(idx) = stack.pop() {
            if self.nodes[idx].is_leaf {
                leaves.push(idx);
            } else {
                for &child in self.nodes[idx].children.iter().rev() {
                    stack.push(child);
                }
            }
        }
        leaves
    }

    /// Check the structural invariants
    ///
    /// - pre-order leaf word ranges tile `0..V` with no gaps
    /// - every internal node has as many children as centers
    /// - child links stay inside the arena
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(VocabError::InvalidTree("empty arena".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf {
                if !node.children.is_empty() {
                    return Err(VocabError::InvalidTree(format!("leaf {i} has children")));
                }
            } else {
                if node.children.len() != node.centers.rows() {
                    return Err(VocabError::InvalidTree(format!(
                        "node {i}: {} children, {} centers",
                        node.children.len(),
                        node.centers.rows()
                    )));
                }
                for &c in &node.children {
                    if c >= self.nodes.len() {
                        return Err(VocabError::InvalidTree(format!(
                            "node {i}: child {c} out of range"
                        )));
                    }
                }
            }
        }
        let mut expected = 0u32;
        for leaf in self.leaves_preorder() {
            let node = &self.nodes[leaf];
            if node.word_offset != expected {
                return Err(VocabError::InvalidTree(format!(
                    "leaf {leaf}: word offset {} but expected {expected}",
                    node.word_offset
                )));
            }
            expected += node.centers.rows() as u32;
        }
        if expected != self.vocab_size {
            return Err(VocabError::InvalidTree(format!(
                "leaf words sum to {expected}, vocab_size says {}",
                self.vocab_size
            )));
        }
        Ok(())
    }
}
