//! Versioned database serialization
//!
//! The on-disk container is JSON: `{ metadata, vocabulary, targets }`.
//! The vocabulary tree serializes as a recursive node
//! `{ level, is_leaf, centers, children }` independent of the in-memory
//! arena layout. Loading re-checks both the schema major version and the
//! 64-bit config signature; either mismatch rejects the cache so the
//! caller rebuilds.

use crate::error::{Result, VocabError};
use crate::tree::{VocabNode, VocabularyTree};
use artrack_core::{DescriptorKind, Descriptors, KeyPoint, WeightScheme, DATABASE_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Build provenance and compatibility gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Schema version, `MAJOR.MINOR.PATCH`
    pub database_version: String,
    /// Stable hash of every build-critical config field
    pub config_signature: u64,
    pub descriptor_kind: DescriptorKind,
    /// Bytes (binary) resp. floats (float) per descriptor row
    pub descriptor_width: usize,
    pub vocab_size: u32,
    pub branch_factor: usize,
    pub levels: usize,
    pub weighting: WeightScheme,
    /// Mean descriptor count per target, needed to re-weight queries
    pub avg_dl: f32,
    pub created_at: DateTime<Utc>,
}

/// Recursive tree node as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedNode {
    pub level: u32,
    pub is_leaf: bool,
    pub centers: Descriptors,
    pub children: Option<Vec<SerializedNode>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularySection {
    pub tree: SerializedNode,
    /// Dense IDF table of length `vocab_size`
    pub idf: Vec<f32>,
}

/// One stored target: features, reference geometry and BoW vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Descriptors,
    /// Sparse word histogram
    pub bow: BTreeMap<u32, u32>,
    /// Sparse weighted vector under `metadata.weighting`
    pub weighted: BTreeMap<u32, f32>,
}

/// Top-level exportable database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub metadata: DatabaseMetadata,
    pub vocabulary: VocabularySection,
    pub targets: Vec<TargetRecord>,
}

fn serialize_subtree(tree: &VocabularyTree, idx: usize) -> SerializedNode {
    let node = &tree.nodes[idx];
    SerializedNode {
        level: node.level,
        is_leaf: node.is_leaf,
        centers: node.centers.clone(),
        children: if node.is_leaf {
            None
        } else {
            Some(
                node.children
                    .iter()
                    .map(|&c| serialize_subtree(tree, c))
                    .collect(),
            )
        },
    }
}

fn rebuild_subtree(node: &SerializedNode, tree: &mut VocabularyTree) -> Result<usize> {
    let idx = tree.nodes.len();
    tree.nodes.push(VocabNode {
        level: node.level,
        centers: node.centers.clone(),
        children: Vec::new(),
        word_offset: 0,
        is_leaf: node.is_leaf,
    });
    if !node.is_leaf {
        let children = node
            .children
            .as_ref()
            .ok_or_else(|| VocabError::InvalidTree("internal node without children".into()))?;
        let mut links = Vec::with_capacity(children.len());
        for child in children {
            links.push(rebuild_subtree(child, tree)?);
        }
        tree.nodes[idx].children = links;
    }
    Ok(idx)
}

impl Database {
    /// Serialize a built tree into the recursive on-disk form
    pub fn serialize_tree(tree: &VocabularyTree) -> SerializedNode {
        serialize_subtree(tree, VocabularyTree::ROOT)
    }

    /// Rebuild the arena from the recursive form
    ///
    /// Word offsets are re-derived from pre-order, which reproduces the
    /// numbering of the original build, then the invariants re-checked.
    pub fn deserialize_tree(
        node: &SerializedNode,
        branch_factor: usize,
        levels: usize,
    ) -> Result<VocabularyTree> {
        let mut tree = VocabularyTree {
            nodes: Vec::new(),
            branch_factor,
            levels,
            vocab_size: 0,
        };
        rebuild_subtree(node, &mut tree)?;
        tree.assign_word_offsets();
        tree.validate()?;
        Ok(tree)
    }

    /// Gate an incoming database against this build's expectations
    ///
    /// Rejects on schema major-version or config-signature mismatch.
    pub fn check_compatibility(&self, expected_signature: u64) -> Result<()> {
        let major = |v: &str| v.split('.').next().map(str::to_owned).unwrap_or_default();
        if major(&self.metadata.database_version) != major(DATABASE_VERSION) {
            return Err(VocabError::DatabaseVersionMismatch {
                expected: format!("schema {DATABASE_VERSION}"),
                actual: format!("schema {}", self.metadata.database_version),
            });
        }
        if self.metadata.config_signature != expected_signature {
            return Err(VocabError::DatabaseVersionMismatch {
                expected: format!("signature {expected_signature:#018x}"),
                actual: format!("signature {:#018x}", self.metadata.config_signature),
            });
        }
        Ok(())
    }

    /// Write the database as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        tracing::info!(path = %path.display(), targets = self.targets.len(), "database saved");
        Ok(())
    }

    /// Read a database and gate it against `expected_signature`
    ///
    /// A `DatabaseVersionMismatch` means the cache must be discarded and
    /// the database rebuilt from the reference images.
    pub fn load(path: &Path, expected_signature: u64) -> Result<Database> {
        let file = File::open(path)?;
        let db: Database = serde_json::from_reader(BufReader::new(file))?;
        db.check_compatibility(expected_signature)?;
        tracing::info!(path = %path.display(), targets = db.targets.len(), "database loaded");
        Ok(db)
    }
}

#[allow(unused_imports, dead_code)]
#[cfg(test)]
mod tests {
    include!("database_test.rs");
}
