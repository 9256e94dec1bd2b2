// Vocabulary tree tests
//
// Word numbering, greedy quantisation and invariant validation.

use super::*;
use artrack_core::DescriptorKind;

// ============================================================================
// Fixtures
// ============================================================================

/// Binary descriptor row: all-zero except `set` leading 0xFF bytes
fn row(set: usize) -> Vec<u8> {
    let mut r = vec![0u8; 32];
    r[..set].fill(0xFF);
    r
}

/// Two-level tree: root with two leaf children of 2 and 3 words
fn small_tree() -> VocabularyTree {
    let mut tree = VocabularyTree {
        nodes: Vec::new(),
        branch_factor: 2,
        levels: 2,
        vocab_size: 0,
    };
    // Root: centers near "low" (0 bytes set) and "high" (16 bytes set)
    let root_centers =
        Descriptors::binary(2, 32, [row(0), row(16)].concat()).unwrap();
    tree.nodes.push(VocabNode {
        level: 0,
        centers: root_centers,
        children: vec![1, 2],
        word_offset: 0,
        is_leaf: false,
    });
    // Leaf A: words for 0 and 2 bytes set
    tree.nodes.push(VocabNode {
        level: 1,
        centers: Descriptors::binary(2, 32, [row(0), row(2)].concat()).unwrap(),
        children: Vec::new(),
        word_offset: 0,
        is_leaf: true,
    });
    // Leaf B: words for 12, 16, 20 bytes set
    tree.nodes.push(VocabNode {
        level: 1,
        centers: Descriptors::binary(3, 32, [row(12), row(16), row(20)].concat()).unwrap(),
        children: Vec::new(),
        word_offset: 0,
        is_leaf: true,
    });
    tree.assign_word_offsets();
    tree
}

// ============================================================================
// Word numbering
// ============================================================================

#[test]
fn test_word_offsets_contiguous() {
    let tree = small_tree();
    assert_eq!(tree.vocab_size, 5);
    assert_eq!(tree.nodes[1].word_offset, 0);
    assert_eq!(tree.nodes[2].word_offset, 2);
    tree.validate().unwrap();
}

#[test]
fn test_preorder_leaves_cover_vocab() {
    let tree = small_tree();
    let leaves = tree.leaves_preorder();
    let total: usize = leaves.iter().map(|&l| tree.nodes[l].centers.rows()).sum();
    assert_eq!(total as u32, tree.vocab_size);
    // Offsets strictly increase with no gaps
    let mut expected = 0u32;
    for &l in &leaves {
        assert_eq!(tree.nodes[l].word_offset, expected);
        expected += tree.nodes[l].centers.rows() as u32;
    }
}

#[test]
fn test_assign_word_offsets_idempotent() {
    let mut tree = small_tree();
    let v1 = tree.assign_word_offsets();
    let offsets1: Vec<u32> = tree.nodes.iter().map(|n| n.word_offset).collect();
    let v2 = tree.assign_word_offsets();
    let offsets2: Vec<u32> = tree.nodes.iter().map(|n| n.word_offset).collect();
    assert_eq!(v1, v2);
    assert_eq!(offsets1, offsets2);
}

// ============================================================================
// Quantisation
// ============================================================================

#[test]
fn test_quantise_greedy_path() {
    let tree = small_tree();
    // Close to leaf A's second word
    let desc = Descriptors::binary(1, 32, row(2)).unwrap();
    assert_eq!(tree.quantise_row(&desc, 0), 1);
    // Close to leaf B's last word
    let desc = Descriptors::binary(1, 32, row(20)).unwrap();
    assert_eq!(tree.quantise_row(&desc, 0), 4);
}

#[test]
fn test_quantise_word_in_range() {
    let tree = small_tree();
    for set in 0..24 {
        let desc = Descriptors::binary(1, 32, row(set)).unwrap();
        assert!(tree.quantise_row(&desc, 0) < tree.vocab_size);
    }
}

#[test]
fn test_quantise_deterministic() {
    let tree = small_tree();
    let desc = Descriptors::binary(1, 32, row(10)).unwrap();
    let w = tree.quantise_row(&desc, 0);
    for _ in 0..10 {
        assert_eq!(tree.quantise_row(&desc, 0), w);
    }
}

#[test]
fn test_quantise_matrix_matches_rows() {
    let tree = small_tree();
    let data = [row(0), row(13), row(21)].concat();
    let desc = Descriptors::binary(3, 32, data).unwrap();
    let words = tree.quantise(&desc);
    assert_eq!(words.len(), 3);
    for (r, &w) in words.iter().enumerate() {
        assert_eq!(w, tree.quantise_row(&desc, r));
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_rejects_leaf_with_children() {
    let mut tree = small_tree();
    tree.nodes[1].children = vec![2];
    assert!(tree.validate().is_err());
}

#[test]
fn test_validate_rejects_center_child_mismatch() {
    let mut tree = small_tree();
    tree.nodes[0].children.pop();
    assert!(tree.validate().is_err());
}

#[test]
fn test_validate_rejects_bad_vocab_size() {
    let mut tree = small_tree();
    tree.vocab_size = 99;
    assert!(tree.validate().is_err());
}

#[test]
fn test_validate_rejects_empty_arena() {
    let tree = VocabularyTree {
        nodes: Vec::new(),
        branch_factor: 2,
        levels: 2,
        vocab_size: 0,
    };
    assert!(tree.validate().is_err());
}

#[test]
fn test_single_leaf_root() {
    let mut tree = VocabularyTree {
        nodes: vec![VocabNode {
            level: 0,
            centers: Descriptors::binary(2, 32, [row(0), row(8)].concat()).unwrap(),
            children: Vec::new(),
            word_offset: 0,
            is_leaf: true,
        }],
        branch_factor: 10,
        levels: 2,
        vocab_size: 0,
    };
    assert_eq!(tree.assign_word_offsets(), 2);
    tree.validate().unwrap();
    let desc = Descriptors::binary(1, 32, row(8)).unwrap();
    assert_eq!(tree.quantise_row(&desc, 0), 1);
}
