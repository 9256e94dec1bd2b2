// Target store tests

use super::*;
use artrack_core::reference_corners;

// ============================================================================
// Fixtures
// ============================================================================

fn target(id: &str, features: usize) -> Target {
    Target {
        id: id.to_string(),
        width: 128,
        height: 128,
        keypoints: (0..features)
            .map(|i| KeyPoint::new(i as f32, i as f32, 1.0))
            .collect(),
        descriptors: Descriptors::binary(features, 32, vec![0u8; features * 32]).unwrap(),
        corners: reference_corners(128.0, 128.0),
        bow: BTreeMap::new(),
    }
}

// ============================================================================
// Insertion invariants
// ============================================================================

#[test]
fn test_add_and_get() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get("a").is_some());
    assert!(store.get("b").is_none());
}

#[test]
fn test_parity_enforced() {
    let mut store = TargetStore::new();
    let mut bad = target("a", 10);
    bad.keypoints.pop();
    assert!(store.add(bad).is_err());
    assert!(store.is_empty());
}

#[test]
fn test_empty_descriptors_rejected() {
    let mut store = TargetStore::new();
    let mut bad = target("a", 10);
    bad.descriptors = Descriptors::empty(artrack_core::DescriptorKind::Binary, 32);
    bad.keypoints.clear();
    assert!(store.add(bad).is_err());
}

#[test]
fn test_reinsert_replaces() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    store.add(target("a", 20)).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("a").unwrap().keypoints.len(), 20);
}

#[test]
fn test_reinsert_keeps_position() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    store.add(target("b", 10)).unwrap();
    store.add(target("a", 30)).unwrap();
    let all = store.all();
    assert_eq!(all[0].id, "a");
    assert_eq!(all[0].keypoints.len(), 30);
    assert_eq!(all[1].id, "b");
}

// ============================================================================
// Removal and batching
// ============================================================================

#[test]
fn test_remove() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    assert!(store.remove("a"));
    assert!(!store.remove("a"));
    assert!(store.is_empty());
}

#[test]
fn test_clear() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    store.add(target("b", 10)).unwrap();
    store.clear();
    assert!(store.is_empty());
}

#[test]
fn test_batch_order_and_skips() {
    let mut store = TargetStore::new();
    store.add(target("a", 10)).unwrap();
    store.add(target("b", 10)).unwrap();
    store.add(target("c", 10)).unwrap();
    let batch = store.get_batch(&[
        "c".to_string(),
        "missing".to_string(),
        "a".to_string(),
    ]);
    let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "a"]);
}
