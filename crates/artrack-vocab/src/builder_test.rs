// Vocabulary builder tests
//
// Adaptive sizing ladder, hierarchical clustering invariants, progress
// reporting and reproducibility.

use super::*;
use artrack_core::DescriptorKind;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

// ============================================================================
// Fixtures
// ============================================================================

/// Descriptors scattered around `clusters` random prototypes
fn clustered_descriptors(n: usize, clusters: usize, seed: u64) -> Descriptors {
    let mut rng = StdRng::seed_from_u64(seed);
    let prototypes: Vec<Vec<u8>> = (0..clusters)
        .map(|_| (0..32).map(|_| rng.gen::<u8>()).collect())
        .collect();
    let mut data = Vec::with_capacity(n * 32);
    for i in 0..n {
        let mut row = prototypes[i % clusters].clone();
        // Flip a few bits so cluster members differ
        for _ in 0..3 {
            let byte = rng.gen_range(0..32);
            let bit = rng.gen_range(0..8);
            row[byte] ^= 1 << bit;
        }
        data.extend_from_slice(&row);
    }
    Descriptors::binary(n, 32, data).unwrap()
}

// ============================================================================
// Adaptive sizing
// ============================================================================

#[test]
fn test_adaptive_small_corpus() {
    let p = adaptive_params(500);
    assert_eq!(p.branch_factor, 10);
    assert_eq!(p.levels, 2);
    // 0.15 * 500 = 75 words, floored at 64
    assert_eq!(p.target_vocab, 75);
}

#[test]
fn test_adaptive_floor_at_64() {
    let p = adaptive_params(100);
    assert_eq!(p.target_vocab, 64);
    assert!(p.levels >= 2);
}

#[test]
fn test_adaptive_mid_corpus() {
    let p = adaptive_params(5_000);
    assert_eq!(p.branch_factor, 8);
    // 8^3 = 512, under 0.15 * 5000 = 750
    assert_eq!(p.target_vocab, 512);
    assert_eq!(p.levels, 3);
}

#[test]
fn test_adaptive_large_corpus_capped() {
    let p = adaptive_params(100_000);
    assert_eq!(p.branch_factor, 10);
    assert_eq!(p.target_vocab, 8_000);
    assert_eq!(p.levels, 3);
}

#[test]
fn test_adaptive_huge_corpus_capped() {
    let p = adaptive_params(500_000);
    assert_eq!(p.target_vocab, 10_000);
    assert_eq!(p.levels, 4);
}

#[test]
fn test_adaptive_levels_never_below_two() {
    for n in [1usize, 10, 64, 100, 999] {
        assert!(adaptive_params(n).levels >= 2, "n = {n}");
    }
}

// ============================================================================
// Building
// ============================================================================

#[test]
fn test_build_empty_pool_rejected() {
    let builder = VocabularyBuilder::new(BuildConfig::default());
    let empty = Descriptors::empty(DescriptorKind::Binary, 32);
    let result = builder.build(&[&empty], None);
    assert!(matches!(result, Err(VocabError::NoDescriptors)));
}

#[test]
fn test_build_mixed_widths_rejected() {
    let builder = VocabularyBuilder::new(BuildConfig::default());
    let a = clustered_descriptors(10, 2, 1);
    let b = Descriptors::binary(2, 64, vec![0u8; 128]).unwrap();
    assert!(builder.build(&[&a, &b], None).is_err());
}

#[test]
fn test_build_tree_invariants() {
    let a = clustered_descriptors(300, 8, 11);
    let b = clustered_descriptors(300, 8, 12);
    let builder = VocabularyBuilder::new(BuildConfig::default());
    let out = builder.build(&[&a, &b], None).unwrap();

    out.tree.validate().unwrap();
    assert!(out.tree.vocab_size >= 2);
    assert_eq!(out.idf.len(), out.tree.vocab_size as usize);
    assert_eq!(out.bows.len(), 2);
    assert_eq!(out.weighted.len(), 2);
    assert!((out.avg_dl - 300.0).abs() < 1e-3);
}

#[test]
fn test_build_bow_counts_sum_to_features() {
    let a = clustered_descriptors(200, 5, 21);
    let builder = VocabularyBuilder::new(BuildConfig::default());
    let out = builder.build(&[&a], None).unwrap();
    let total: u32 = out.bows[0].values().sum();
    assert_eq!(total, 200);
}

#[test]
fn test_build_reproducible_with_seed() {
    let a = clustered_descriptors(400, 6, 31);
    let builder = VocabularyBuilder::new(BuildConfig::default());
    let out1 = builder.build(&[&a], None).unwrap();
    let out2 = builder.build(&[&a], None).unwrap();
    assert_eq!(out1.tree.vocab_size, out2.tree.vocab_size);
    assert_eq!(out1.bows, out2.bows);
    // Quantisation of a probe set is identical too
    let probe = clustered_descriptors(50, 6, 32);
    assert_eq!(out1.tree.quantise(&probe), out2.tree.quantise(&probe));
}

#[test]
fn test_build_respects_overrides() {
    let a = clustered_descriptors(500, 4, 41);
    let config = BuildConfig {
        branch_factor: Some(4),
        levels: Some(3),
        ..Default::default()
    };
    let out = VocabularyBuilder::new(config).build(&[&a], None).unwrap();
    assert_eq!(out.tree.branch_factor, 4);
    assert_eq!(out.tree.levels, 3);
    out.tree.validate().unwrap();
}

#[test]
fn test_build_quantisation_covers_all_targets() {
    // Every word id in a target bow is inside the vocabulary
    let a = clustered_descriptors(250, 7, 51);
    let out = VocabularyBuilder::new(BuildConfig::default())
        .build(&[&a], None)
        .unwrap();
    for &word in out.bows[0].keys() {
        assert!(word < out.tree.vocab_size);
    }
}

#[test]
fn test_idf_zero_for_ubiquitous_word() {
    // One shared prototype in every target: at least one word has df == N
    let a = clustered_descriptors(100, 1, 61);
    let b = clustered_descriptors(100, 1, 61);
    let out = VocabularyBuilder::new(BuildConfig::default())
        .build(&[&a, &b], None)
        .unwrap();
    let min_idf = out.idf.iter().cloned().fold(f32::INFINITY, f32::min);
    assert!(
        min_idf.abs() < 1e-6,
        "expected a zero-idf word, min was {min_idf}"
    );
}

// ============================================================================
// Progress reporting
// ============================================================================

#[test]
fn test_progress_sink_sees_iterations() {
    let a = clustered_descriptors(300, 6, 71);
    let iterations = AtomicUsize::new(0);
    let sink = |event: BuildEvent| {
        if matches!(event, BuildEvent::ClusterIteration { .. }) {
            iterations.fetch_add(1, Ordering::Relaxed);
        }
    };
    VocabularyBuilder::new(BuildConfig::default())
        .build(&[&a], Some(&sink))
        .unwrap();
    assert!(iterations.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_spawn_build_delivers_events_and_result() {
    let a = clustered_descriptors(200, 4, 81);
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = spawn_build(BuildConfig::default(), vec![a], tx);
    let result = handle.join().expect("worker panicked").unwrap();
    assert!(result.tree.vocab_size > 0);

    let events: Vec<BuildEvent> = rx.try_iter().collect();
    assert!(matches!(events.first(), Some(BuildEvent::Started { .. })));
    assert!(matches!(events.last(), Some(BuildEvent::Finished { .. })));
}
