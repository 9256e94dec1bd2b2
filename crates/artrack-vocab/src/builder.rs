//! Offline hierarchical k-means vocabulary builder
//!
//! Sizing adapts to the corpus, clustering is seeded and parallel, and
//! every clustering iteration reports to an optional progress sink — the
//! cooperative yield points of a long build. Binary descriptors cluster
//! under Hamming distance with bitwise majority-vote center updates; float
//! descriptors under Euclidean distance with mean updates.

use crate::error::{Result, VocabError};
use crate::tree::{VocabNode, VocabularyTree};
use crate::weights::{compute_idf, document_frequencies, weight_bow};
use artrack_core::{hamming_distance, l2_squared, BuildConfig, Descriptors, WeightScheme};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Iteration cap for internal-node clustering
const MAX_ITERS_INTERNAL: usize = 20;

/// Iteration cap for leaf clustering
const MAX_ITERS_LEAF: usize = 15;

/// Vocabulary dimensions chosen for a corpus size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabParams {
    pub branch_factor: usize,
    pub levels: usize,
    /// Word-count target after caps
    pub target_vocab: usize,
}

/// Adaptive sizing from the total descriptor count
///
/// Applies the corpus-size ladder, then clamps the vocabulary to
/// `[64, 0.15 * total]` and recomputes the depth from the clamped size.
pub fn adaptive_params(total_descriptors: usize) -> VocabParams {
    let (k, mut levels, cap) = match total_descriptors {
        n if n < 1_000 => (10, 2, None),
        n if n < 3_000 => (8, if n < 2_000 { 2 } else { 3 }, None),
        n if n < 10_000 => (8, 3, None),
        n if n < 50_000 => (10, 3, None),
        n if n < 200_000 => (10, 4, Some(8_000)),
        _ => (10, 4, Some(10_000)),
    };

    let mut v = (k as u64).pow(levels as u32).min(usize::MAX as u64) as usize;
    if let Some(cap) = cap {
        v = v.min(cap);
    }
    v = v.min((total_descriptors as f64 * 0.15) as usize);
    v = v.max(64);

    // levels = max(2, floor(log_k v)), computed in integers
    let mut log = 0usize;
    let mut power = 1u64;
    while power * k as u64 <= v as u64 {
        power *= k as u64;
        log += 1;
    }
    levels = log.max(2);

    VocabParams {
        branch_factor: k,
        levels,
        target_vocab: v,
    }
}

/// Progress notification from a running build
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Started {
        total_descriptors: usize,
        sampled: usize,
        branch_factor: usize,
        levels: usize,
    },
    ClusterIteration {
        level: u32,
        iteration: usize,
        changed: usize,
    },
    Finished {
        vocab_size: u32,
    },
}

/// Receiver for build progress; reported after every clustering iteration
pub trait ProgressSink: Sync {
    fn report(&self, event: BuildEvent);
}

impl<F: Fn(BuildEvent) + Sync> ProgressSink for F {
    fn report(&self, event: BuildEvent) {
        self(event)
    }
}

/// Sink forwarding events over a crossbeam channel
pub struct ChannelSink(pub crossbeam_channel::Sender<BuildEvent>);

impl ProgressSink for ChannelSink {
    fn report(&self, event: BuildEvent) {
        // A disconnected receiver just means nobody is watching
        let _ = self.0.send(event);
    }
}

/// Everything a build produces, ready for the store and the index
pub struct VocabularyBuild {
    pub tree: VocabularyTree,
    /// Dense IDF table of length V
    pub idf: Vec<f32>,
    /// Mean descriptor count per target (BM25 document-length norm)
    pub avg_dl: f32,
    /// Weighting scheme the vectors were computed with
    pub weighting: WeightScheme,
    /// Per-target word histograms, parallel to the build input
    pub bows: Vec<BTreeMap<u32, u32>>,
    /// Per-target weighted vectors, parallel to the build input
    pub weighted: Vec<BTreeMap<u32, f32>>,
}

/// Offline vocabulary builder
pub struct VocabularyBuilder {
    config: BuildConfig,
}

struct KmeansOutcome {
    centers: Descriptors,
    assignment: Vec<usize>,
}

impl VocabularyBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Build the vocabulary and per-target vectors
    ///
    /// `targets` holds one descriptor matrix per target; the returned
    /// histogram/vector lists are parallel to it. All matrices must share
    /// one kind and row width.
    pub fn build(
        &self,
        targets: &[&Descriptors],
        sink: Option<&dyn ProgressSink>,
    ) -> Result<VocabularyBuild> {
        let total: usize = targets.iter().map(|d| d.rows()).sum();
        if total == 0 {
            return Err(VocabError::NoDescriptors);
        }
        let kind = targets[0].kind();
        let cols = targets[0].cols();
        for d in targets {
            if d.kind() != kind || d.cols() != cols {
                return Err(VocabError::Core(artrack_core::CoreError::shape(
                    format!("{kind:?} cols={cols}"),
                    format!("{:?} cols={}", d.kind(), d.cols()),
                )));
            }
        }

        // Union pool of every target descriptor
        let mut pool = Descriptors::empty(kind, cols);
        for d in targets {
            for r in 0..d.rows() {
                pool.push_row_from(d, r)?;
            }
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);

        // Uniform subsample without replacement to bound build time
        let sampled: Vec<usize> = if pool.rows() > self.config.max_samples {
            let mut picked =
                rand::seq::index::sample(&mut rng, pool.rows(), self.config.max_samples)
                    .into_vec();
            picked.sort_unstable();
            picked
        } else {
            (0..pool.rows()).collect()
        };

        let mut params = adaptive_params(total);
        if let Some(k) = self.config.branch_factor {
            params.branch_factor = k;
        }
        if let Some(l) = self.config.levels {
            params.levels = l.max(2);
        }

        if let Some(sink) = sink {
            sink.report(BuildEvent::Started {
                total_descriptors: total,
                sampled: sampled.len(),
                branch_factor: params.branch_factor,
                levels: params.levels,
            });
        }
        tracing::info!(
            total,
            sampled = sampled.len(),
            k = params.branch_factor,
            levels = params.levels,
            "vocabulary build started"
        );

        let mut tree = VocabularyTree {
            nodes: Vec::new(),
            branch_factor: params.branch_factor,
            levels: params.levels,
            vocab_size: 0,
        };
        self.build_node(&pool, sampled, 0, &params, &mut tree, &mut rng, sink);
        tree.assign_word_offsets();
        tree.validate()?;

        // Quantise every target through the finished tree
        let bows: Vec<BTreeMap<u32, u32>> = targets
            .iter()
            .map(|d| {
                let mut bow = BTreeMap::new();
                for word in tree.quantise(d) {
                    *bow.entry(word).or_insert(0u32) += 1;
                }
                bow
            })
            .collect();

        let df = document_frequencies(&bows, tree.vocab_size);
        let idf = compute_idf(&df, targets.len());
        let avg_dl =
            targets.iter().map(|d| d.rows() as f32).sum::<f32>() / targets.len() as f32;

        let weighted: Vec<BTreeMap<u32, f32>> = bows
            .iter()
            .zip(targets.iter())
            .map(|(bow, d)| weight_bow(bow, &idf, self.config.weighting, d.rows(), avg_dl))
            .collect();

        if let Some(sink) = sink {
            sink.report(BuildEvent::Finished {
                vocab_size: tree.vocab_size,
            });
        }
        tracing::info!(vocab_size = tree.vocab_size, "vocabulary build finished");

        Ok(VocabularyBuild {
            tree,
            idf,
            avg_dl,
            weighting: self.config.weighting,
            bows,
            weighted,
        })
    }

    /// Recursively cluster `indices` into the arena; returns the node index
    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &self,
        pool: &Descriptors,
        indices: Vec<usize>,
        depth: usize,
        params: &VocabParams,
        tree: &mut VocabularyTree,
        rng: &mut StdRng,
        sink: Option<&dyn ProgressSink>,
    ) -> usize {
        let k = params.branch_factor;
        let node_idx = tree.nodes.len();
        tree.nodes.push(VocabNode {
            level: depth as u32,
            centers: Descriptors::empty(pool.kind(), pool.cols()),
            children: Vec::new(),
            word_offset: 0,
            is_leaf: false,
        });

        let is_leaf = depth == params.levels - 1 || indices.len() < k;
        if is_leaf {
            let want = k.min(indices.len()).max(1);
            let outcome = kmeans(
                pool,
                &indices,
                want,
                MAX_ITERS_LEAF,
                depth as u32,
                rng,
                sink,
            );
            let node = &mut tree.nodes[node_idx];
            node.centers = outcome.centers;
            node.is_leaf = true;
            return node_idx;
        }

        let outcome = kmeans(
            pool,
            &indices,
            k,
            MAX_ITERS_INTERNAL,
            depth as u32,
            rng,
            sink,
        );

        // Partition by nearest center, dropping empty sub-clusters
        let mut partitions: Vec<Vec<usize>> = vec![Vec::new(); outcome.centers.rows()];
        for (&idx, &cluster) in indices.iter().zip(outcome.assignment.iter()) {
            partitions[cluster].push(idx);
        }

        let mut kept_centers: Vec<usize> = Vec::new();
        let mut children = Vec::new();
        for (cluster, part) in partitions.into_iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            kept_centers.push(cluster);
            let child = self.build_node(pool, part, depth + 1, params, tree, rng, sink);
            children.push(child);
        }

        let node_centers = outcome.centers.select_rows(&kept_centers);
        let node = &mut tree.nodes[node_idx];
        node.centers = node_centers;
        node.children = children;
        node_idx
    }
}

/// Seeded k-means over a subset of pool rows
///
/// Termination: assignment churn under `max(1, n/1000)`, diminishing
/// returns (a change count at 95%+ of the previous one after five
/// iterations), or the iteration cap.
fn kmeans(
    pool: &Descriptors,
    indices: &[usize],
    k: usize,
    max_iters: usize,
    level: u32,
    rng: &mut StdRng,
    sink: Option<&dyn ProgressSink>,
) -> KmeansOutcome {
    let n = indices.len();
    debug_assert!(k >= 1 && k <= n.max(1));

    // Initial centers: k distinct points
    let init = rand::seq::index::sample(rng, n, k.min(n));
    let init_rows: Vec<usize> = init.iter().map(|i| indices[i]).collect();
    let mut centers = pool.select_rows(&init_rows);

    let mut assignment = vec![0usize; n];
    let mut prev_changed = n;

    for iteration in 0..max_iters {
        // Parallel assignment to the nearest center
        let new_assignment: Vec<usize> = indices
            .par_iter()
            .map(|&row| nearest_center(pool, row, &centers))
            .collect();

        let changed = new_assignment
            .iter()
            .zip(assignment.iter())
            .filter(|(a, b)| a != b)
            .count();
        let changed = if iteration == 0 { n } else { changed };
        assignment = new_assignment;

        update_centers(pool, indices, &assignment, &mut centers);

        if let Some(sink) = sink {
            sink.report(BuildEvent::ClusterIteration {
                level,
                iteration,
                changed,
            });
        }

        if changed < (n / 1000).max(1) {
            break;
        }
        if iteration >= 5 && changed * 100 >= prev_changed * 95 {
            // Diminishing returns
            break;
        }
        prev_changed = changed;
    }

    KmeansOutcome { centers, assignment }
}

fn nearest_center(pool: &Descriptors, row: usize, centers: &Descriptors) -> usize {
    let mut best = 0usize;
    match pool {
        Descriptors::Binary { .. } => {
            let q = pool.binary_row(row);
            let mut best_dist = u32::MAX;
            for c in 0..centers.rows() {
                let d = hamming_distance(q, centers.binary_row(c));
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
        }
        Descriptors::Float { .. } => {
            let q = pool.float_row(row);
            let mut best_dist = f32::INFINITY;
            for c in 0..centers.rows() {
                let d = l2_squared(q, centers.float_row(c));
                if d < best_dist {
                    best_dist = d;
                    best = c;
                }
            }
        }
    }
    best
}

/// Recompute each center from its assigned members
///
/// Binary: bitwise majority vote, ties to 0. Float: arithmetic mean.
/// Clusters that lost every member keep their previous center.
fn update_centers(
    pool: &Descriptors,
    indices: &[usize],
    assignment: &[usize],
    centers: &mut Descriptors,
) {
    let k = centers.rows();
    match (pool, centers) {
        (Descriptors::Binary { .. }, Descriptors::Binary { cols, data, .. }) => {
            let cols = *cols;
            let mut ones = vec![0u32; k * cols * 8];
            let mut counts = vec![0u32; k];
            for (&row, &cluster) in indices.iter().zip(assignment.iter()) {
                counts[cluster] += 1;
                let bytes = pool.binary_row(row);
                for (byte_idx, &byte) in bytes.iter().enumerate() {
                    for bit in 0..8 {
                        if byte & (1 << bit) != 0 {
                            ones[(cluster * cols + byte_idx) * 8 + bit] += 1;
                        }
                    }
                }
            }
            for cluster in 0..k {
                if counts[cluster] == 0 {
                    continue;
                }
                for byte_idx in 0..cols {
                    let mut byte = 0u8;
                    for bit in 0..8 {
                        let set = ones[(cluster * cols + byte_idx) * 8 + bit];
                        // Majority vote; a tie leaves the bit at 0
                        if set * 2 > counts[cluster] {
                            byte |= 1 << bit;
                        }
                    }
                    data[cluster * cols + byte_idx] = byte;
                }
            }
        }
        (Descriptors::Float { .. }, Descriptors::Float { cols, data, .. }) => {
            let cols = *cols;
            let mut sums = vec![0.0f64; k * cols];
            let mut counts = vec![0u32; k];
            for (&row, &cluster) in indices.iter().zip(assignment.iter()) {
                counts[cluster] += 1;
                for (j, &v) in pool.float_row(row).iter().enumerate() {
                    sums[cluster * cols + j] += v as f64;
                }
            }
            for cluster in 0..k {
                if counts[cluster] == 0 {
                    continue;
                }
                for j in 0..cols {
                    data[cluster * cols + j] =
                        (sums[cluster * cols + j] / counts[cluster] as f64) as f32;
                }
            }
        }
        _ => unreachable!("pool and centers always share a kind"),
    }
}

/// Run a build on a worker thread, streaming progress over a channel
///
/// The engine's hot path stays synchronous; this exists for hosts that
/// want to keep a UI live during long builds.
pub fn spawn_build(
    config: BuildConfig,
    targets: Vec<Descriptors>,
    events: crossbeam_channel::Sender<BuildEvent>,
) -> std::thread::JoinHandle<Result<VocabularyBuild>> {
    std::thread::spawn(move || {
        let builder = VocabularyBuilder::new(config);
        let refs: Vec<&Descriptors> = targets.iter().collect();
        let sink = ChannelSink(events);
        builder.build(&refs, Some(&sink))
    })
}
