//! Brute-force KNN descriptor matching
//!
//! Hamming distance for binary descriptors, L2 for float. Per-query
//! candidate lists come back sorted by ascending distance.

use crate::error::{Result, VisionError};
use artrack_core::{hamming_distance, l2_squared, Descriptors};

/// One descriptor correspondence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DMatch {
    /// Row in the query matrix
    pub query_idx: usize,
    /// Row in the train matrix
    pub train_idx: usize,
    /// Hamming distance (binary) or L2 distance (float)
    pub distance: f32,
}

/// K-nearest-neighbour match of every query row against all train rows
///
/// Returns one candidate list per query row, each sorted by ascending
/// distance and holding at most `k` entries (fewer when the train set is
/// small). Empty train sets produce empty candidate lists.
pub fn knn_match(query: &Descriptors, train: &Descriptors, k: usize) -> Result<Vec<Vec<DMatch>>> {
    if query.kind() != train.kind() || query.cols() != train.cols() {
        return Err(VisionError::KindMismatch {
            query: format!("{:?} cols={}", query.kind(), query.cols()),
            train: format!("{:?} cols={}", train.kind(), train.cols()),
        });
    }
    if k == 0 {
        return Ok(vec![Vec::new(); query.rows()]);
    }

    let mut all = Vec::with_capacity(query.rows());
    for qi in 0..query.rows() {
        // Running top-k, kept sorted; train sets are small enough that an
        // insertion pass beats a heap
        let mut best: Vec<DMatch> = Vec::with_capacity(k + 1);
        for ti in 0..train.rows() {
            let distance = match query {
                Descriptors::Binary { .. } => {
                    hamming_distance(query.binary_row(qi), train.binary_row(ti)) as f32
                }
                Descriptors::Float { .. } => {
                    l2_squared(query.float_row(qi), train.float_row(ti)).sqrt()
                }
            };
            if best.len() == k && distance >= best[k - 1].distance {
                continue;
            }
            let pos = best
                .partition_point(|m| m.distance <= distance);
            best.insert(
                pos,
                DMatch {
                    query_idx: qi,
                    train_idx: ti,
                    distance,
                },
            );
            best.truncate(k);
        }
        all.push(best);
    }
    Ok(all)
}
