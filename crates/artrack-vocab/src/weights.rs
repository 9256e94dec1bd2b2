//! BoW weighting: IDF, TF-IDF, BM25 and sparse cosine similarity

use artrack_core::WeightScheme;
use std::collections::BTreeMap;

/// BM25 term-frequency saturation constant
pub const BM25_K1: f32 = 1.2;

/// BM25 document-length normalization constant
pub const BM25_B: f32 = 0.75;

/// Per-word document frequencies across a target corpus
pub fn document_frequencies(bows: &[BTreeMap<u32, u32>], vocab_size: u32) -> Vec<u32> {
    let mut df = vec![0u32; vocab_size as usize];
    for bow in bows {
        for &word in bow.keys() {
            df[word as usize] += 1;
        }
    }
    df
}

/// `idf[w] = ln((N + 1) / (df[w] + 1))`
///
/// A word present in every document gets exactly 0.
pub fn compute_idf(document_frequency: &[u32], n_targets: usize) -> Vec<f32> {
    document_frequency
        .iter()
        .map(|&df| ((n_targets as f32 + 1.0) / (df as f32 + 1.0)).ln())
        .collect()
}

/// Re-weight a word histogram under the given scheme
///
/// `n_features` is the document length (descriptor count); `avg_dl` the
/// corpus mean, only used by BM25. Targets and queries must share one
/// scheme and one `avg_dl` for their vectors to be comparable.
pub fn weight_bow(
    bow: &BTreeMap<u32, u32>,
    idf: &[f32],
    scheme: WeightScheme,
    n_features: usize,
    avg_dl: f32,
) -> BTreeMap<u32, f32> {
    let mut out = BTreeMap::new();
    if n_features == 0 {
        return out;
    }
    for (&word, &count) in bow {
        let idf_w = idf.get(word as usize).copied().unwrap_or(0.0);
        let score = match scheme {
            WeightScheme::TfIdf => {
                let tf = count as f32 / n_features as f32;
                tf * idf_w
            }
            WeightScheme::Bm25 => {
                let c = count as f32;
                let len_norm = 1.0 - BM25_B + BM25_B * n_features as f32 / avg_dl.max(1e-6);
                idf_w * (c * (BM25_K1 + 1.0)) / (c + BM25_K1 * len_norm)
            }
        };
        if score != 0.0 {
            out.insert(word, score);
        }
    }
    out
}

/// Cosine similarity of two sparse weighted vectors
pub fn cosine_similarity(a: &BTreeMap<u32, f32>, b: &BTreeMap<u32, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    // Walk the smaller map against the larger one
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let mut dot = 0.0f32;
    for (word, &wa) in small {
        if let Some(&wb) = large.get(word) {
            dot += wa * wb;
        }
    }
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a: f32 = a.values().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
