// Local Intrinsic Dimensionality Estimator
// Maximum-likelihood LID over k nearest neighbors, plus the single-vector chunk approximation

use thiserror::Error;

/// Floor applied to distances and ratios before taking logs.
const EPS: f64 = 1e-10;
/// Minimum number of synthetic points built from one embedding.
pub const MIN_CHUNKS: usize = 4;
/// Target chunk width when splitting a single embedding.
const CHUNK_WIDTH_HINT: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LidError {
    #[error("need at least {needed} points, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("points have inconsistent dimensions")]
    DimensionMismatch,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("degenerate geometry: {0}")]
    Degenerate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LidEstimate {
    /// Mean of the per-point estimates that were finite and positive.
    pub mean: f64,
    pub valid_points: usize,
    pub total_points: usize,
    /// Neighbors actually used (k clipped to n - 1).
    pub k: usize,
}

/// MLE of local intrinsic dimension for every point of a batch,
/// averaged over points with a usable estimate.
pub fn estimate_batch(points: &[Vec<f64>], k: usize) -> Result<LidEstimate, LidError> {
    let n = points.len();
    if n < 3 {
        return Err(LidError::TooFewPoints { needed: 3, got: n });
    }
    let dim = points[0].len();
    if points.iter().any(|p| p.len() != dim) {
        return Err(LidError::DimensionMismatch);
    }
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(LidError::NonFinite);
    }

    let k = k.min(n - 1);
    if k < 2 {
        return Err(LidError::TooFewPoints { needed: 3, got: n });
    }

    let mut estimates = Vec::with_capacity(n);
    for (i, point) in points.iter().enumerate() {
        let mut distances: Vec<f64> = points
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| euclidean(point, other))
            .collect();
        distances.sort_by(|a, b| a.total_cmp(b));
        distances.truncate(k);

        if let Some(lid) = point_lid(&distances) {
            estimates.push(lid);
        }
    }

    if estimates.is_empty() {
        return Err(LidError::Degenerate(format!(
            "no finite estimate among {} points (all neighbor distances equal)",
            n
        )));
    }

    let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
    Ok(LidEstimate {
        mean,
        valid_points: estimates.len(),
        total_points: n,
        k,
    })
}

/// LID of one embedding. A single vector has no neighbor set, so it is cut
/// into equal-width chunks that are treated as a batch of points.
pub fn estimate_single(vector: &[f32], k: usize) -> Result<LidEstimate, LidError> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(LidError::NonFinite);
    }
    let n_chunks = chunk_count(vector.len(), k);
    let chunk_size = vector.len() / n_chunks;
    if chunk_size == 0 {
        return Err(LidError::TooFewPoints {
            needed: MIN_CHUNKS,
            got: vector.len(),
        });
    }

    let points: Vec<Vec<f64>> = vector
        .chunks_exact(chunk_size)
        .take(n_chunks)
        .map(|chunk| chunk.iter().map(|&v| v as f64).collect())
        .collect();

    estimate_batch(&points, k)
}

pub fn chunk_count(dim: usize, k: usize) -> usize {
    (2 * k).min(dim / CHUNK_WIDTH_HINT).max(MIN_CHUNKS)
}

/// -k / Σ ln(d_i / d_k) over sorted distances. None when the sum vanishes
/// or the result is not a positive finite number.
fn point_lid(sorted: &[f64]) -> Option<f64> {
    let d_k = sorted.last()?.max(EPS);
    let log_sum: f64 = sorted
        .iter()
        .map(|d| (d.max(EPS) / d_k).max(EPS).ln())
        .sum();
    if log_sum == 0.0 {
        return None;
    }
    let lid = -(sorted.len() as f64) / log_sum;
    (lid.is_finite() && lid > 0.0).then_some(lid)
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(dim: usize, phase: f64) -> Vec<f32> {
        (0..dim)
            .map(|i| ((i as f64 * 0.37 + phase).sin() * (1.0 + (i % 7) as f64 * 0.1)) as f32)
            .collect()
    }

    #[test]
    fn test_chunk_count_rules() {
        assert_eq!(chunk_count(768, 20), 40);
        assert_eq!(chunk_count(768, 30), 48);
        assert_eq!(chunk_count(32, 20), 4);
    }

    #[test]
    fn test_single_estimate_is_finite_and_positive() {
        let est = estimate_single(&wave(768, 0.0), 20).unwrap();
        assert!(est.mean.is_finite());
        assert!(est.mean > 0.0);
        assert_eq!(est.total_points, 40);
        assert_eq!(est.k, 20);
    }

    #[test]
    fn test_single_estimate_is_deterministic() {
        let v = wave(768, 1.3);
        assert_eq!(estimate_single(&v, 20), estimate_single(&v, 20));
    }

    #[test]
    fn test_equal_distances_do_not_produce_nan() {
        // Standard basis vectors: every pairwise distance is sqrt(2)
        let points: Vec<Vec<f64>> = (0..6)
            .map(|i| (0..6).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        let err = estimate_batch(&points, 5).unwrap_err();
        assert!(matches!(err, LidError::Degenerate(_)));
    }

    #[test]
    fn test_constant_vector_is_degenerate() {
        let v = vec![0.25f32; 768];
        assert!(matches!(estimate_single(&v, 20), Err(LidError::Degenerate(_))));
    }

    #[test]
    fn test_rejects_non_finite_and_tiny_inputs() {
        let mut v = wave(64, 0.0);
        v[3] = f32::NAN;
        assert_eq!(estimate_single(&v, 20), Err(LidError::NonFinite));
        assert!(matches!(
            estimate_single(&[1.0, 2.0], 20),
            Err(LidError::TooFewPoints { .. })
        ));
    }

    #[test]
    fn test_batch_clips_k_to_available_neighbors() {
        let points: Vec<Vec<f64>> = (0..5)
            .map(|i| vec![i as f64, (i * i) as f64 * 0.5, 1.0 / (i as f64 + 1.0)])
            .collect();
        let est = estimate_batch(&points, 20).unwrap();
        assert_eq!(est.k, 4);
        assert!(est.mean > 0.0);
    }

    #[test]
    fn test_batch_rejects_ragged_points() {
        let points = vec![vec![0.0, 1.0], vec![1.0], vec![2.0, 2.0]];
        assert_eq!(estimate_batch(&points, 2), Err(LidError::DimensionMismatch));
    }
}
