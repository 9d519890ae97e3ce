//! Pairwise similarity structure and queries.

use std::collections::HashSet;
use std::fmt;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IndexError, IndexResult};

/// Fixed seed for the random projection, so that rebuilding an index from
/// the same embeddings yields an identical artifact.
const PROJECTION_SEED: u64 = 0x5eed;

/// Embedding dimensionality above which vectors are projected down before
/// the pairwise matrix is computed.
const REDUCTION_THRESHOLD: usize = 64;

/// Distance metric over the embedding space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Euclidean (L2) distance
    #[default]
    Euclidean,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Euclidean => write!(f, "euclidean"),
            Metric::Cosine => write!(f, "cosine"),
        }
    }
}

impl Metric {
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    // Sentinel (all-zero) vectors sit at the metric's
                    // maximum, past any real pair of directions.
                    return 2.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
        }
    }
}

/// One query result: a frame row and its distance to the query frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarFrame {
    /// Sequence index of the frame within its video
    pub row: usize,
    /// Distance to the query frame (smaller = more similar)
    pub distance: f32,
}

/// Symmetric pairwise-distance structure over a video's frame embeddings,
/// keyed by frame sequence index.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    metric: Metric,
    distances: Array2<f32>,
}

impl SimilarityIndex {
    /// Build an index from one embedding vector per frame, in sequence
    /// order. High-dimensional embeddings are reduced with a seeded random
    /// projection before the pairwise matrix is computed.
    pub fn build(embeddings: &[Vec<f32>], metric: Metric) -> IndexResult<Self> {
        if embeddings.is_empty() {
            return Err(IndexError::EmptyEmbeddings);
        }
        let dim = embeddings[0].len();
        for (row, vector) in embeddings.iter().enumerate() {
            if vector.len() != dim {
                return Err(IndexError::DimensionMismatch {
                    expected: dim,
                    row,
                    actual: vector.len(),
                });
            }
        }

        let reduced;
        let vectors: &[Vec<f32>] = if dim > REDUCTION_THRESHOLD {
            reduced = project(embeddings, dim, REDUCTION_THRESHOLD);
            &reduced
        } else {
            embeddings
        };

        let n = vectors.len();
        let mut distances = Array2::<f32>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let d = metric.distance(&vectors[i], &vectors[j]);
                distances[[i, j]] = d;
                distances[[j, i]] = d;
            }
        }

        debug!(frames = n, dim, %metric, "Built similarity index");
        Ok(Self { metric, distances })
    }

    /// Reconstruct an index from a previously serialized distance matrix.
    pub fn from_matrix(metric: Metric, matrix: Vec<Vec<f32>>) -> IndexResult<Self> {
        let n = matrix.len();
        if n == 0 {
            return Err(IndexError::EmptyEmbeddings);
        }
        let mut distances = Array2::<f32>::zeros((n, n));
        for (i, row) in matrix.iter().enumerate() {
            if row.len() != n {
                return Err(IndexError::DimensionMismatch {
                    expected: n,
                    row: i,
                    actual: row.len(),
                });
            }
            for (j, &d) in row.iter().enumerate() {
                distances[[i, j]] = d;
            }
        }
        Ok(Self { metric, distances })
    }

    /// Number of frames covered by this index.
    pub fn len(&self) -> usize {
        self.distances.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// The full distance matrix, row order == frame sequence order.
    pub fn matrix(&self) -> Vec<Vec<f32>> {
        (0..self.len())
            .map(|i| self.distances.row(i).to_vec())
            .collect()
    }

    /// The `k` frames most similar to `row`, excluding the query frame
    /// itself and every row in `exclude`. Ordered by ascending distance,
    /// ties broken by ascending sequence index.
    pub fn k_most_similar(
        &self,
        row: usize,
        k: usize,
        exclude: &HashSet<usize>,
    ) -> IndexResult<Vec<SimilarFrame>> {
        let mut candidates = self.candidates(row, exclude)?;
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// The `k` frames least similar to `row`, with the same exclusion
    /// rules. Ordered by descending distance, ties broken by ascending
    /// sequence index.
    pub fn k_least_similar(
        &self,
        row: usize,
        k: usize,
        exclude: &HashSet<usize>,
    ) -> IndexResult<Vec<SimilarFrame>> {
        let mut candidates = self.candidates(row, exclude)?;
        candidates.sort_by(|a, b| {
            b.distance
                .partial_cmp(&a.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row.cmp(&b.row))
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    fn candidates(&self, row: usize, exclude: &HashSet<usize>) -> IndexResult<Vec<SimilarFrame>> {
        let n = self.len();
        if row >= n {
            return Err(IndexError::RowOutOfBounds { row, size: n });
        }
        Ok((0..n)
            .filter(|&other| other != row && !exclude.contains(&other))
            .map(|other| SimilarFrame {
                row: other,
                distance: self.distances[[row, other]],
            })
            .collect())
    }
}

/// Seeded random sign projection onto `target` dimensions.
fn project(embeddings: &[Vec<f32>], dim: usize, target: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(PROJECTION_SEED);
    let scale = 1.0 / (target as f32).sqrt();
    let projection: Vec<Vec<f32>> = (0..dim)
        .map(|_| {
            (0..target)
                .map(|_| if rng.random::<bool>() { scale } else { -scale })
                .collect()
        })
        .collect();

    embeddings
        .iter()
        .map(|vector| {
            let mut out = vec![0.0f32; target];
            for (i, &v) in vector.iter().enumerate() {
                if v != 0.0 {
                    for (j, slot) in out.iter_mut().enumerate() {
                        *slot += v * projection[i][j];
                    }
                }
            }
            out
        })
        .collect()
}
