//! Serializable artifact forms of the embedding and similarity data.
//!
//! These are the payloads persisted to object storage (gzipped JSON) so a
//! video's index can be reloaded without re-embedding its frames.

use serde::{Deserialize, Serialize};

use crate::error::IndexResult;
use crate::index::{Metric, SimilarityIndex};

/// Per-frame feature embeddings for one video, in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureArtifact {
    /// Embedding dimensionality
    pub dim: usize,
    /// One vector per frame, row i == frame with sequence index i
    pub vectors: Vec<Vec<f32>>,
}

impl FeatureArtifact {
    pub fn new(dim: usize, vectors: Vec<Vec<f32>>) -> Self {
        Self { dim, vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Persisted form of a [`SimilarityIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityArtifact {
    pub metric: Metric,
    /// Number of frames covered
    pub n: usize,
    /// Symmetric pairwise distance matrix, row order == sequence order
    pub matrix: Vec<Vec<f32>>,
}

impl SimilarityArtifact {
    pub fn from_index(index: &SimilarityIndex) -> Self {
        Self {
            metric: index.metric(),
            n: index.len(),
            matrix: index.matrix(),
        }
    }

    pub fn into_index(self) -> IndexResult<SimilarityIndex> {
        SimilarityIndex::from_matrix(self.metric, self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_artifact_round_trip_preserves_queries() {
        let embeddings = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![5.0, 5.0]];
        let index = SimilarityIndex::build(&embeddings, Metric::Euclidean).unwrap();

        let artifact = SimilarityArtifact::from_index(&index);
        assert_eq!(artifact.n, 3);

        let restored = artifact.into_index().unwrap();
        let before = index.k_most_similar(0, 2, &HashSet::new()).unwrap();
        let after = restored.k_most_similar(0, 2, &HashSet::new()).unwrap();
        assert_eq!(before, after);
    }
}
