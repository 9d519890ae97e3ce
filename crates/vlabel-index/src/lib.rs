//! Frame similarity index.
//!
//! Builds a pairwise-distance structure over a video's frame embeddings and
//! answers most/least-similar queries against it. Indexes are rebuilt
//! wholesale whenever a video's frame set or embeddings change and swapped
//! atomically into the registry; readers never observe a partial build.

pub mod artifact;
pub mod error;
pub mod index;
pub mod registry;

pub use artifact::{FeatureArtifact, SimilarityArtifact};
pub use error::{IndexError, IndexResult};
pub use index::{Metric, SimilarFrame, SimilarityIndex};
pub use registry::IndexRegistry;
