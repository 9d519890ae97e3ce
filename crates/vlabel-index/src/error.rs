//! Index error types.

use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Query against a video whose index has not been built yet.
    /// Recoverable: the caller retries after polling preprocessing status.
    #[error("similarity index not ready for video {0}")]
    NotReady(String),

    #[error("embedding set is empty")]
    EmptyEmbeddings,

    #[error("inconsistent embedding dimensions: expected {expected}, row {row} has {actual}")]
    DimensionMismatch {
        expected: usize,
        row: usize,
        actual: usize,
    },

    #[error("frame row {row} out of bounds for index of size {size}")]
    RowOutOfBounds { row: usize, size: usize },
}
