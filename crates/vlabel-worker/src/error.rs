//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A submitted batch was rejected without touching stored state.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] vlabel_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] vlabel_storage::StorageError),

    #[error("Datastore error: {0}")]
    Store(#[from] vlabel_store::StoreError),

    #[error("ML backend error: {0}")]
    Ml(#[from] vlabel_ml_client::MlError),

    #[error("Index error: {0}")]
    Index(#[from] vlabel_index::IndexError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(#[from] vlabel_models::UnsupportedFormatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<vlabel_models::GeometryError> for WorkerError {
    fn from(e: vlabel_models::GeometryError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl WorkerError {
    pub fn pipeline_failed(msg: impl Into<String>) -> Self {
        Self::PipelineFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn export_failed(msg: impl Into<String>) -> Self {
        Self::ExportFailed(msg.into())
    }

    /// Whether retrying the operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(_) => true,
            WorkerError::Ml(e) => e.is_retryable(),
            _ => false,
        }
    }
}
