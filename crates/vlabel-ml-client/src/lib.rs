//! Pluggable inference and embedding backends.
//!
//! The core depends only on the capability traits here (vector-in,
//! candidates-out), never on a specific model. The bundled implementation
//! talks to a Python ML sidecar over HTTP; swapping in another backend is
//! a matter of implementing `FeatureEmbedder`/`ObjectDetector`.

pub mod backend;
pub mod client;
pub mod error;
pub mod types;

pub use backend::{FeatureEmbedder, ObjectDetector};
pub use client::{MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use types::{Correction, DetectResponse, EmbedResponse};
