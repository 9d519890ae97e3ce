//! HTTP client for the Python ML sidecar.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, warn};

use vlabel_models::BoxCandidate;

use crate::backend::{FeatureEmbedder, ObjectDetector};
use crate::error::{MlError, MlResult};
use crate::types::{Correction, DetectResponse, EmbedResponse, FineTuneRequest, HealthResponse};

/// Configuration for the ML sidecar client.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of the ML service
    pub base_url: String,
    /// Embedding dimensionality advertised by the service
    pub embedding_dim: usize,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries for retryable failures
    pub max_retries: u32,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            embedding_dim: 512,
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ML_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            embedding_dim: std::env::var("ML_EMBEDDING_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(512),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Client for the Python ML service. Implements both backend traits.
pub struct MlClient {
    http: Client,
    config: MlClientConfig,
}

impl MlClient {
    /// Create a new ML client.
    pub fn new(config: MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MlResult<Self> {
        Self::new(MlClientConfig::from_env())
    }

    /// Check if the ML service is healthy.
    pub async fn health_check(&self) -> MlResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn post_image(&self, endpoint: &str, image: &[u8]) -> MlResult<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        debug!("Posting {} byte image to {}", image.len(), url);

        let image = image.to_vec();
        let response = self
            .with_retry(|| {
                let form = Form::new().part(
                    "image",
                    Part::bytes(image.clone()).file_name("frame.jpg"),
                );
                async {
                    self.http
                        .post(&url)
                        .multipart(form)
                        .send()
                        .await
                        .map_err(MlError::Network)
                }
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MlError::RequestFailed(format!(
                "ML service returned {}: {}",
                status, body
            )));
        }

        Ok(response)
    }

    /// Execute with retry and exponential backoff.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MlError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl FeatureEmbedder for MlClient {
    fn dimension(&self) -> usize {
        self.config.embedding_dim
    }

    async fn embed(&self, image: &[u8]) -> MlResult<Vec<f32>> {
        let response = self.post_image("/embed", image).await?;
        let embed: EmbedResponse = response.json().await?;

        if embed.vector.len() != self.config.embedding_dim {
            return Err(MlError::InvalidResponse(format!(
                "expected {}-dimensional vector, got {}",
                self.config.embedding_dim,
                embed.vector.len()
            )));
        }
        Ok(embed.vector)
    }
}

#[async_trait]
impl ObjectDetector for MlClient {
    async fn detect(&self, image: &[u8]) -> MlResult<Vec<BoxCandidate>> {
        let response = self.post_image("/detect", image).await?;
        let detect: DetectResponse = response.json().await?;
        Ok(detect
            .detections
            .into_iter()
            .map(|d| d.into_candidate())
            .collect())
    }

    async fn fine_tune(&self, corrections: &[Correction]) -> MlResult<()> {
        let url = format!("{}/fine_tune", self.config.base_url);
        let request = FineTuneRequest {
            corrections: corrections.to_vec(),
        };

        let response = self
            .with_retry(|| async {
                self.http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(MlError::Network)
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MlError::RequestFailed(format!(
                "ML service returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MlClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8001");
        assert_eq!(config.embedding_dim, 512);
        assert_eq!(config.max_retries, 2);
    }
}
