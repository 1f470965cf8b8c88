//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two concrete providers:
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible embeddings API
//!   with batching, retry, and exponential backoff.
//! - **[`HashEmbedder`]** — deterministic vectors derived from the text's
//!   SHA-256 digest; no network, used for tests and offline runs.
//!
//! The trait is object-safe and `Send + Sync`: the ingestion controller
//! and the query surface share one provider instance across concurrent
//! tool invocations.
//!
//! # Retry Strategy
//!
//! The HTTP provider retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! All failures surface as [`VaultError::EmbeddingFailure`], which is
//! retryable at the tool surface.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{Result, VaultError};

/// A pure function from text to a fixed-length dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Instantiate the provider selected by configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        other => Err(VaultError::InvalidInput(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

// ============ OpenAI-compatible provider ============

/// Embedding provider for an OpenAI-compatible `/v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_url: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            VaultError::InvalidInput("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| VaultError::EmbeddingFailure(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(&self.api_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| VaultError::EmbeddingFailure(e.to_string()))?;
                        return parse_embeddings_response(&json);
                    }

                    // Rate limited or server error: retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(VaultError::EmbeddingFailure(format!(
                            "embeddings API error {status}: {body_text}"
                        )));
                        continue;
                    }

                    // Client error (not 429): fail immediately.
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(VaultError::EmbeddingFailure(format!(
                        "embeddings API error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(VaultError::EmbeddingFailure(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| VaultError::EmbeddingFailure("embedding failed after retries".into())))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            VaultError::EmbeddingFailure("invalid embeddings response: missing data array".into())
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                VaultError::EmbeddingFailure("invalid embeddings response: missing embedding".into())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

// ============ Deterministic hashing provider ============

/// Deterministic embedder that derives a unit vector from the SHA-256
/// digest of each text. Identical texts map to identical vectors, so
/// exact-duplicate behavior is exercisable without a model; there is no
/// semantic signal.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut vec = Vec::with_capacity(self.dims);
            let mut counter: u32 = 0;
            while vec.len() < self.dims {
                let mut hasher = Sha256::new();
                hasher.update(text.as_bytes());
                hasher.update(counter.to_le_bytes());
                let digest = hasher.finalize();
                for pair in digest.chunks(2) {
                    if vec.len() >= self.dims {
                        break;
                    }
                    let raw = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                    vec.push(raw / u16::MAX as f32 - 0.5);
                }
                counter += 1;
            }
            let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > f32::EPSILON {
                for x in &mut vec {
                    *x /= norm;
                }
            }
            out.push(vec);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_deterministic() {
        let e = HashEmbedder::new(16);
        let a = e.embed(&["hello".to_string()]).await.unwrap();
        let b = e.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn hash_embedder_distinguishes_texts() {
        let e = HashEmbedder::new(16);
        let v = e
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_ne!(v[0], v[1]);
    }

    #[tokio::test]
    async fn hash_embedder_unit_norm() {
        let e = HashEmbedder::new(32);
        let v = e.embed(&["text".to_string()]).await.unwrap();
        let norm: f32 = v[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn parse_embeddings_response_extracts_vectors() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2]},
                {"embedding": [0.3, 0.4]},
            ]
        });
        let vecs = parse_embeddings_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[1], vec![0.3f32, 0.4f32]);
    }

    #[test]
    fn parse_embeddings_response_rejects_malformed() {
        let err = parse_embeddings_response(&serde_json::json!({})).unwrap_err();
        assert_eq!(err.kind(), "EmbeddingFailure");
    }
}
