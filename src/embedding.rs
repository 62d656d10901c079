//! Embedding oracle abstraction and implementations.
//!
//! Defines the [`EmbeddingOracle`] trait and its implementations:
//! - **[`DisabledEmbedder`]**: returns a configuration error; used when
//!   embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: calls the OpenAI embeddings API under the
//!   shared [`RetryPolicy`].
//!
//! Also provides the vector utilities the stores use:
//! - [`cosine_similarity`] / [`cosine_distance`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → transient, retried
//! - other HTTP 4xx → rejected, not retried
//! - network errors and timeouts → transient, retried

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{FunnelError, Result};
use crate::retry::RetryPolicy;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Maps text to a fixed-length vector.
///
/// Implementations must be deterministic enough that the same text maps
/// to (nearly) the same vector across calls.
#[async_trait]
pub trait EmbeddingOracle: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embedder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingOracle for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(FunnelError::config("embedding provider is disabled"))
    }
}

/// Embedder backed by `POST /v1/embeddings`.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| FunnelError::config("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FunnelError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            retry,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FunnelError::from_http("embedding", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(FunnelError::from_status("embedding", status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FunnelError::from_http("embedding", e))?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingOracle for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.retry.run("embedding", move || self.request(text)).await
    }
}

/// Extract `data[0].embedding` from an embeddings API response.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| FunnelError::malformed("embedding", "missing data[0].embedding"))?;

    let vec: Vec<f32> = embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();

    if vec.is_empty() {
        return Err(FunnelError::malformed("embedding", "empty embedding vector"));
    }
    Ok(vec)
}

/// Build the embedder selected by `embedding.provider`.
pub fn create_embedder(
    config: &EmbeddingConfig,
    retry: RetryPolicy,
) -> Result<Arc<dyn EmbeddingOracle>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config, retry)?)),
        other => Err(FunnelError::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or mismatched lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in `[0.0, 2.0]`. Symmetric in its arguments.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
