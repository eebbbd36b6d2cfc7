//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait plus concrete backends:
//! - **[`DisabledProvider`]** — always fails; used when embeddings are not
//!   configured.
//! - **[`OpenAiProvider`]** — calls an OpenAI-compatible embeddings endpoint.
//!
//! Providers classify their failures into [`EmbedError`] variants so the
//! batcher can choose a retry policy: HTTP 429 is rate-limited, 5xx and
//! network faults are transient, other client errors are fatal.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// An external embedding backend.
///
/// `embed_batch` is synchronous from the job's point of view: one request,
/// one ordered response. Classification of failures is the provider's job;
/// retry policy is the caller's.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in input
    /// order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// A no-op provider that always returns a fatal error.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Fatal("embedding provider is disabled".into()))
    }
}

/// Provider calling an OpenAI-compatible `POST /embeddings` endpoint.
///
/// Requires the API key in the environment variable named by
/// `config.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EmbedError::Fatal("embedding.model required for openai provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EmbedError::Fatal("embedding.dims required for openai provider".into()))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| EmbedError::Fatal(format!("{} environment variable not set", config.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Fatal(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(e.to_string()))?;

        let status = resp.status();

        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| EmbedError::Transient(e.to_string()))?;
            return parse_embeddings_response(&json);
        }

        let detail = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            Err(EmbedError::RateLimited(format!("{}: {}", status, detail)))
        } else if status.is_server_error() {
            Err(EmbedError::Transient(format!("{}: {}", status, detail)))
        } else {
            Err(EmbedError::Fatal(format!("{}: {}", status, detail)))
        }
    }
}

/// Extract `data[].embedding` arrays from an embeddings API response,
/// ordered by the `index` field so output matches input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Fatal("invalid embeddings response: missing data array".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Fatal("invalid embeddings response: missing embedding".into()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Instantiate the provider named in the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        other => Err(EmbedError::Fatal(format!("unknown embedding provider: {}", other))),
    }
}
