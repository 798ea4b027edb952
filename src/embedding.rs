//! Embedding service abstraction and the caching, retrying provider.
//!
//! [`EmbeddingService`] is the wire-level contract: one fixed-width vector
//! per input text, order preserved. [`Provider`] wraps a service with the
//! behavior every caller needs:
//!
//! - batching up to the configured batch size
//! - a content-hash cache, so unchanged chunk text is never re-embedded
//! - exponential backoff retry for transient errors (rate limits, network)
//! - immediate failure for persistent errors (auth, malformed requests)
//!
//! Retry exhaustion surfaces [`RetrievalError::EmbeddingUnavailable`];
//! callers degrade (keyword-only queries) or isolate (failed documents
//! during sync) rather than propagate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result, RetrievalError};

/// A remote embedding backend.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality, fixed per index.
    fn dims(&self) -> usize;

    /// Embed one batch. Must return one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;
}

// ============ OpenAI backend ============

/// Embedding service backed by the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable. One call to
/// [`embed`](EmbeddingService::embed) is one HTTP request; retry policy
/// lives in [`Provider`], not here.
pub struct OpenAiService {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiService {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RetrievalError::InvalidConfiguration("embedding.model required for openai".into())
        })?;
        let dims = config.embedding_dimensions.ok_or_else(|| {
            RetrievalError::InvalidConfiguration(
                "embedding.embedding_dimensions required for openai".into(),
            )
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RetrievalError::InvalidConfiguration("OPENAI_API_KEY environment variable not set".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::EmbeddingUnavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAiService {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dims,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
            return parse_response(&json, texts.len());
        }

        let detail = response.text().await.unwrap_or_default();
        match status.as_u16() {
            429 => Err(EmbeddingError::RateLimited),
            401 | 403 => Err(EmbeddingError::Auth(format!("{status}: {detail}"))),
            s if status.is_server_error() => {
                Err(EmbeddingError::Network(format!("{s}: {detail}")))
            }
            _ => Err(EmbeddingError::Malformed(format!("{status}: {detail}"))),
        }
    }
}

/// Extract `data[].embedding` in input order.
fn parse_response(
    json: &serde_json::Value,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Malformed("missing data array".into()))?;

    if data.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbeddingError::Malformed("missing embedding field".into()))?;
        embeddings.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ============ Caching, retrying provider ============

/// The embedding front door used by sync and query.
pub struct Provider {
    service: Box<dyn EmbeddingService>,
    batch_size: usize,
    max_retries: u32,
    cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl Provider {
    pub fn new(service: Box<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
        Self {
            service,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dims(&self) -> usize {
        self.service.dims()
    }

    pub fn model_name(&self) -> &str {
        self.service.model_name()
    }

    /// Embed texts, one vector per input in input order.
    ///
    /// Cached entries are served without a network call. Misses are sent
    /// in batches; transient failures retry with exponential backoff up to
    /// `max_retries`, persistent failures fail immediately.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            for (i, text) in texts.iter().enumerate() {
                match cache.get(&text_hash(text)) {
                    Some(v) => results[i] = Some(v.clone()),
                    None => misses.push(i),
                }
            }
        }

        for batch in misses.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_with_retry(&batch_texts).await?;

            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            for (&i, vector) in batch.iter().zip(vectors.into_iter()) {
                cache.insert(text_hash(&texts[i]), vector.clone());
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::EmbeddingUnavailable("empty response".into()))
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, 8s, ... capped at 32s.
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1).min(5))).await;
            }

            match self.service.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                }
                Err(e) => return Err(RetrievalError::EmbeddingUnavailable(e.to_string())),
            }
        }

        Err(RetrievalError::EmbeddingUnavailable(
            last_err
                .map(|e| format!("retries exhausted: {e}"))
                .unwrap_or_else(|| "retries exhausted".into()),
        ))
    }

    /// Cached vector count, for stats and tests.
    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Build a provider from configuration, `None` when embeddings are
/// disabled.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Provider>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Provider::new(
            Box::new(OpenAiService::new(config)?),
            config,
        ))),
        other => Err(RetrievalError::InvalidConfiguration(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

/// Cache key: SHA-256 of the exact input text.
fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Vector utilities ============

/// Encode a vector as little-endian f32 bytes for SQLite BLOB storage.
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
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]. Returns 0 for empty or mismatched
/// vectors.
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
    dot / denom
}

// ============ Test doubles ============
