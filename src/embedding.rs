//! Embedder abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]** — returns errors; used when embeddings are not configured.
//! - **[`RemoteEmbedder`]** — calls an OpenAI-compatible embeddings endpoint
//!   with batching, retry, and backoff.
//!
//! [`CachedEmbedder`] wraps any embedder with the shared [`EmbeddingCache`]:
//! every text is looked up in the cache before the batch call, and every
//! embedder result is unit-normalized before it is stored or returned. Both
//! the indexer and the search engine embed exclusively through it.
//!
//! # Retry Strategy
//!
//! The remote embedder uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff doubles per retry (1s, 2s, 4s, ...), capped at 32s

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// An embedding backend with a fixed output dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one output vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }

    /// The dimensionality of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// Release backing resources.
    fn close(&self) {}
}

/// Normalize a vector to unit L2 length in place. Zero vectors are left
/// unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths. For
/// unit vectors this equals the dot product.
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

// ============ Disabled embedder ============

/// A no-op embedder that always returns errors.
///
/// Used when `embedding.provider = "disabled"`. Keyword-only operation still
/// works; any attempt to embed fails with a descriptive error, which the
/// search engine reports as a semantic-side warning.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding("embedding provider is disabled".to_string()))
    }

    fn dimensions(&self) -> usize {
        0
    }
}

// ============ Remote embedder ============

/// Embedder backed by an OpenAI-compatible `POST /v1/embeddings` endpoint.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct RemoteEmbedder {
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl RemoteEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Validation("embedding.model required for remote provider".to_string()))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::Validation("embedding.dims required for remote provider".to_string()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Embedding(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            dims,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Embedding("OPENAI_API_KEY not set".to_string()))?;

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

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", api_key))
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
                            .map_err(|e| Error::Embedding(e.to_string()))?;
                        return parse_embedding_response(&json, self.dims);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::Embedding(format!(
                            "embedding API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::Embedding(format!(
                        "embedding API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Embedding("embedding failed after retries".to_string())))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Parse an OpenAI-style embeddings response, enforcing the configured
/// dimensionality on every vector.
fn parse_embedding_response(json: &serde_json::Value, dims: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::Embedding("invalid response: missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Embedding("invalid response: missing embedding".to_string()))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vec.len() != dims {
            return Err(Error::Embedding(format!(
                "embedder returned dimension {} but {} was configured",
                vec.len(),
                dims
            )));
        }

        embeddings.push(vec);
    }

    Ok(embeddings)
}

/// Create the appropriate [`Embedder`] based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "remote" => Ok(Arc::new(RemoteEmbedder::new(config)?)),
        other => Err(Error::Validation(format!("unknown embedding provider: {}", other))),
    }
}

// ============ Cached embedder ============

/// The embedding entry point shared by the indexer and the search engine.
///
/// Checks the cache per text before calling the inner embedder for the
/// misses in one batch, unit-normalizes every embedder result, and caches
/// it under the original text.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))
    }

    /// Embed a batch of texts, consulting the cache per text before calling
    /// the inner embedder for the misses.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(vector) => out.push(Some(vector)),
                None => {
                    out.push(None);
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let embedded = self.inner.embed_batch(&miss_texts).await?;
            if embedded.len() != miss_texts.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    miss_texts.len()
                )));
            }
            for (slot, (text, mut vector)) in miss_indices
                .into_iter()
                .zip(miss_texts.into_iter().zip(embedded.into_iter()))
            {
                l2_normalize(&mut vector);
                self.cache.put(text, vector.clone());
                out[slot] = Some(vector);
            }
        }

        Ok(out.into_iter().map(|v| v.expect("all slots filled")).collect())
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder for tests: a unit vector derived from the
    /// text's bytes, plus a call counter to observe cache behavior.
    struct CountingEmbedder {
        dims: usize,
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; self.dims];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dims] += b as f32;
                    }
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            self.dims
        }
    }

    fn cached(dims: usize, capacity: usize) -> (CachedEmbedder, Arc<CountingEmbedder>) {
        let inner = Arc::new(CountingEmbedder::new(dims));
        let embedder = CachedEmbedder::new(
            Arc::clone(&inner) as Arc<dyn Embedder>,
            Arc::new(EmbeddingCache::new(capacity)),
        );
        (embedder, inner)
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn embed_is_deterministic_and_batch_matches_single() {
        let (embedder, _) = cached(8, 16);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];

        let batch = embedder.embed_batch(&texts).await.unwrap();
        for (text, expected) in texts.iter().zip(batch.iter()) {
            let single = embedder.embed(text).await.unwrap();
            assert_eq!(&single, expected);
        }

        let again = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch, again);
    }

    #[tokio::test]
    async fn cached_embedder_normalizes_output() {
        let (embedder, _) = cached(8, 16);
        let v = embedder.embed("some text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn cache_prevents_redundant_embedder_calls() {
        let (embedder, inner) = cached(8, 16);
        embedder.embed("query").await.unwrap();
        embedder.embed("query").await.unwrap();
        embedder.embed("query").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_only_embeds_misses() {
        let (embedder, inner) = cached(8, 16);
        embedder.embed("a").await.unwrap();
        // "a" is cached; only one more inner call for the two misses.
        embedder
            .embed_batch(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_embedder_errors() {
        let err = DisabledEmbedder.embed("x").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
