//! Configuration parsing and validation.
//!
//! findex is configured via a TOML file (default: `config/findex.toml`).
//! The config defines the three store paths, chunking parameters, retrieval
//! tuning, embedding provider settings, and directory-indexing behavior.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite file holding documents and chunk membership.
    pub metadata_path: PathBuf,
    /// Directory created and owned by the keyword index backend.
    pub keyword_index_dir: PathBuf,
    /// Directory for the vector index snapshot. Unset means the vector
    /// index is in-memory and rebuilt on the next full index run.
    #[serde(default)]
    pub vector_index_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Window size in whitespace-delimited tokens.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Tokens shared between consecutive windows.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    400
}
fn default_chunk_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Semantic weight of the fused score: `(1-alpha)*keyword + alpha*semantic`.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    /// Chunk candidates fetched from each side before fusion.
    #[serde(default = "default_top_k_candidates")]
    pub top_k_candidates: usize,
    /// Result limit used when a query does not set one.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            top_k_candidates: default_top_k_candidates(),
            default_limit: default_limit(),
        }
    }
}

fn default_hybrid_alpha() -> f32 {
    0.5
}
fn default_top_k_candidates() -> usize {
    80
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"remote"` (OpenAI-compatible HTTP endpoint) or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Capacity of the shared text -> vector LRU cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Concurrent per-file indexing tasks during directory indexing.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Extensions (with leading dot) admitted by `index_directory` when the
    /// caller does not pass its own filter.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_allowed_extensions() -> Vec<String> {
    [
        ".txt", ".md", ".rst", ".pdf", ".docx", ".xlsx", ".pptx", ".odt", ".ods", ".odp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.top_k_candidates < 1 {
        anyhow::bail!("retrieval.top_k_candidates must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "remote" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or remote.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.cache_capacity == 0 {
        anyhow::bail!("embedding.cache_capacity must be > 0");
    }

    if config.indexing.max_concurrency == 0 {
        anyhow::bail!("indexing.max_concurrency must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(
            r#"
[storage]
metadata_path = "data/findex.sqlite"
keyword_index_dir = "data/keyword"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.retrieval.top_k_candidates, 80);
        assert!((config.retrieval.hybrid_alpha - 0.5).abs() < 1e-6);
        assert!(!config.embedding.is_enabled());
        assert!(config.storage.vector_index_dir.is_none());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = parse(
            r#"
[storage]
metadata_path = "x.sqlite"
keyword_index_dir = "kw"

[chunking]
chunk_size = 10
chunk_overlap = 10
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn alpha_out_of_range_rejected() {
        let err = parse(
            r#"
[storage]
metadata_path = "x.sqlite"
keyword_index_dir = "kw"

[retrieval]
hybrid_alpha = 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("hybrid_alpha"));
    }

    #[test]
    fn remote_provider_requires_model_and_dims() {
        let err = parse(
            r#"
[storage]
metadata_path = "x.sqlite"
keyword_index_dir = "kw"

[embedding]
provider = "remote"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }
}
