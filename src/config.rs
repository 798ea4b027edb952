use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, RetrievalError};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Path to the SQLite file holding the persisted chunk records.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Tokens per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Tokens shared between adjacent chunks. Must be < chunk_size.
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
    500
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Final result count (k).
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Minimum hybrid score to keep a result.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Fusion weight for the semantic channel. Must sum to 1 with
    /// `weight_keyword`.
    #[serde(default = "default_weight_semantic")]
    pub weight_semantic: f64,
    /// Fusion weight for the keyword channel.
    #[serde(default = "default_weight_keyword")]
    pub weight_keyword: f64,
    /// Candidates gathered per channel before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Bound on query-time embedding, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            weight_semantic: default_weight_semantic(),
            weight_keyword: default_weight_keyword(),
            candidate_k: default_candidate_k(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_max_results() -> usize {
    10
}
fn default_similarity_threshold() -> f64 {
    0.5
}
fn default_weight_semantic() -> f64 {
    0.7
}
fn default_weight_keyword() -> f64 {
    0.3
}
fn default_candidate_k() -> usize {
    40
}
fn default_query_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"` or `"openai"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Vector width, fixed per index.
    #[serde(default)]
    pub embedding_dimensions: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// In-flight embedding batches during sync.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            embedding_dimensions: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
fn default_concurrency() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    pub filesystem: Option<FilesystemSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RetrievalError::InvalidConfiguration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| RetrievalError::InvalidConfiguration(format!("failed to parse config: {e}")))?;

    validate(&config)?;
    Ok(config)
}

/// Fail fast on malformed settings. Nothing here is silently clamped.
pub fn validate(config: &Config) -> Result<()> {
    let invalid = |msg: String| Err(RetrievalError::InvalidConfiguration(msg));

    if config.chunking.chunk_size == 0 {
        return invalid("chunking.chunk_size must be > 0".into());
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return invalid(format!(
            "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
            config.chunking.chunk_overlap, config.chunking.chunk_size
        ));
    }

    if config.retrieval.max_results == 0 {
        return invalid("retrieval.max_results must be >= 1".into());
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        return invalid("retrieval.similarity_threshold must be in [0.0, 1.0]".into());
    }

    let w_sum = config.retrieval.weight_semantic + config.retrieval.weight_keyword;
    if config.retrieval.weight_semantic < 0.0
        || config.retrieval.weight_keyword < 0.0
        || (w_sum - 1.0).abs() > 1e-6
    {
        return invalid(format!(
            "retrieval.weight_semantic + retrieval.weight_keyword must sum to 1.0 (got {w_sum})"
        ));
    }

    match config.embedding.provider.as_str() {
        "disabled" => {}
        "openai" => {
            match config.embedding.embedding_dimensions {
                None | Some(0) => {
                    return invalid(
                        "embedding.embedding_dimensions must be > 0 when provider is enabled"
                            .into(),
                    )
                }
                Some(_) => {}
            }
            if config.embedding.model.is_none() {
                return invalid("embedding.model must be set when provider is enabled".into());
            }
            if config.embedding.batch_size == 0 {
                return invalid("embedding.batch_size must be >= 1".into());
            }
            if config.embedding.concurrency == 0 {
                return invalid("embedding.concurrency must be >= 1".into());
            }
        }
        other => {
            return invalid(format!(
                "unknown embedding provider '{other}'. Must be disabled or openai."
            ))
        }
    }

    Ok(())
}
