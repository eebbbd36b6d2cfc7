use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the index pair (`<stem>.vec` + `<stem>.meta.json`)
    /// and checkpoint files.
    pub dir: PathBuf,
    #[serde(default = "default_index_stem")]
    pub stem: String,
}

fn default_index_stem() -> String {
    "corpus".to_string()
}

impl IndexConfig {
    pub fn vector_path(&self) -> PathBuf {
        self.dir.join(format!("{}.vec", self.stem))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(format!("{}.meta.json", self.stem))
    }

    pub fn checkpoint_path(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.checkpoint.jsonl", self.stem, job))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_target_tokens() -> usize {
    500
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Token budget for one embedding request batch.
    #[serde(default = "default_batch_token_budget")]
    pub batch_token_budget: usize,
    /// Chunks estimating above this are truncated before embedding.
    #[serde(default = "default_max_single_chunk_tokens")]
    pub max_single_chunk_tokens: usize,
    /// Query texts are truncated to this ceiling before embedding.
    #[serde(default = "default_query_token_ceiling")]
    pub query_token_ceiling: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            batch_token_budget: default_batch_token_budget(),
            max_single_chunk_tokens: default_max_single_chunk_tokens(),
            query_token_ceiling: default_query_token_ceiling(),
            max_retries: default_max_retries(),
            rate_limit_max_retries: default_rate_limit_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_token_budget() -> usize {
    4000
}
fn default_max_single_chunk_tokens() -> usize {
    4500
}
fn default_query_token_ceiling() -> usize {
    7000
}
fn default_max_retries() -> u32 {
    5
}
fn default_rate_limit_max_retries() -> u32 {
    8
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Multiplier applied to the BM25 term before fusing with the vector
    /// similarity. 1.0 reproduces a raw sum of the two scores.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            lexical_weight: default_lexical_weight(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_lexical_weight() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.cs".to_string(),
        "**/*.ts".to_string(),
        "**/*.tsx".to_string(),
        "**/*.js".to_string(),
        "**/*.java".to_string(),
        "**/*.sql".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.target_tokens == 0 {
        anyhow::bail!("chunking.target_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if config.retrieval.lexical_weight < 0.0 {
        anyhow::bail!("retrieval.lexical_weight must be >= 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be 'disabled' or 'openai'.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be set when provider is '{}'",
                config.embedding.provider
            );
        }
        match config.embedding.dims {
            None | Some(0) => anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
            Some(_) => {}
        }
        if config.embedding.batch_token_budget == 0 {
            anyhow::bail!("embedding.batch_token_budget must be > 0");
        }
    }

    Ok(config)
}
