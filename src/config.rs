use anyhow::{Context, Result};
use ragline_core::context::BudgetUnit;
use ragline_core::generation::GenerationOptions;
use ragline_core::index::{HnswParams, IndexKind, IndexOptions, Metric};
use ragline_core::retrieval::{RetrievalParams, TieBreak};
use ragline_core::retry::RetryPolicy;
use ragline_core::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub kind: IndexKind,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: usize,
    #[serde(default = "default_ef_construction")]
    pub hnsw_ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub hnsw_ef_search: usize,
}

fn default_hnsw_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}

impl IndexConfig {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
        }
    }

    pub fn options(&self) -> IndexOptions {
        IndexOptions {
            kind: self.kind,
            metric: self.metric,
            hnsw: self.hnsw_params(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default)]
    pub boundary_tolerance: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
            boundary_tolerance: None,
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,
    #[serde(default)]
    pub max_per_document: Option<usize>,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: None,
            oversample_factor: default_oversample_factor(),
            max_per_document: None,
            tie_break: TieBreak::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_oversample_factor() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default)]
    pub unit: BudgetUnit,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            unit: BudgetUnit::default(),
        }
    }
}

fn default_token_budget() -> usize {
    4000
}

/// `capacity` unset means unbounded; `0` disables caching.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_parallel_batches")]
    pub max_parallel_batches: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_parallel_batches: default_max_parallel_batches(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_parallel_batches() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    2000
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}

impl RetryConfig {
    /// Backoff policy with the given per-attempt timeout.
    pub fn policy(&self, timeout_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            timeout: Some(Duration::from_secs(timeout_secs)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
    ]
}

impl Config {
    /// Core engine parameters derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_max_chars: self.chunking.max_chars,
            chunk_overlap: self.chunking.overlap_chars,
            boundary_tolerance: self.chunking.boundary_tolerance,
            retrieval: RetrievalParams {
                top_k: self.retrieval.top_k,
                score_threshold: self.retrieval.score_threshold,
                oversample_factor: self.retrieval.oversample_factor,
                max_per_document: self.retrieval.max_per_document,
                tie_break: self.retrieval.tie_break,
            },
            token_budget: self.context.token_budget,
            budget_unit: self.context.unit,
            cache_capacity: self.cache.capacity,
            embed_batch_size: self.embedding.batch_size,
            embed_max_parallel_batches: self.embedding.max_parallel_batches,
            embed_retry: self.retry.policy(self.embedding.timeout_secs),
            generation_retry: self.retry.policy(self.generation.timeout_secs),
            generation: GenerationOptions {
                temperature: self.generation.temperature,
                max_output_tokens: self.generation.max_output_tokens,
            },
        }
    }
}

/// Environment variables that override config file values.
///
/// | Variable | Overrides |
/// |----------|-----------|
/// | `VECTOR_STORE_PATH` | `index.path` |
/// | `EMBEDDING_MODEL` | `embedding.model` |
/// | `LLM_MODEL` | `generation.model` |
pub const ENV_OVERRIDES: [&str; 3] = ["VECTOR_STORE_PATH", "EMBEDDING_MODEL", "LLM_MODEL"];

/// Load, apply environment overrides, then validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply [`ENV_OVERRIDES`] using `lookup`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(path) = get("VECTOR_STORE_PATH") {
        config.index.path = PathBuf::from(path);
    }
    if let Some(model) = get("EMBEDDING_MODEL") {
        config.embedding.model = Some(model);
    }
    if let Some(model) = get("LLM_MODEL") {
        config.generation.model = Some(model);
    }
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!(
            "chunking.overlap_chars ({}) must be < chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Retrieval and context
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.oversample_factor < 1 {
        anyhow::bail!("retrieval.oversample_factor must be >= 1");
    }
    if config.retrieval.max_per_document == Some(0) {
        anyhow::bail!("retrieval.max_per_document must be >= 1 when set");
    }
    if let Some(threshold) = config.retrieval.score_threshold {
        if !threshold.is_finite() {
            anyhow::bail!("retrieval.score_threshold must be a finite number");
        }
    }
    if config.context.token_budget == 0 {
        anyhow::bail!("context.token_budget must be > 0");
    }

    // Index
    if config.index.hnsw_m < 2 {
        anyhow::bail!("index.hnsw_m must be >= 2");
    }
    if config.index.hnsw_ef_construction == 0 || config.index.hnsw_ef_search == 0 {
        anyhow::bail!("index.hnsw_ef_construction and index.hnsw_ef_search must be > 0");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.max_parallel_batches == 0 {
        anyhow::bail!("embedding.max_parallel_batches must be > 0");
    }
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
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
        "hash" | "local" => {
            if config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, hash, or local.",
            other
        ),
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "gemini" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, ollama, or gemini.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_output_tokens == 0 {
        anyhow::bail!("generation.max_output_tokens must be > 0");
    }

    // Retry
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        anyhow::bail!("retry.base_delay_ms must be <= retry.max_delay_ms");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[index]\npath = \"data/index.rgl\"\n").unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "hash");
        assert!(!config.generation.is_enabled());
        assert_eq!(config.index.kind, IndexKind::Flat);
        assert_eq!(config.index.metric, Metric::Cosine);

        let engine = config.engine_config();
        assert_eq!(engine.token_budget, 4000);
        assert_eq!(engine.embed_retry.max_retries, 3);
        assert_eq!(engine.generation_retry.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
[index]
path = "idx.rgl"
kind = "hnsw"
metric = "dot"
hnsw_m = 8

[retrieval]
top_k = 3
score_threshold = 0.25
max_per_document = 2
tie_break = "document"

[context]
token_budget = 512
unit = "tokens"

[cache]
capacity = 0

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768
url = "http://localhost:11434"
"#,
        )
        .unwrap();
        assert_eq!(config.index.options().hnsw.m, 8);
        assert_eq!(config.index.kind, IndexKind::Hnsw);
        assert_eq!(config.retrieval.tie_break, TieBreak::Document);
        assert_eq!(config.context.unit, BudgetUnit::Tokens);
        assert_eq!(config.cache.capacity, Some(0));
        assert_eq!(config.engine_config().retrieval.max_per_document, Some(2));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let err = parse("[index]\npath = \"i\"\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_http_provider_requires_model_and_dims() {
        let err = parse("[index]\npath = \"i\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(parse("[index]\npath = \"i\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[index]\npath = \"i\"\n[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_gemini_needs_no_model() {
        let config = parse("[index]\npath = \"i\"\n[generation]\nprovider = \"gemini\"\n").unwrap();
        assert!(config.generation.is_enabled());
        assert!(config.generation.model.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = parse(
            "[index]\npath = \"file.rgl\"\n[embedding]\nmodel = \"from-file\"\n",
        )
        .unwrap();
        apply_env_overrides(&mut config, |name| match name {
            "VECTOR_STORE_PATH" => Some("/srv/ragline/index.rgl".to_string()),
            "LLM_MODEL" => Some("gemini-1.5-flash".to_string()),
            "EMBEDDING_MODEL" => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.index.path, PathBuf::from("/srv/ragline/index.rgl"));
        assert_eq!(config.generation.model.as_deref(), Some("gemini-1.5-flash"));
        assert_eq!(config.embedding.model.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_env_override_satisfies_required_model() {
        let mut config: Config = toml::from_str(
            "[index]\npath = \"i\"\n[generation]\nprovider = \"openai\"\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
        apply_env_overrides(&mut config, |name| {
            (name == "LLM_MODEL").then(|| "gpt-4o-mini".to_string())
        });
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(parse("[index]\npath = \"i\"\n[context]\ntoken_budget = 0\n").is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/ragline.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
