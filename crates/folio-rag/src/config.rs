//! Configuration for the retrieval core

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration, injected by the host application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Retrieval and fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Generative backend configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Chunk store configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// Query preprocessing configuration
    #[serde(default)]
    pub query: QueryConfig,
    /// Chat prompt configuration
    #[serde(default)]
    pub chat: ChatConfig,
    /// Image caption workflow configuration
    #[serde(default)]
    pub images: ImageAnalysisConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("failed to read config file: {e}")))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| Error::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.vector_weight < 0.0 || r.bm25_weight < 0.0 {
            return Err(Error::config("fusion weights must be non-negative"));
        }
        if r.vector_weight + r.bm25_weight <= 0.0 {
            return Err(Error::config("at least one fusion weight must be positive"));
        }
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(Error::config("similarity_threshold must be in [0, 1]"));
        }
        if r.match_count == 0 {
            return Err(Error::config("match_count must be at least 1"));
        }
        if self.llm.max_retries == 0 {
            return Err(Error::config("max_retries must be at least 1"));
        }
        if self.llm.retry_delay_base_secs < 0.0 || self.llm.retry_delay_cap_secs < 0.0 {
            return Err(Error::config("retry delays must be non-negative"));
        }
        if self.store.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be positive"));
        }
        Ok(())
    }
}

/// Retrieval and rank-fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for vector matches (0.0-1.0)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Number of candidates returned to the caller
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    /// Weight of the vector ranking in reciprocal rank fusion
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    /// Weight of the keyword ranking in reciprocal rank fusion
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,
    /// Reciprocal-rank-fusion smoothing constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    /// Whether to rescore fused candidates with the LLM
    #[serde(default = "default_rerank")]
    pub rerank: bool,
}

fn default_similarity_threshold() -> f32 {
    0.6
}
fn default_match_count() -> usize {
    8
}
fn default_vector_weight() -> f32 {
    0.7
}
fn default_bm25_weight() -> f32 {
    0.3
}
fn default_rrf_k() -> f32 {
    60.0
}
fn default_rerank() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            match_count: default_match_count(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            rrf_k: default_rrf_k(),
            rerank: default_rerank(),
        }
    }
}

/// Generative backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the generative backend
    #[serde(default)]
    pub api_key: String,
    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Embedding model name
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Text generation model name
    #[serde(default = "default_generate_model")]
    pub generate_model: String,
    /// Vision model name (image + text calls)
    #[serde(default = "default_generate_model")]
    pub vision_model: String,
    /// Embedding vector width
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling parameter
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Maximum output length in tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
    /// Maximum number of attempts per call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in seconds
    #[serde(default = "default_retry_base")]
    pub retry_delay_base_secs: f64,
    /// Backoff delay ceiling in seconds
    #[serde(default = "default_retry_cap")]
    pub retry_delay_cap_secs: f64,
}

fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-004".to_string()
}
fn default_generate_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_embedding_dimensions() -> usize {
    768
}
fn default_temperature() -> f32 {
    0.3
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_output_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> f64 {
    30.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base() -> f64 {
    1.0
}
fn default_retry_cap() -> f64 {
    8.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            embed_model: default_embed_model(),
            generate_model: default_generate_model(),
            vision_model: default_generate_model(),
            embedding_dimensions: default_embedding_dimensions(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_delay_base_secs: default_retry_base(),
            retry_delay_cap_secs: default_retry_cap(),
        }
    }
}

/// Chunk store (PostgREST) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`
    #[serde(default)]
    pub base_url: String,
    /// Service API key
    #[serde(default)]
    pub api_key: String,
    /// Expected embedding vector width
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            embedding_dimensions: default_embedding_dimensions(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Query preprocessing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Language the corpus is indexed in; queries are translated into it
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// ASCII-only words that still signal a non-corpus-language query
    #[serde(default = "default_source_stopwords")]
    pub source_stopwords: Vec<String>,
    /// Maximum length of a translated query in characters
    #[serde(default = "default_max_translated_len")]
    pub max_translated_len: usize,
}

fn default_target_language() -> String {
    "English".to_string()
}

fn default_source_stopwords() -> Vec<String> {
    // Common Turkish question/function words that survive ASCII folding
    ["nedir", "neden", "hangi", "kim", "kac", "ne", "mi", "mu", "icin", "hakkinda"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_translated_len() -> usize {
    200
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            source_stopwords: default_source_stopwords(),
            max_translated_len: default_max_translated_len(),
        }
    }
}

/// Chat prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Character budget for the retrieved-context block of the prompt
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
}

fn default_context_char_budget() -> usize {
    12_000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_char_budget: default_context_char_budget(),
        }
    }
}

/// Image caption workflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysisConfig {
    /// Pause between consecutive caption calls in milliseconds
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Maximum records pulled per batch
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

fn default_batch_delay_ms() -> u64 {
    500
}
fn default_batch_limit() -> usize {
    50
}

impl Default for ImageAnalysisConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: default_batch_delay_ms(),
            batch_limit: default_batch_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.match_count, 8);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.llm.embedding_dimensions, 768);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.images.batch_delay_ms, 500);
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = RagConfig::default();
        config.retrieval.vector_weight = -0.1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_weights() {
        let mut config = RagConfig::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.bm25_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = RagConfig::default();
        config.retrieval.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_retries() {
        let mut config = RagConfig::default();
        config.llm.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [retrieval]
            similarity_threshold = 0.55

            [llm]
            api_key = "k"
        "#;
        let config: RagConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.retrieval.similarity_threshold, 0.55);
        assert_eq!(config.retrieval.vector_weight, 0.7);
        assert_eq!(config.llm.api_key, "k");
        assert_eq!(config.llm.retry_delay_cap_secs, 8.0);
    }
}
