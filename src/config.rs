use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the Markdown corpus
    pub docs_root: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Doc index cache TTL in milliseconds
    pub cache_ttl_ms: u64,
    /// Whether the file watcher runs
    pub watch_enabled: bool,
    /// Watcher debounce window per path, in milliseconds
    pub watch_debounce_ms: u64,
    /// Maximum concurrent provider calls
    pub max_concurrency: usize,
    /// LLM provider configuration (embeddings + answer generation)
    pub llm: LlmConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama", "openai", or "hash" (deterministic fallback embedder only)
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for answer generation
    pub generation_model: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub embedding_dim: usize,
    /// Texts per provider call when batching embeddings
    pub embed_batch_size: usize,
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server
/// with a reranker model behind an OpenAI-compatible `/v1/rerank`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Whether reranking runs at all. Disabled means passthrough scores.
    pub enabled: bool,
    /// Base URL for the reranker API. If None, the heuristic scorer is used.
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
    /// How many candidates the reranker keeps.
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docs_root: PathBuf::from("./docs"),
            bind_addr: "127.0.0.1:9100".to_string(),
            cache_ttl_ms: 300_000,
            watch_enabled: true,
            watch_debounce_ms: 1_000,
            max_concurrency: 10,
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            generation_model: "llama3.2".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            api_key: None,
            embedding_dim: 768,
            embed_batch_size: 32,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            model: None,
            timeout_secs: 10,
            top_k: 6,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("DOC_SEARCH_ROOT") {
            config.docs_root = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("DOC_SEARCH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("DOC_SEARCH_CACHE_TTL_MS") {
            if let Ok(v) = val.parse() {
                config.cache_ttl_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DOC_SEARCH_WATCH") {
            config.watch_enabled = val != "0" && !val.eq_ignore_ascii_case("false");
        }
        if let Ok(val) = std::env::var("DOC_SEARCH_DEBOUNCE_MS") {
            if let Ok(v) = val.parse() {
                config.watch_debounce_ms = v;
            }
        }
        if let Ok(val) = std::env::var("DOC_SEARCH_MAX_CONCURRENCY") {
            if let Ok(v) = val.parse() {
                config.max_concurrency = v;
            }
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_GENERATION_MODEL") {
            config.llm.generation_model = model;
        }
        if let Ok(model) = std::env::var("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        if let Ok(dim) = std::env::var("LLM_EMBEDDING_DIM") {
            if let Ok(d) = dim.parse() {
                config.llm.embedding_dim = d;
            }
        }
        if let Ok(val) = std::env::var("LLM_EMBED_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.llm.embed_batch_size = v;
            }
        }

        // Reranker config
        if let Ok(val) = std::env::var("RERANKER_ENABLED") {
            config.reranker.enabled = val != "0" && !val.eq_ignore_ascii_case("false");
        }
        if let Ok(url) = std::env::var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Ok(val) = std::env::var("RERANKER_TIMEOUT_SECS") {
            if let Ok(v) = val.parse::<u64>() {
                config.reranker.timeout_secs = v.min(30); // Cap at 30s
            }
        }
        if let Ok(val) = std::env::var("RERANKER_TOP_K") {
            if let Ok(v) = val.parse() {
                config.reranker.top_k = v;
            }
        }

        config
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn watch_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.watch_debounce_ms)
    }
}
