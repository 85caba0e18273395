use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::docs::index::DocIndexCache;
use crate::error::CoreResult;
use crate::events::EventBus;
use crate::facts::index::FactIndexCache;
use crate::llm::embeddings::Embedder;
use crate::metrics::Metrics;
use crate::models::DocIndex;
use crate::search::cache::QueryCache;
use crate::search::vector::VectorStore;

/// Shared application state. One value, constructed at startup and threaded
/// explicitly; tests build their own per scenario.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub docs: Arc<DocIndexCache>,
    pub facts: Arc<FactIndexCache>,
    pub query_cache: Arc<QueryCache>,
    pub vectors: Arc<VectorStore>,
    pub embedder: Arc<Embedder>,
    pub events: EventBus,
    pub metrics: Arc<Metrics>,
    pub provider_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let embedder = Arc::new(Embedder::new(http_client.clone(), config.llm.clone()));
        let max_concurrency = config.max_concurrency.max(1);

        Ok(Self {
            config,
            http_client,
            docs: Arc::new(DocIndexCache::new()),
            facts: Arc::new(FactIndexCache::new()),
            query_cache: Arc::new(QueryCache::with_defaults()),
            vectors: Arc::new(VectorStore::new()),
            embedder,
            events: EventBus::default(),
            metrics: Arc::new(Metrics::new()),
            provider_semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrency)),
        })
    }

    /// The doc index for `root` under the configured TTL.
    pub fn doc_index(&self, root: &Path) -> CoreResult<Arc<DocIndex>> {
        self.docs.get(root, self.config.cache_ttl(), true)
    }

    /// Invalidate everything derived from `root`: the doc index, the fact
    /// index, and the query-cache entries keyed by the old fingerprint.
    ///
    /// A request that begins after this returns observes a fresh index.
    pub fn invalidate_root(&self, root: &Path) {
        match self.docs.cached_fingerprint(root) {
            Some(fingerprint) => self.query_cache.invalidate_fingerprint(&fingerprint),
            // No cached fingerprint to scope by; drop everything.
            None => self.query_cache.clear(),
        }
        self.docs.invalidate(root);
        self.facts.invalidate(root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_from_default_config() {
        let state = AppState::new(Config::default()).unwrap();
        assert_eq!(state.vectors.stats().count, 0);
        assert_eq!(state.metrics.snapshot().requests, 0);
    }

    #[test]
    fn test_invalidate_root_forces_fresh_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("R1-A.md"), "# H\nX\n").unwrap();

        let mut config = Config::default();
        config.docs_root = dir.path().to_path_buf();
        let state = AppState::new(config).unwrap();

        let first = state.doc_index(dir.path()).unwrap();
        state.invalidate_root(dir.path());
        let second = state.doc_index(dir.path()).unwrap();
        assert!(second.built_at > first.built_at);
    }
}
