use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use doc_search::api;
use doc_search::config::Config;
use doc_search::state::AppState;
use doc_search::watch::DocWatcher;
use doc_search::{rag, watch};

/// Transport-level request body cap.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::from_env();
    if !config.docs_root.is_dir() {
        anyhow::bail!("Corpus root is not a readable directory: {}", config.docs_root.display());
    }
    // Everything downstream (fingerprints, watcher, update targets) works
    // with the absolute form of the root.
    config.docs_root = config.docs_root.canonicalize().with_context(|| {
        format!("Cannot resolve corpus root {}", config.docs_root.display())
    })?;
    tracing::info!("Corpus root: {}", config.docs_root.display());
    tracing::info!("LLM provider: {} ({})", config.llm.provider, config.llm.base_url);

    let state = AppState::new(config.clone())?;

    // Background index sweep; handle keeps it alive for the process.
    let _sweeper = state.docs.spawn_sweeper();

    // Initial vector-store fill, off the startup path.
    let indexing_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = rag::index_corpus(&indexing_state, &indexing_state.config.docs_root).await {
            tracing::error!("Initial corpus indexing failed: {e}");
        }
    });

    let _watcher: Option<DocWatcher> = if config.watch_enabled {
        let reindex_state = state.clone();
        let on_reindex: watch::ReindexCallback = std::sync::Arc::new(move || {
            let state = reindex_state.clone();
            Box::pin(async move {
                if let Err(e) = rag::index_corpus(&state, &state.config.docs_root).await {
                    tracing::error!("Watcher re-index failed: {e}");
                }
            })
        });
        match DocWatcher::spawn(state.clone(), Some(on_reindex)) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!("File watcher disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let app = Router::new()
        .route("/api/search", post(api::search::search))
        .route("/api/answer", post(api::search::answer))
        .route("/api/updates/suggest", post(api::update::suggest))
        .route("/api/updates/apply", post(api::update::apply))
        .route("/api/releases/compare", post(api::admin::compare_releases))
        .route(
            "/api/services/dependencies",
            post(api::admin::service_dependencies),
        )
        .route("/api/refresh", post(api::admin::refresh))
        .route("/healthz", get(api::admin::healthz))
        .route("/metrics", get(api::admin::metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
