use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error_response;
use crate::metrics::Tool;
use crate::models::{AnswerRequest, RagResponse, SearchRequest, SearchResponse};
use crate::rag;
use crate::search::cache::QueryKey;
use crate::search::lexical;
use crate::state::AppState;

/// Server-side cap on requested result counts.
const MAX_RESULTS_CAP: usize = 50;

const DOCS_NOT_FOUND: &str = "DOCS_NOT_FOUND";

/// Reusable lexical search pipeline: doc index → query cache (singleflight)
/// → lexical scorer. Used by the search handler and the admin operations.
pub async fn run_search(
    state: &AppState,
    req: &SearchRequest,
) -> Result<SearchResponse, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    let max_results = req.max_results.clamp(1, MAX_RESULTS_CAP);

    let index = {
        let state = state.clone();
        tokio::task::spawn_blocking(move || state.doc_index(&state.config.docs_root))
            .await
            .map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Index task failed: {e}"),
                )
            })?
            .map_err(error_response)?
    };

    let key = QueryKey {
        fingerprint: index.fingerprint.clone(),
        query: query.clone(),
        filters: req.filters.clone(),
        max_results: Some(max_results),
    };

    let sections = index.clone();
    let filters = req.filters.clone();
    let scoring_query = query.clone();
    let hits = state
        .query_cache
        .get_or_fetch(&key, || async move {
            Ok(lexical::score_sections(
                &sections.sections,
                &scoring_query,
                &filters,
                max_results,
            ))
        })
        .await
        .map_err(error_response)?;

    let results = hits.as_ref().clone();
    let total = results.len();
    Ok(SearchResponse {
        query,
        results,
        total,
        notice: (total == 0).then(|| DOCS_NOT_FOUND.to_string()),
    })
}

/// POST /api/search - ranked sections for a query.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = Instant::now();
    let result = run_search(&state, &req).await;
    state
        .metrics
        .record(Tool::Search, start.elapsed(), result.is_ok());
    result.map(Json)
}

/// POST /api/answer - grounded answer with citations.
pub async fn answer(
    State(state): State<AppState>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<RagResponse>, (StatusCode, String)> {
    let start = Instant::now();
    let result = rag::answer(&state, &req).await.map_err(error_response);
    state
        .metrics
        .record(Tool::Answer, start.elapsed(), result.is_ok());
    result.map(Json)
}
